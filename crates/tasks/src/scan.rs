use std::path::{Path, PathBuf};

use common::has_extension;
use tracing::warn;
use walkdir::WalkDir;

/// Every file under `folder` whose extension is in `extensions`, in walk
/// order with entries sorted by name inside each directory.
pub fn collect_audio_files(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable entry under {:?}: {}", folder, err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_extension(path, extensions))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn filters_by_extension_recursively_in_name_order() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("disc 2");
        fs::create_dir(&nested).unwrap();
        for name in ["b.mp3", "a.MP3", "c.ogg"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::write(nested.join("d.mp3"), b"").unwrap();

        let files = collect_audio_files(dir.path(), &["mp3".to_string()]);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "a.MP3".to_string(),
                "b.mp3".to_string(),
                Path::new("disc 2").join("d.mp3").to_string_lossy().to_string(),
            ]
        );
    }

    #[test]
    fn missing_folder_yields_nothing() {
        let dir = tempdir().unwrap();
        let files = collect_audio_files(&dir.path().join("nope"), &["mp3".to_string()]);
        assert!(files.is_empty());
    }
}
