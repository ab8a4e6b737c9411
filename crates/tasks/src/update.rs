use std::path::PathBuf;

use common::{Track, TrackId};
use library::{Library, LibraryError};
use metadata::{write_tags, TagFields, WriteMetadataError};
use tracing::{info, warn};

#[derive(Debug)]
pub enum UpdateError {
    Write {
        id: TrackId,
        path: PathBuf,
        err: WriteMetadataError,
    },
    Library(LibraryError),
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateError::Write { id, path, err } => {
                write!(f, "track {} ({}): {}", id, path.display(), err)
            }
            UpdateError::Library(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for UpdateError {}

/// Applies edited tracks: tags go into the files that are on disk, then every
/// track is re-indexed. Failures are collected, never fatal to the batch.
pub fn update_metadata(library: &Library, tracks: Vec<Track>) -> Vec<UpdateError> {
    let mut errors = Vec::new();
    let total = tracks.len();
    for track in tracks {
        let path = track.path();
        if track.in_disk && path.is_file() {
            if let Err(err) = write_tags(&path, &TagFields::from_track(&track)) {
                warn!("Failed to update metadata of {}: {}", track, err);
                errors.push(UpdateError::Write {
                    id: track.id(),
                    path,
                    err,
                });
            }
        }
        if let Err(err) = library.update_track(track) {
            errors.push(UpdateError::Library(err));
        }
    }
    info!("Updated {} tracks, {} errors", total, errors.len());
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn edits_reach_library_and_failures_are_aggregated() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.flac");
        fs::write(&broken, b"garbage").unwrap();

        let library = Library::new(0);
        let mut on_disk = Track::with_location(1, &broken);
        on_disk.in_disk = true;
        let offline = Track::with_location(2, Path::new("/nowhere/offline.mp3"));
        library.add_tracks(vec![on_disk.clone(), offline.clone()]);

        let mut edited_disk = on_disk;
        edited_disk.name = "Renamed".to_string();
        let mut edited_offline = offline;
        edited_offline.artist = "Someone".to_string();
        let unknown = Track::with_location(9, Path::new("/nowhere/x.mp3"));

        let errors = update_metadata(&library, vec![edited_disk, edited_offline, unknown]);
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], UpdateError::Write { id: 1, .. }));
        assert!(matches!(errors[1], UpdateError::Library(LibraryError::TrackNotFound(9))));
        assert_eq!(fs::read(&broken).unwrap(), b"garbage");
        assert_eq!(library.get_track(1).unwrap().name, "Renamed");
        assert_eq!(library.tracks_by_artist("Someone").len(), 1);
    }
}
