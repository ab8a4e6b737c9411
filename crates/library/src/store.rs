use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use common::{Playlist, Track, TrackId, Waveform};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::LibraryError;

pub const TRACKS_FILE: &str = "tracks.json";
pub const WAVEFORMS_FILE: &str = "waveforms.json";
pub const PLAYLISTS_FILE: &str = "playlists.json";

#[derive(Debug, Default)]
pub struct Snapshot {
    pub tracks: BTreeMap<TrackId, Track>,
    pub waveforms: BTreeMap<TrackId, Waveform>,
    pub playlists: Vec<Playlist>,
}

/// Loads the three library documents from `dir` in parallel.
pub fn load_snapshot(dir: &Path) -> Result<Snapshot, LibraryError> {
    let (tracks, (waveforms, playlists)) = rayon::join(
        || read_doc::<BTreeMap<TrackId, Track>>(&dir.join(TRACKS_FILE)),
        || {
            rayon::join(
                || read_doc::<BTreeMap<TrackId, Waveform>>(&dir.join(WAVEFORMS_FILE)),
                || read_doc::<Vec<Playlist>>(&dir.join(PLAYLISTS_FILE)),
            )
        },
    );
    Ok(Snapshot {
        tracks: tracks?,
        waveforms: waveforms?,
        playlists: playlists?,
    })
}

fn read_doc<T: DeserializeOwned + Default>(path: &Path) -> Result<T, LibraryError> {
    if !path.exists() {
        debug!("No {:?} yet; starting empty", path);
        return Ok(T::default());
    }
    let bytes = fs::read(path)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|err| LibraryError::Json {
        path: path.to_path_buf(),
        err,
    })
}

/// Replaces `path` with the serialized `value` through a sibling temp file.
pub fn write_doc<T: Serialize>(path: &Path, value: &T) -> Result<(), LibraryError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| LibraryError::Json {
        path: path.to_path_buf(),
        err,
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(path).map_err(|err| LibraryError::Io(err.error))?;
    Ok(())
}
