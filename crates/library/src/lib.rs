mod store;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{Playlist, Track, TrackId, Waveform};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub use store::{load_snapshot, write_doc, Snapshot, PLAYLISTS_FILE, TRACKS_FILE, WAVEFORMS_FILE};

#[derive(Clone, Debug, PartialEq)]
pub enum LibraryEvent {
    TracksAdded(Vec<TrackId>),
    TracksRemoved(Vec<TrackId>),
    TracksUpdated(Vec<TrackId>),
    WaveformAdded(TrackId),
    PlaylistsChanged,
}

#[derive(Default)]
struct Index {
    tracks: HashMap<TrackId, Track>,
    by_artist: BTreeMap<String, BTreeSet<TrackId>>,
    by_album: BTreeMap<String, BTreeSet<TrackId>>,
    by_path: HashMap<PathBuf, TrackId>,
    waveforms: HashMap<TrackId, Waveform>,
    playlists: Vec<Playlist>,
    sequence: TrackId,
}

impl Index {
    fn insert(&mut self, track: Track) {
        let id = track.id();
        self.unindex(id);
        for artist in track.artists_involved() {
            self.by_artist.entry(artist).or_default().insert(id);
        }
        self.by_album.entry(track.album_key()).or_default().insert(id);
        self.by_path.insert(track.path(), id);
        self.tracks.insert(id, track);
    }

    fn unindex(&mut self, id: TrackId) -> Option<Track> {
        let old = self.tracks.remove(&id)?;
        for artist in old.artists_involved() {
            remove_from(&mut self.by_artist, &artist, id);
        }
        remove_from(&mut self.by_album, &old.album_key(), id);
        let path = old.path();
        if self.by_path.get(&path) == Some(&id) {
            self.by_path.remove(&path);
        }
        Some(old)
    }

    fn collect(&self, ids: Option<&BTreeSet<TrackId>>) -> Vec<Track> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.tracks.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }
}

fn remove_from(map: &mut BTreeMap<String, BTreeSet<TrackId>>, key: &str, id: TrackId) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

/// In-memory music library. Clones share the same index.
#[derive(Clone, Default)]
pub struct Library {
    index: Arc<RwLock<Index>>,
    subscribers: Arc<Mutex<Vec<Sender<LibraryEvent>>>>,
}

impl Library {
    pub fn new(sequence: TrackId) -> Self {
        let library = Self::default();
        library.index.write().sequence = sequence;
        library
    }

    /// Opens the library documents under `dir`; missing documents start empty.
    pub fn open(dir: &Path, sequence: TrackId) -> Result<Self, LibraryError> {
        let snapshot = load_snapshot(dir)?;
        let library = Self::new(sequence);
        {
            let mut index = library.index.write();
            for (_, track) in snapshot.tracks {
                index.insert(track);
            }
            let waveforms: HashMap<TrackId, Waveform> = snapshot
                .waveforms
                .into_iter()
                .filter(|(id, _)| index.tracks.contains_key(id))
                .collect();
            index.waveforms = waveforms;
            index.playlists = snapshot.playlists;
            info!(
                "Library ready: {} tracks, {} artists, {} albums, {} waveforms",
                index.tracks.len(),
                index.by_artist.len(),
                index.by_album.len(),
                index.waveforms.len()
            );
        }
        Ok(library)
    }

    pub fn subscribe(&self) -> Receiver<LibraryEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: LibraryEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Hands out the next free track id, skipping ids already in the library.
    pub fn next_track_id(&self) -> TrackId {
        let mut index = self.index.write();
        loop {
            index.sequence = index.sequence.wrapping_add(1);
            let candidate = index.sequence;
            if candidate != 0 && !index.tracks.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn sequence(&self) -> TrackId {
        self.index.read().sequence
    }

    /// Inserts or replaces every track of the batch under a single write lock.
    pub fn add_tracks(&self, batch: Vec<Track>) -> Vec<TrackId> {
        if batch.is_empty() {
            return Vec::new();
        }
        let ids: Vec<TrackId> = batch.iter().map(Track::id).collect();
        {
            let mut index = self.index.write();
            for track in batch {
                index.insert(track);
            }
        }
        debug!("Added {} tracks", ids.len());
        self.emit(LibraryEvent::TracksAdded(ids.clone()));
        ids
    }

    pub fn remove_tracks(&self, ids: &[TrackId]) -> Vec<Track> {
        let wanted: BTreeSet<TrackId> = ids.iter().copied().collect();
        let (removed, playlists_changed) = {
            let mut index = self.index.write();
            let removed: Vec<Track> = wanted.iter().filter_map(|id| index.unindex(*id)).collect();
            for id in &wanted {
                index.waveforms.remove(id);
            }
            let mut changed = false;
            for playlist in index.playlists.iter_mut() {
                changed |= playlist.remove_tracks(&wanted);
            }
            (removed, changed)
        };
        if !removed.is_empty() {
            info!("Removed {} tracks", removed.len());
            self.emit(LibraryEvent::TracksRemoved(
                removed.iter().map(Track::id).collect(),
            ));
        }
        if playlists_changed {
            self.emit(LibraryEvent::PlaylistsChanged);
        }
        removed
    }

    pub fn update_track(&self, mut track: Track) -> Result<(), LibraryError> {
        let id = track.id();
        {
            let mut index = self.index.write();
            if !index.tracks.contains_key(&id) {
                return Err(LibraryError::TrackNotFound(id));
            }
            track.touch();
            index.insert(track);
        }
        self.emit(LibraryEvent::TracksUpdated(vec![id]));
        Ok(())
    }

    pub fn increment_play_count(&self, id: TrackId) -> Option<u32> {
        let count = {
            let mut index = self.index.write();
            let track = index.tracks.get_mut(&id)?;
            track.play_count += 1;
            track.play_count
        };
        self.emit(LibraryEvent::TracksUpdated(vec![id]));
        Some(count)
    }

    pub fn get_track(&self, id: TrackId) -> Option<Track> {
        self.index.read().tracks.get(&id).cloned()
    }

    pub fn contains_track(&self, id: TrackId) -> bool {
        self.index.read().tracks.contains_key(&id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<Track> {
        let index = self.index.read();
        let id = index.by_path.get(path)?;
        index.tracks.get(id).cloned()
    }

    pub fn tracks(&self) -> Vec<Track> {
        let index = self.index.read();
        let mut tracks: Vec<Track> = index.tracks.values().cloned().collect();
        tracks.sort_by_key(Track::id);
        tracks
    }

    pub fn track_count(&self) -> usize {
        self.index.read().tracks.len()
    }

    pub fn tracks_by_artist(&self, artist: &str) -> Vec<Track> {
        let index = self.index.read();
        index.collect(index.by_artist.get(artist))
    }

    pub fn tracks_by_album(&self, album: &str) -> Vec<Track> {
        let index = self.index.read();
        index.collect(index.by_album.get(album))
    }

    pub fn artists(&self) -> Vec<String> {
        self.index.read().by_artist.keys().cloned().collect()
    }

    pub fn albums(&self) -> Vec<String> {
        self.index.read().by_album.keys().cloned().collect()
    }

    pub fn add_waveform(&self, id: TrackId, waveform: Waveform) -> Result<(), LibraryError> {
        {
            let mut index = self.index.write();
            if !index.tracks.contains_key(&id) {
                return Err(LibraryError::TrackNotFound(id));
            }
            index.waveforms.insert(id, waveform);
        }
        self.emit(LibraryEvent::WaveformAdded(id));
        Ok(())
    }

    pub fn waveform(&self, id: TrackId) -> Option<Waveform> {
        self.index.read().waveforms.get(&id).cloned()
    }

    pub fn contains_waveform(&self, id: TrackId) -> bool {
        self.index.read().waveforms.contains_key(&id)
    }

    pub fn add_playlist(&self, playlist: Playlist) {
        {
            let mut index = self.index.write();
            match index.playlists.iter_mut().find(|p| p.name == playlist.name) {
                Some(existing) => *existing = playlist,
                None => index.playlists.push(playlist),
            }
        }
        self.emit(LibraryEvent::PlaylistsChanged);
    }

    pub fn delete_playlist(&self, name: &str) -> bool {
        let deleted = {
            let mut index = self.index.write();
            let before = index.playlists.len();
            index.playlists.retain(|p| p.name != name);
            before != index.playlists.len()
                || index
                    .playlists
                    .iter_mut()
                    .filter(|p| p.is_folder)
                    .any(|p| p.remove_child(name))
        };
        if deleted {
            self.emit(LibraryEvent::PlaylistsChanged);
        } else {
            warn!("Playlist {:?} not found", name);
        }
        deleted
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.index.read().playlists.clone()
    }

    pub fn save_tracks(&self, dir: &Path) -> Result<(), LibraryError> {
        let tracks: BTreeMap<TrackId, Track> = {
            let index = self.index.read();
            index.tracks.iter().map(|(id, t)| (*id, t.clone())).collect()
        };
        write_doc(&dir.join(TRACKS_FILE), &tracks)
    }

    pub fn save_waveforms(&self, dir: &Path) -> Result<(), LibraryError> {
        let waveforms: BTreeMap<TrackId, Waveform> = {
            let index = self.index.read();
            index.waveforms.iter().map(|(id, w)| (*id, w.clone())).collect()
        };
        write_doc(&dir.join(WAVEFORMS_FILE), &waveforms)
    }

    pub fn save_playlists(&self, dir: &Path) -> Result<(), LibraryError> {
        let playlists = self.playlists();
        write_doc(&dir.join(PLAYLISTS_FILE), &playlists)
    }

    pub fn save_all(&self, dir: &Path) -> Result<(), LibraryError> {
        self.save_tracks(dir)?;
        self.save_waveforms(dir)?;
        self.save_playlists(dir)
    }

    pub fn stats(&self) -> LibraryStats {
        let index = self.index.read();
        LibraryStats {
            tracks: index.tracks.len(),
            artists: index.by_artist.len(),
            albums: index.by_album.len(),
            waveforms: index.waveforms.len(),
            playlists: index.playlists.len(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LibraryStats {
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub waveforms: usize,
    pub playlists: usize,
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Json { path: PathBuf, err: serde_json::Error },
    TrackNotFound(TrackId),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Json { path, err } => write!(f, "json error in {:?}: {}", path, err),
            LibraryError::TrackNotFound(id) => write!(f, "track {} not found", id),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}
