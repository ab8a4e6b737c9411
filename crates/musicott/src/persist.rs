use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use library::{Library, LibraryEvent};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::{save_preferences, Preferences};

#[derive(Default, Debug, PartialEq, Eq)]
struct Dirty {
    tracks: bool,
    waveforms: bool,
    playlists: bool,
    sequence: bool,
}

impl Dirty {
    fn mark(&mut self, event: &LibraryEvent) {
        match event {
            LibraryEvent::TracksAdded(_) => {
                self.tracks = true;
                self.sequence = true;
            }
            LibraryEvent::TracksRemoved(_) => {
                self.tracks = true;
                self.waveforms = true;
            }
            LibraryEvent::TracksUpdated(_) => self.tracks = true,
            LibraryEvent::WaveformAdded(_) => self.waveforms = true,
            LibraryEvent::PlaylistsChanged => self.playlists = true,
        }
    }
}

/// Rewrites the library documents whenever the library reports a change.
pub struct Persistence {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

struct Writer {
    library: Library,
    folder: PathBuf,
    config_path: PathBuf,
    preferences: Arc<RwLock<Preferences>>,
}

impl Persistence {
    pub fn spawn(
        library: Library,
        folder: PathBuf,
        config_path: PathBuf,
        preferences: Arc<RwLock<Preferences>>,
    ) -> std::io::Result<Self> {
        let events = library.subscribe();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let writer = Writer {
            library,
            folder,
            config_path,
            preferences,
        };
        let handle = std::thread::Builder::new()
            .name("musicott-persist".to_string())
            .spawn(move || writer.run(events, stop_rx))?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Flushes pending changes and stops the thread.
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Persistence thread panicked");
            }
        }
    }
}

impl Drop for Persistence {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

impl Writer {
    fn run(self, events: Receiver<LibraryEvent>, stop: Receiver<()>) {
        loop {
            let mut dirty = Dirty::default();
            let stopping = select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        dirty.mark(&event);
                        false
                    }
                    Err(_) => true,
                },
                recv(stop) -> _ => true,
            };
            // Coalesce whatever else is already queued into one write.
            for event in events.try_iter() {
                dirty.mark(&event);
            }
            self.flush(&dirty);
            if stopping {
                debug!("Persistence stopped");
                return;
            }
        }
    }

    fn flush(&self, dirty: &Dirty) {
        if dirty.tracks {
            if let Err(err) = self.library.save_tracks(&self.folder) {
                warn!("Failed to save tracks: {}", err);
            }
        }
        if dirty.waveforms {
            if let Err(err) = self.library.save_waveforms(&self.folder) {
                warn!("Failed to save waveforms: {}", err);
            }
        }
        if dirty.playlists {
            if let Err(err) = self.library.save_playlists(&self.folder) {
                warn!("Failed to save playlists: {}", err);
            }
        }
        if dirty.sequence {
            let snapshot = {
                let mut prefs = self.preferences.write();
                prefs.track_sequence = self.library.sequence();
                prefs.clone()
            };
            if let Err(err) = save_preferences(&self.config_path, &snapshot) {
                warn!("Failed to save preferences: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_or_create_preferences;
    use common::{Playlist, Track};
    use library::{PLAYLISTS_FILE, TRACKS_FILE};
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn removal_marks_tracks_and_waveforms() {
        let mut dirty = Dirty::default();
        dirty.mark(&LibraryEvent::TracksRemoved(vec![1]));
        assert_eq!(
            dirty,
            Dirty {
                tracks: true,
                waveforms: true,
                playlists: false,
                sequence: false,
            }
        );
    }

    #[test]
    fn changes_are_written_and_sequence_saved() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let (prefs, _) = load_or_create_preferences(&config_path).unwrap();
        let prefs = Arc::new(RwLock::new(prefs));
        let folder = dir.path().join("data");

        let library = Library::new(0);
        let persistence =
            Persistence::spawn(library.clone(), folder.clone(), config_path.clone(), prefs).unwrap();
        let id = library.next_track_id();
        library.add_tracks(vec![Track::with_location(id, Path::new("/m/a.mp3"))]);
        library.add_playlist(Playlist::new("mix"));
        persistence.shutdown();

        assert!(folder.join(TRACKS_FILE).exists());
        assert!(folder.join(PLAYLISTS_FILE).exists());
        let reopened = Library::open(&folder, 0).unwrap();
        assert_eq!(reopened.track_count(), 1);
        let (saved, _) = load_or_create_preferences(&config_path).unwrap();
        assert_eq!(saved.track_sequence, 1);
    }
}
