use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use common::{Track, TrackId};
use library::Library;
use metadata::ParseError;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::events::{JobState, TaskEvent};
use crate::parser::TrackParser;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PathBuf>,
    total: usize,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct FileQueue {
    state: Mutex<QueueState>,
}

impl FileQueue {
    pub(crate) fn new(files: Vec<PathBuf>) -> Self {
        let queue = Self::default();
        {
            let mut state = queue.state.lock();
            state.total = files.len();
            state.pending = files.into();
        }
        queue
    }

    pub(crate) fn append(&self, files: Vec<PathBuf>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.total += files.len();
        state.pending.extend(files);
        true
    }

    fn next(&self) -> Option<PathBuf> {
        let mut state = self.state.lock();
        let next = state.pending.pop_front();
        if next.is_none() {
            state.closed = true;
        }
        next
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
    }

    pub(crate) fn total(&self) -> usize {
        self.state.lock().total
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ParseOutcome {
    pub tracks: Vec<Track>,
    pub errors: Vec<ParseError>,
    pub state: JobState,
}

/// Parses queued files one by one. Cancellation is checked before each file,
/// progress is reported after each one. A path queued twice is parsed once.
pub(crate) fn parse_queue(
    library: &Library,
    parser: &dyn TrackParser,
    queue: &FileQueue,
    token: &CancellationToken,
    progress: &mut dyn FnMut(TaskEvent),
) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut processed = 0;
    let mut seen = HashSet::new();
    loop {
        if token.is_cancelled() {
            queue.close();
            outcome.state = JobState::Cancelled;
            break;
        }
        let path = match queue.next() {
            Some(path) => path,
            None => {
                outcome.state = JobState::Succeeded;
                break;
            }
        };
        if !seen.insert(path.clone()) {
            debug!("Skipping {:?}, already queued in this import", path);
        } else {
            match parse_one(library, parser, &path) {
                Ok(track) => outcome.tracks.push(track),
                Err(err) => {
                    warn!("Failed to read tags for {:?}: {}", path, err.cause);
                    outcome.errors.push(err);
                }
            }
        }
        processed += 1;
        progress(TaskEvent::Progress {
            processed,
            total: queue.total(),
        });
    }
    debug!(
        "Parsed {} files ({} errors), state {:?}",
        processed,
        outcome.errors.len(),
        outcome.state
    );
    outcome
}

fn parse_one(library: &Library, parser: &dyn TrackParser, path: &Path) -> Result<Track, ParseError> {
    match library.find_by_path(path) {
        Some(existing) => {
            let mut track = parser.parse(existing.id(), path)?;
            track.play_count = existing.play_count;
            track.date_added = existing.date_added;
            Ok(track)
        }
        None => {
            let id: TrackId = library.next_track_id();
            parser.parse(id, path)
        }
    }
}
