use std::path::Path;

use common::{Track, TrackId};
use metadata::ParseError;

/// Turns a file into a track. Import jobs go through this seam.
pub trait TrackParser: Send + Sync {
    fn parse(&self, id: TrackId, path: &Path) -> Result<Track, ParseError>;
}

/// Reads the file's tags with the per-format readers.
#[derive(Clone, Copy, Debug, Default)]
pub struct TagParser;

impl TrackParser for TagParser {
    fn parse(&self, id: TrackId, path: &Path) -> Result<Track, ParseError> {
        metadata::parse_track(id, path)
    }
}
