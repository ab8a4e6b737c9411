mod cancel;
mod coordinator;
mod error;
mod events;
mod import;
pub mod itunes;
mod parser;
mod scan;
mod update;
pub mod waveform;

pub use cancel::CancellationToken;
pub use coordinator::{Submission, TaskCoordinator};
pub use error::TaskError;
pub use events::{ImportReport, JobKind, JobState, TaskEvent};
pub use itunes::{ItunesOptions, ItunesPolicy};
pub use parser::{TagParser, TrackParser};
pub use scan::collect_audio_files;
pub use update::{update_metadata, UpdateError};
pub use waveform::{
    FfmpegTranscoder, SymphoniaTranscoder, Transcoder, TranscodeError, WaveformExtractor,
    WaveformWorker,
};
