use std::path::PathBuf;
use std::time::Duration;

use common::TrackId;
use metadata::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    Folder,
    Files,
    Itunes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Running,
    Succeeded,
    Cancelled,
    Failed,
}

/// Outcome of one import job, sent with `TaskEvent::Finished`.
#[derive(Debug)]
pub struct ImportReport {
    pub kind: JobKind,
    pub state: JobState,
    pub total: usize,
    pub track_ids: Vec<TrackId>,
    pub errors: Vec<ParseError>,
    pub not_found: Vec<PathBuf>,
    pub playlists: usize,
    pub play_after: bool,
    pub elapsed: Duration,
    pub failure: Option<String>,
}

impl ImportReport {
    pub fn new(kind: JobKind, play_after: bool) -> Self {
        Self {
            kind,
            state: JobState::Running,
            total: 0,
            track_ids: Vec::new(),
            errors: Vec::new(),
            not_found: Vec::new(),
            playlists: 0,
            play_after,
            elapsed: Duration::ZERO,
            failure: None,
        }
    }

    pub fn failed(kind: JobKind, play_after: bool, message: String) -> Self {
        let mut report = Self::new(kind, play_after);
        report.state = JobState::Failed;
        report.failure = Some(message);
        report
    }

    /// One line for the whole job, errors folded in.
    pub fn summary(&self) -> String {
        let mut line = match self.state {
            JobState::Failed => format!(
                "Import failed: {}",
                self.failure.as_deref().unwrap_or("unknown error")
            ),
            JobState::Cancelled => format!(
                "Import cancelled after {} of {} files",
                self.track_ids.len() + self.errors.len(),
                self.total
            ),
            _ => format!(
                "Imported {} of {} files in {:.1}s",
                self.track_ids.len(),
                self.total,
                self.elapsed.as_secs_f64()
            ),
        };
        if self.playlists > 0 {
            line.push_str(&format!(", {} playlists", self.playlists));
        }
        if !self.errors.is_empty() {
            line.push_str(&format!(", {} errors", self.errors.len()));
        }
        if !self.not_found.is_empty() {
            line.push_str(&format!(", {} files not found", self.not_found.len()));
        }
        line
    }
}

#[derive(Debug)]
pub enum TaskEvent {
    Progress { processed: usize, total: usize },
    Status(String),
    Finished(ImportReport),
}

impl TaskEvent {
    pub fn progress_ratio(&self) -> Option<f64> {
        match self {
            TaskEvent::Progress { processed, total } if *total > 0 => {
                Some(*processed as f64 / *total as f64)
            }
            TaskEvent::Progress { .. } => Some(0.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_folds_errors_and_missing_files() {
        let mut report = ImportReport::new(JobKind::Itunes, false);
        report.state = JobState::Succeeded;
        report.total = 4;
        report.track_ids = vec![1, 2];
        report.not_found = vec![PathBuf::from("/gone.mp3")];
        report.playlists = 3;
        let summary = report.summary();
        assert!(summary.starts_with("Imported 2 of 4 files"));
        assert!(summary.ends_with(", 3 playlists, 1 files not found"));
    }

    #[test]
    fn progress_ratio_handles_empty_jobs() {
        let event = TaskEvent::Progress { processed: 1, total: 4 };
        assert_eq!(event.progress_ratio(), Some(0.25));
        let empty = TaskEvent::Progress { processed: 0, total: 0 };
        assert_eq!(empty.progress_ratio(), Some(0.0));
        assert_eq!(TaskEvent::Status("x".into()).progress_ratio(), None);
    }
}
