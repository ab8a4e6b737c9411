use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use common::Track;
use crossbeam_channel::{unbounded, Receiver, Sender};
use library::Library;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::TaskError;
use crate::events::{ImportReport, JobKind, TaskEvent};
use crate::import::{parse_queue, FileQueue};
use crate::itunes::{self, ItunesOptions};
use crate::parser::TrackParser;
use crate::scan::collect_audio_files;
use crate::update::{update_metadata, UpdateError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Started,
    /// The files joined the queue of the file import already running.
    Appended,
}

struct ActiveJob {
    kind: JobKind,
    token: CancellationToken,
    queue: Option<Arc<FileQueue>>,
}

enum Target {
    Folder { folder: PathBuf, extensions: Vec<String> },
    Files(Arc<FileQueue>),
    Itunes { xml: PathBuf, options: ItunesOptions },
}

/// Runs imports one at a time on a dedicated thread and reports through a
/// channel read by the presentation thread.
#[derive(Clone)]
pub struct TaskCoordinator {
    library: Library,
    parser: Arc<dyn TrackParser>,
    active: Arc<Mutex<Option<ActiveJob>>>,
    events_tx: Sender<TaskEvent>,
    events_rx: Receiver<TaskEvent>,
}

impl TaskCoordinator {
    pub fn new(library: Library, parser: Arc<dyn TrackParser>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            library,
            parser,
            active: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx,
        }
    }

    pub fn events(&self) -> Receiver<TaskEvent> {
        self.events_rx.clone()
    }

    pub fn is_importing(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(job) => {
                info!("Cancelling {:?} import", job.kind);
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn submit_folder_import(
        &self,
        folder: &Path,
        extensions: &[String],
        play_after: bool,
    ) -> Result<Submission, TaskError> {
        let target = Target::Folder {
            folder: folder.to_path_buf(),
            extensions: extensions.to_vec(),
        };
        self.start(JobKind::Folder, target, None, play_after)
    }

    pub fn submit_file_import(
        &self,
        files: Vec<PathBuf>,
        play_after: bool,
    ) -> Result<Submission, TaskError> {
        let mut active = self.active.lock();
        if let Some(job) = active.as_ref() {
            return match (&job.kind, &job.queue) {
                (JobKind::Files, Some(queue)) if queue.append(files.clone()) => {
                    info!("Appended {} files to the running import", files.len());
                    Ok(Submission::Appended)
                }
                _ => Err(TaskError::AlreadyImporting),
            };
        }
        let queue = Arc::new(FileQueue::new(files));
        self.spawn_locked(
            &mut active,
            JobKind::Files,
            Target::Files(Arc::clone(&queue)),
            Some(queue),
            play_after,
        )
    }

    pub fn submit_itunes_import(
        &self,
        xml: &Path,
        options: ItunesOptions,
    ) -> Result<Submission, TaskError> {
        if !itunes::is_valid_itunes_xml(xml)? {
            return Err(TaskError::InvalidItunesLibrary(xml.to_path_buf()));
        }
        let target = Target::Itunes {
            xml: xml.to_path_buf(),
            options,
        };
        self.start(JobKind::Itunes, target, None, false)
    }

    /// Writes edited tags on a background thread; the handle yields the
    /// aggregated failures.
    pub fn update_metadata(&self, tracks: Vec<Track>) -> Result<JoinHandle<Vec<UpdateError>>, TaskError> {
        let library = self.library.clone();
        let handle = std::thread::Builder::new()
            .name("musicott-update".to_string())
            .spawn(move || update_metadata(&library, tracks))?;
        Ok(handle)
    }

    fn start(
        &self,
        kind: JobKind,
        target: Target,
        queue: Option<Arc<FileQueue>>,
        play_after: bool,
    ) -> Result<Submission, TaskError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(TaskError::AlreadyImporting);
        }
        self.spawn_locked(&mut active, kind, target, queue, play_after)
    }

    fn spawn_locked(
        &self,
        active: &mut Option<ActiveJob>,
        kind: JobKind,
        target: Target,
        queue: Option<Arc<FileQueue>>,
        play_after: bool,
    ) -> Result<Submission, TaskError> {
        let token = CancellationToken::new();
        let worker = Worker {
            library: self.library.clone(),
            parser: Arc::clone(&self.parser),
            active: Arc::clone(&self.active),
            events: self.events_tx.clone(),
            token: token.clone(),
        };
        std::thread::Builder::new()
            .name("musicott-import".to_string())
            .spawn(move || worker.run(kind, target, play_after))?;
        *active = Some(ActiveJob { kind, token, queue });
        Ok(Submission::Started)
    }
}

struct Worker {
    library: Library,
    parser: Arc<dyn TrackParser>,
    active: Arc<Mutex<Option<ActiveJob>>>,
    events: Sender<TaskEvent>,
    token: CancellationToken,
}

impl Worker {
    fn run(self, kind: JobKind, target: Target, play_after: bool) {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(kind, target, play_after)
        }));
        let mut report = match outcome {
            Ok(report) => report,
            Err(cause) => {
                let message = panic_message(cause.as_ref());
                error!("Import worker panicked: {}", message);
                ImportReport::failed(kind, play_after, format!("import aborted: {}", message))
            }
        };
        report.elapsed = started.elapsed();
        info!("{}", report.summary());
        // The slot frees before Finished so a listener may start the next job.
        self.active.lock().take();
        if self.events.send(TaskEvent::Finished(report)).is_err() {
            warn!("Import finished with nobody listening");
        }
    }

    fn execute(&self, kind: JobKind, target: Target, play_after: bool) -> ImportReport {
        let events = self.events.clone();
        let mut progress = move |event: TaskEvent| {
            let _ = events.send(event);
        };
        match target {
            Target::Itunes { xml, options } => itunes::run_import(
                &xml,
                options,
                &self.library,
                self.parser.as_ref(),
                &self.token,
                &mut progress,
            ),
            Target::Folder { folder, extensions } => {
                if !folder.is_dir() {
                    let message = format!("{} is not a folder", folder.display());
                    warn!("Import failed: {}", message);
                    return ImportReport::failed(kind, play_after, message);
                }
                progress(TaskEvent::Status(format!("Scanning {}", folder.display())));
                let files = collect_audio_files(&folder, &extensions);
                info!("Found {} files to import in {:?}", files.len(), folder);
                let queue = FileQueue::new(files);
                queue.close();
                self.parse(kind, &queue, play_after, &mut progress)
            }
            Target::Files(queue) => self.parse(kind, &queue, play_after, &mut progress),
        }
    }

    fn parse(
        &self,
        kind: JobKind,
        queue: &FileQueue,
        play_after: bool,
        progress: &mut dyn FnMut(TaskEvent),
    ) -> ImportReport {
        progress(TaskEvent::Status(format!("Parsing {} files", queue.total())));
        let outcome = parse_queue(
            &self.library,
            self.parser.as_ref(),
            queue,
            &self.token,
            progress,
        );
        let mut report = ImportReport::new(kind, play_after);
        report.total = queue.total();
        report.state = outcome.state;
        report.errors = outcome.errors;
        report.track_ids = self.library.add_tracks(outcome.tracks);
        report
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::JobState;
    use crate::import::tests::PathParser;
    use common::TrackId;
    use metadata::ParseError;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Waits on the gate before every file; dropping the sender opens it.
    struct GatedParser {
        gate: Receiver<()>,
    }

    impl TrackParser for GatedParser {
        fn parse(&self, id: TrackId, path: &Path) -> Result<Track, ParseError> {
            let _ = self.gate.recv();
            PathParser.parse(id, path)
        }
    }

    struct PanickingParser;

    impl TrackParser for PanickingParser {
        fn parse(&self, _id: TrackId, path: &Path) -> Result<Track, ParseError> {
            panic!("cannot parse {}", path.display());
        }
    }

    fn wait_finished(events: &Receiver<TaskEvent>) -> ImportReport {
        loop {
            match events.recv_timeout(Duration::from_secs(10)) {
                Ok(TaskEvent::Finished(report)) => return report,
                Ok(_) => continue,
                Err(err) => panic!("no report: {}", err),
            }
        }
    }

    fn music_folder(names: &[&str]) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        dir
    }

    #[test]
    fn folder_import_filters_by_extension() {
        let dir = music_folder(&["a.mp3", "b.mp3", "c.mp3", "d.ogg"]);
        let library = Library::new(0);
        let coordinator = TaskCoordinator::new(library.clone(), Arc::new(PathParser));
        let events = coordinator.events();

        let submitted = coordinator
            .submit_folder_import(dir.path(), &["mp3".to_string()], true)
            .unwrap();
        assert_eq!(submitted, Submission::Started);
        let report = wait_finished(&events);

        assert_eq!(report.state, JobState::Succeeded);
        assert_eq!(report.total, 3);
        assert_eq!(report.track_ids.len(), 3);
        assert!(report.play_after);
        assert_eq!(library.track_count(), 3);
        assert!(!coordinator.is_importing());
    }

    #[test]
    fn second_import_is_rejected_while_running() {
        let dir = music_folder(&["a.mp3", "b.mp3", "c.mp3"]);
        let other = music_folder(&["x.mp3"]);
        let (gate_tx, gate_rx) = unbounded();
        let library = Library::new(0);
        let coordinator = TaskCoordinator::new(library.clone(), Arc::new(GatedParser { gate: gate_rx }));
        let events = coordinator.events();
        let exts = vec!["mp3".to_string()];

        coordinator.submit_folder_import(dir.path(), &exts, false).unwrap();
        assert!(coordinator.is_importing());
        assert!(matches!(
            coordinator.submit_folder_import(other.path(), &exts, false),
            Err(TaskError::AlreadyImporting)
        ));
        assert!(matches!(
            coordinator.submit_file_import(vec![other.path().join("x.mp3")], false),
            Err(TaskError::AlreadyImporting)
        ));

        drop(gate_tx);
        let report = wait_finished(&events);
        assert_eq!(report.total, 3);
        assert_eq!(report.track_ids.len(), 3);
        assert!(library.find_by_path(&other.path().join("x.mp3")).is_none());
    }

    #[test]
    fn running_file_import_accepts_more_files() {
        let (gate_tx, gate_rx) = unbounded();
        let library = Library::new(0);
        let coordinator = TaskCoordinator::new(library.clone(), Arc::new(GatedParser { gate: gate_rx }));
        let events = coordinator.events();

        let first = coordinator
            .submit_file_import(vec![PathBuf::from("/m/a.mp3"), PathBuf::from("/m/b.mp3")], false)
            .unwrap();
        let second = coordinator
            .submit_file_import(vec![PathBuf::from("/m/c.mp3")], false)
            .unwrap();
        assert_eq!(first, Submission::Started);
        assert_eq!(second, Submission::Appended);

        drop(gate_tx);
        let report = wait_finished(&events);
        assert_eq!(report.total, 3);
        assert_eq!(report.track_ids.len(), 3);
    }

    #[test]
    fn cancelled_job_keeps_parsed_subset() {
        let (gate_tx, gate_rx) = unbounded();
        let library = Library::new(0);
        let coordinator = TaskCoordinator::new(library.clone(), Arc::new(GatedParser { gate: gate_rx }));
        let events = coordinator.events();
        let files: Vec<PathBuf> = (1..=5).map(|i| PathBuf::from(format!("/m/{}.mp3", i))).collect();
        coordinator.submit_file_import(files, false).unwrap();

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        loop {
            match events.recv_timeout(Duration::from_secs(10)) {
                Ok(TaskEvent::Progress { processed: 2, .. }) => break,
                Ok(_) => continue,
                Err(err) => panic!("no progress: {}", err),
            }
        }
        assert!(coordinator.cancel());
        drop(gate_tx);
        let report = wait_finished(&events);

        assert_eq!(report.state, JobState::Cancelled);
        assert!(report.track_ids.len() >= 2 && report.track_ids.len() <= 3);
        assert_eq!(library.track_count(), report.track_ids.len());
    }

    #[test]
    fn missing_folder_fails_and_frees_the_slot() {
        let dir = tempdir().unwrap();
        let coordinator = TaskCoordinator::new(Library::new(0), Arc::new(PathParser));
        let events = coordinator.events();
        coordinator
            .submit_folder_import(&dir.path().join("gone"), &["mp3".to_string()], false)
            .unwrap();
        let report = wait_finished(&events);
        assert_eq!(report.state, JobState::Failed);
        assert!(!coordinator.is_importing());
        assert!(!coordinator.cancel());
    }

    #[test]
    fn invalid_itunes_file_is_rejected_up_front() {
        let dir = tempdir().unwrap();
        let xml = dir.path().join("library.xml");
        fs::write(&xml, "not\nplist\n").unwrap();
        let coordinator = TaskCoordinator::new(Library::new(0), Arc::new(PathParser));
        assert!(matches!(
            coordinator.submit_itunes_import(&xml, ItunesOptions::default()),
            Err(TaskError::InvalidItunesLibrary(_))
        ));
        assert!(!coordinator.is_importing());
    }

    #[test]
    fn panicking_job_fails_and_frees_the_slot() {
        let library = Library::new(0);
        let coordinator = TaskCoordinator::new(library.clone(), Arc::new(PanickingParser));
        let events = coordinator.events();

        coordinator
            .submit_file_import(vec![PathBuf::from("/m/a.mp3")], false)
            .unwrap();
        let report = wait_finished(&events);
        assert_eq!(report.state, JobState::Failed);
        assert!(report.failure.unwrap().contains("cannot parse /m/a.mp3"));
        assert!(!coordinator.is_importing());
        assert_eq!(library.track_count(), 0);

        let again = coordinator.submit_file_import(vec![PathBuf::from("/m/b.mp3")], false);
        assert_eq!(again.unwrap(), Submission::Started);
        assert_eq!(wait_finished(&events).state, JobState::Failed);
    }
}
