use std::path::PathBuf;
use std::sync::Arc;

use library::Library;
use parking_lot::RwLock;
use tasks::{
    FfmpegTranscoder, SymphoniaTranscoder, TagParser, TaskCoordinator, Transcoder,
    WaveformExtractor, WaveformWorker,
};
use tracing::info;

use crate::config::{resolve_optional, resolve_path, Preferences, TranscoderKind};
use crate::persist::Persistence;

/// Services of a running application, built once at startup.
pub struct AppContext {
    pub config_path: PathBuf,
    pub preferences: Arc<RwLock<Preferences>>,
    pub library: Library,
    pub coordinator: TaskCoordinator,
    pub waveforms: WaveformWorker,
    persistence: Persistence,
}

impl AppContext {
    pub fn build(
        config_path: PathBuf,
        preferences: Preferences,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let folder = resolve_path(&config_path, &preferences.application_folder);
        std::fs::create_dir_all(&folder)?;
        info!("Application folder {:?}", folder);

        let library = Library::open(&folder, preferences.track_sequence)?;
        let extractor = WaveformExtractor::new(
            transcoder_for(&config_path, &preferences),
            resolve_optional(&config_path, &preferences.waveform.temp_dir),
        );
        let preferences = Arc::new(RwLock::new(preferences));
        let persistence = Persistence::spawn(
            library.clone(),
            folder,
            config_path.clone(),
            Arc::clone(&preferences),
        )?;
        let coordinator = TaskCoordinator::new(library.clone(), Arc::new(TagParser));
        let waveforms = WaveformWorker::spawn(library.clone(), extractor)?;

        Ok(Self {
            config_path,
            preferences,
            library,
            coordinator,
            waveforms,
            persistence,
        })
    }

    /// Finishes queued waveforms, then writes out anything still pending.
    pub fn shutdown(self) {
        self.waveforms.shutdown();
        self.persistence.shutdown();
    }
}

fn transcoder_for(config_path: &std::path::Path, prefs: &Preferences) -> Box<dyn Transcoder> {
    match prefs.waveform.transcoder {
        TranscoderKind::Symphonia => Box::new(SymphoniaTranscoder),
        TranscoderKind::Ffmpeg => {
            let binary = prefs.waveform.ffmpeg_path.trim();
            let binary = if binary.contains('/') || binary.contains('\\') {
                resolve_path(config_path, binary)
            } else if binary.is_empty() {
                PathBuf::from("ffmpeg")
            } else {
                PathBuf::from(binary)
            };
            Box::new(FfmpegTranscoder::new(binary))
        }
    }
}
