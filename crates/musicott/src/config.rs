use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tasks::{ItunesOptions, ItunesPolicy};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscoderKind {
    #[default]
    Symphonia,
    Ffmpeg,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    pub transcoder: TranscoderKind,
    pub ffmpeg_path: String,
    pub temp_dir: String,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            transcoder: TranscoderKind::Symphonia,
            ffmpeg_path: "ffmpeg".to_string(),
            temp_dir: "".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub version: u32,
    pub application_folder: String,
    pub import_extensions: Vec<String>,
    pub itunes_import_policy: ItunesPolicy,
    pub itunes_import_playlists: bool,
    pub itunes_import_hold_play_count: bool,
    pub track_sequence: u32,
    pub waveform: WaveformConfig,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            application_folder: "musicott".to_string(),
            import_extensions: vec!["mp3".to_string()],
            itunes_import_policy: ItunesPolicy::ItunesData,
            itunes_import_playlists: false,
            itunes_import_hold_play_count: true,
            track_sequence: 0,
            waveform: WaveformConfig::default(),
        }
    }
}

impl Preferences {
    pub fn itunes_options(&self) -> ItunesOptions {
        ItunesOptions {
            policy: self.itunes_import_policy,
            import_playlists: self.itunes_import_playlists,
            keep_play_count: self.itunes_import_hold_play_count,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("MUSICOTT_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_preferences(path: &Path) -> Result<(Preferences, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut prefs: Preferences = serde_yaml::from_str(&contents)?;
        if prefs.version < CONFIG_VERSION {
            prefs.version = CONFIG_VERSION;
        }
        if prefs.application_folder.trim().is_empty() {
            prefs.application_folder = "musicott".to_string();
        }
        prefs.import_extensions = normalize_extensions(&prefs.import_extensions);
        if prefs.import_extensions.is_empty() {
            prefs.import_extensions = vec!["mp3".to_string()];
        }
        return Ok((prefs, false));
    }

    let prefs = Preferences::default();
    save_preferences(path, &prefs)?;
    Ok((prefs, true))
}

pub fn save_preferences(path: &Path, prefs: &Preferences) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(prefs)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_optional(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}

fn normalize_extensions(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let ext = value.trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}
