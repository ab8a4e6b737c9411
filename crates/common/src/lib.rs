use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub type TrackId = u32;

/// Number of amplitude bins in a computed waveform.
pub const WAVEFORM_WIDTH: usize = 515;

pub const UNKNOWN_ALBUM: &str = "Unknown album";

pub type Waveform = Vec<f32>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Mp3,
    M4a,
    Wav,
    Flac,
    #[default]
    Other,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = match path.extension() {
            Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
            None => return FileFormat::Other,
        };
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp3" => FileFormat::Mp3,
            "m4a" | "mp4" => FileFormat::M4a,
            "wav" => FileFormat::Wav,
            "flac" => FileFormat::Flac,
            _ => FileFormat::Other,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Mp3 => "mp3",
            FileFormat::M4a => "m4a",
            FileFormat::Wav => "wav",
            FileFormat::Flac => "flac",
            FileFormat::Other => "",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    id: TrackId,
    pub file_folder: String,
    file_name: String,
    file_format: FileFormat,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub genre: String,
    pub comments: String,
    pub label: String,
    pub is_compilation: bool,
    pub track_number: u16,
    pub disc_number: u16,
    pub year: u16,
    pub bpm: u16,
    pub bit_rate: u32,
    pub is_variable_bit_rate: bool,
    pub encoding: String,
    pub encoder: String,
    pub duration_ms: u64,
    pub size: u64,
    pub play_count: u32,
    pub has_cover: bool,
    pub in_disk: bool,
    pub date_added: u64,
    pub date_modified: u64,
}

impl Default for Track {
    fn default() -> Self {
        Track::new(0)
    }
}

impl Track {
    pub fn new(id: TrackId) -> Self {
        let now = now_secs();
        Self {
            id,
            file_folder: String::new(),
            file_name: String::new(),
            file_format: FileFormat::Other,
            name: String::new(),
            artist: String::new(),
            album: String::new(),
            album_artist: String::new(),
            genre: String::new(),
            comments: String::new(),
            label: String::new(),
            is_compilation: false,
            track_number: 0,
            disc_number: 0,
            year: 0,
            bpm: 0,
            bit_rate: 0,
            is_variable_bit_rate: false,
            encoding: String::new(),
            encoder: String::new(),
            duration_ms: 0,
            size: 0,
            play_count: 0,
            has_cover: false,
            in_disk: false,
            date_added: now,
            date_modified: now,
        }
    }

    pub fn with_location(id: TrackId, path: &Path) -> Self {
        let mut track = Track::new(id);
        track.set_location(path);
        track
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_format(&self) -> FileFormat {
        self.file_format
    }

    pub fn set_file_name(&mut self, file_name: &str) {
        self.file_name = file_name.to_string();
        self.file_format = FileFormat::from_path(Path::new(file_name));
    }

    pub fn set_location(&mut self, path: &Path) {
        self.file_folder = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.set_file_name(&name);
    }

    pub fn path(&self) -> PathBuf {
        Path::new(&self.file_folder).join(&self.file_name)
    }

    pub fn album_key(&self) -> String {
        let trimmed = self.album.trim();
        if trimmed.is_empty() {
            UNKNOWN_ALBUM.to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn artists_involved(&self) -> BTreeSet<String> {
        let mut artists = split_artist_names(&self.artist);
        artists.extend(split_artist_names(&self.album_artist));
        artists
    }

    /// Bit rate as shown to users; variable bit rates carry a `~` prefix.
    pub fn bit_rate_label(&self) -> String {
        if self.is_variable_bit_rate {
            format!("~{}", self.bit_rate)
        } else {
            self.bit_rate.to_string()
        }
    }

    pub fn touch(&mut self) {
        self.date_modified = now_secs();
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.id, self.file_name)
    }
}

const ARTIST_SEPARATORS: &[&str] = &[" featuring ", " feat. ", " ft. ", " feat ", ",", "&"];

pub fn split_artist_names(value: &str) -> BTreeSet<String> {
    let mut parts = vec![value.to_string()];
    for sep in ARTIST_SEPARATORS {
        parts = parts
            .iter()
            .flat_map(|part| split_case_insensitive(part, sep))
            .collect();
    }
    parts
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

// Separators are ASCII, so a match always starts and ends on a char boundary
// of `input`.
fn split_case_insensitive(input: &str, sep: &str) -> Vec<String> {
    let bytes = input.as_bytes();
    let needle = sep.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while pos + needle.len() <= bytes.len() {
        if bytes[pos..pos + needle.len()].eq_ignore_ascii_case(needle) {
            out.push(input[start..pos].to_string());
            pos += needle.len();
            start = pos;
        } else {
            pos += 1;
        }
    }
    out.push(input[start..].to_string());
    out
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Playlist {
    pub name: String,
    pub track_ids: Vec<TrackId>,
    pub is_folder: bool,
    pub children: Vec<Playlist>,
}

impl Playlist {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn folder(name: &str, children: Vec<Playlist>) -> Self {
        Self {
            name: name.to_string(),
            is_folder: true,
            children,
            ..Default::default()
        }
    }

    /// Strips the given ids from this playlist and every nested one.
    pub fn remove_tracks(&mut self, ids: &BTreeSet<TrackId>) -> bool {
        let before = self.track_ids.len();
        self.track_ids.retain(|id| !ids.contains(id));
        let mut changed = before != self.track_ids.len();
        for child in &mut self.children {
            changed |= child.remove_tracks(ids);
        }
        changed
    }

    pub fn remove_child(&mut self, name: &str) -> bool {
        let before = self.children.len();
        self.children.retain(|child| child.name != name);
        if before != self.children.len() {
            return true;
        }
        self.children
            .iter_mut()
            .filter(|child| child.is_folder)
            .any(|child| child.remove_child(name))
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .any(|e| !e.is_empty() && e == ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_format_follows_file_name() {
        let mut track = Track::new(7);
        track.set_file_name("Song.MP3");
        assert_eq!(track.file_format(), FileFormat::Mp3);
        track.set_file_name("Song.flac");
        assert_eq!(track.file_format(), FileFormat::Flac);
        track.set_file_name("Song");
        assert_eq!(track.file_format(), FileFormat::Other);
        assert_eq!(track.id(), 7);
    }

    #[test]
    fn location_splits_folder_and_name() {
        let track = Track::with_location(1, Path::new("/music/Artist/track.m4a"));
        assert_eq!(track.file_folder, "/music/Artist");
        assert_eq!(track.file_name(), "track.m4a");
        assert_eq!(track.file_format(), FileFormat::M4a);
        assert_eq!(track.path(), PathBuf::from("/music/Artist/track.m4a"));
    }

    #[test]
    fn artists_involved_splits_collaborations() {
        let mut track = Track::new(1);
        track.artist = "Daft Punk feat. Pharrell Williams, Nile Rodgers".to_string();
        track.album_artist = "Daft Punk".to_string();
        let artists: Vec<String> = track.artists_involved().into_iter().collect();
        assert_eq!(artists, vec!["Daft Punk", "Nile Rodgers", "Pharrell Williams"]);
    }

    #[test]
    fn non_ascii_artists_split_on_char_boundaries() {
        let mut track = Track::new(1);
        track.artist = "\u{130}\u{130}&\u{212A}".to_string();
        let artists: Vec<String> = track.artists_involved().into_iter().collect();
        assert_eq!(artists, vec!["\u{130}\u{130}", "\u{212A}"]);

        let names: Vec<String> = split_artist_names("Sigur Rós FEAT. Björk").into_iter().collect();
        assert_eq!(names, vec!["Björk", "Sigur Rós"]);
    }

    #[test]
    fn variable_bit_rate_label_has_tilde() {
        let mut track = Track::new(1);
        track.bit_rate = 192;
        assert_eq!(track.bit_rate_label(), "192");
        track.is_variable_bit_rate = true;
        assert_eq!(track.bit_rate_label(), "~192");
    }

    #[test]
    fn empty_album_uses_unknown_key() {
        let track = Track::new(1);
        assert_eq!(track.album_key(), UNKNOWN_ALBUM);
    }

    #[test]
    fn playlist_removal_reaches_nested_playlists() {
        let mut inner = Playlist::new("inner");
        inner.track_ids = vec![1, 2, 3];
        let mut root = Playlist::folder("root", vec![inner]);
        let ids: BTreeSet<TrackId> = [2].into_iter().collect();
        assert!(root.remove_tracks(&ids));
        assert_eq!(root.children[0].track_ids, vec![1, 3]);
        assert!(!root.remove_tracks(&ids));
    }

    #[test]
    fn has_extension_is_case_insensitive() {
        let exts = vec!["mp3".to_string(), ".FLAC".to_string()];
        assert!(has_extension(Path::new("a.MP3"), &exts));
        assert!(has_extension(Path::new("a.flac"), &exts));
        assert!(!has_extension(Path::new("a.ogg"), &exts));
        assert!(!has_extension(Path::new("a"), &exts));
    }
}
