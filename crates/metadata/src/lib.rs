mod cover;
mod readers;
mod writer;

use std::path::{Path, PathBuf};

use common::{FileFormat, Track};
use lofty::error::LoftyError;
use lofty::prelude::ItemKey;
use lofty::tag::Tag;

pub use cover::{find_folder_cover, read_cover, CoverArt, FOLDER_COVERS};
pub use readers::{reader_for, FlacReader, Mp3Reader, Mp4Reader, TagReader, WavReader};
pub use writer::{write_tags, WriteMetadataError};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagFields {
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub comments: Option<String>,
    pub label: Option<String>,
    pub encoder: Option<String>,
    pub is_compilation: bool,
    pub track_number: u16,
    pub disc_number: u16,
    pub year: u16,
    pub bpm: u16,
    pub has_embedded_cover: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AudioProperties {
    pub duration_ms: u64,
    pub bit_rate: u32,
    pub variable_bit_rate: bool,
    pub encoding: String,
}

#[derive(Debug, Default, Clone)]
pub struct ParsedTags {
    pub fields: TagFields,
    pub properties: AudioProperties,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Unsupported(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Unsupported(what) => write!(f, "unsupported: {}", what),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// A file that could not be turned into a track.
#[derive(Debug)]
pub struct ParseError {
    pub path: PathBuf,
    pub cause: MetadataError,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error parsing {}: {}", self.path.display(), self.cause)
    }
}

impl std::error::Error for ParseError {}

pub fn read_tags(path: &Path) -> Result<ParsedTags, MetadataError> {
    let format = FileFormat::from_path(path);
    let reader = reader_for(format).ok_or_else(|| {
        MetadataError::Unsupported(format!("file extension of {}", path.display()))
    })?;
    reader.read(path)
}

/// Builds a new track with the given id from the file at `path`.
pub fn parse_track(id: u32, path: &Path) -> Result<Track, ParseError> {
    let to_error = |cause: MetadataError| ParseError {
        path: path.to_path_buf(),
        cause,
    };
    let parsed = read_tags(path).map_err(to_error)?;
    let size = std::fs::metadata(path)
        .map_err(|err| to_error(err.into()))?
        .len();

    let mut track = Track::with_location(id, path);
    track.in_disk = true;
    track.size = size;
    parsed.fields.apply_to(&mut track);
    track.duration_ms = parsed.properties.duration_ms;
    track.bit_rate = parsed.properties.bit_rate;
    track.is_variable_bit_rate = parsed.properties.variable_bit_rate;
    track.encoding = parsed.properties.encoding;
    if !track.has_cover {
        track.has_cover = find_folder_cover(Path::new(&track.file_folder)).is_some();
    }
    Ok(track)
}

impl TagFields {
    pub fn from_tag(tag: &Tag) -> Self {
        let mut fields = TagFields {
            name: text(tag, &ItemKey::TrackTitle),
            artist: text(tag, &ItemKey::TrackArtist),
            album: text(tag, &ItemKey::AlbumTitle),
            album_artist: text(tag, &ItemKey::AlbumArtist),
            genre: first_non_empty(tag, &ItemKey::Genre),
            comments: text(tag, &ItemKey::Comment),
            label: text(tag, &ItemKey::ContentGroup),
            encoder: text(tag, &ItemKey::EncoderSoftware),
            ..Default::default()
        };
        fields.is_compilation = tag
            .get_string(&ItemKey::FlagCompilation)
            .map(parse_flag)
            .unwrap_or(false);
        fields.track_number = lenient_u16(tag.get_string(&ItemKey::TrackNumber));
        fields.disc_number = lenient_u16(tag.get_string(&ItemKey::DiscNumber));
        fields.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year)
            .unwrap_or(0);
        fields.bpm = lenient_u16(
            tag.get_string(&ItemKey::Bpm)
                .or_else(|| tag.get_string(&ItemKey::IntegerBpm)),
        );
        fields.has_embedded_cover = !tag.pictures().is_empty();
        fields
    }

    pub fn from_track(track: &Track) -> Self {
        let opt = |value: &str| Some(value.to_string());
        TagFields {
            name: opt(&track.name),
            artist: opt(&track.artist),
            album: opt(&track.album),
            album_artist: opt(&track.album_artist),
            genre: opt(&track.genre),
            comments: opt(&track.comments),
            label: opt(&track.label),
            encoder: None,
            is_compilation: track.is_compilation,
            track_number: track.track_number,
            disc_number: track.disc_number,
            year: track.year,
            bpm: track.bpm,
            has_embedded_cover: track.has_cover,
        }
    }

    pub fn apply_to(&self, track: &mut Track) {
        let set = |target: &mut String, value: &Option<String>| {
            if let Some(value) = value {
                *target = value.clone();
            }
        };
        set(&mut track.name, &self.name);
        set(&mut track.artist, &self.artist);
        set(&mut track.album, &self.album);
        set(&mut track.album_artist, &self.album_artist);
        set(&mut track.genre, &self.genre);
        set(&mut track.comments, &self.comments);
        set(&mut track.label, &self.label);
        set(&mut track.encoder, &self.encoder);
        track.is_compilation = self.is_compilation;
        track.track_number = self.track_number;
        track.disc_number = self.disc_number;
        track.year = self.year;
        track.bpm = self.bpm;
        track.has_cover = self.has_embedded_cover;
    }
}

fn text(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key).map(|v| v.trim().to_string())
}

fn first_non_empty(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_strings(key)
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn lenient_u16(value: Option<&str>) -> u16 {
    value.and_then(parse_u16).unwrap_or(0)
}

pub(crate) fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

pub(crate) fn parse_year(text: &str) -> Option<u16> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn parse_flag(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed == "1" || trimmed.eq_ignore_ascii_case("true")
}
