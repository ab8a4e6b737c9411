use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use common::FileFormat;
use lofty::config::ParseOptions;
use lofty::file::TaggedFile;
use lofty::mp4::{Mp4Codec, Mp4File};
use lofty::prelude::{AudioFile, TaggedFileExt};
use lofty::tag::{Tag, TagType};

use crate::{AudioProperties, MetadataError, ParsedTags, TagFields};

/// Reads tags and audio properties for one container format.
pub trait TagReader: Send + Sync {
    fn format(&self) -> FileFormat;

    fn read(&self, path: &Path) -> Result<ParsedTags, MetadataError>;
}

pub fn reader_for(format: FileFormat) -> Option<&'static dyn TagReader> {
    match format {
        FileFormat::Mp3 => Some(&Mp3Reader),
        FileFormat::M4a => Some(&Mp4Reader),
        FileFormat::Flac => Some(&FlacReader),
        FileFormat::Wav => Some(&WavReader),
        FileFormat::Other => None,
    }
}

pub struct Mp3Reader;
pub struct Mp4Reader;
pub struct FlacReader;
pub struct WavReader;

impl TagReader for Mp3Reader {
    fn format(&self) -> FileFormat {
        FileFormat::Mp3
    }

    // ID3v2 wins over ID3v1; with neither the file name becomes the title.
    fn read(&self, path: &Path) -> Result<ParsedTags, MetadataError> {
        let tagged = lofty::read_from_path(path)?;
        let tag = tagged
            .tag(TagType::Id3v2)
            .or_else(|| tagged.tag(TagType::Id3v1));
        let fields = fields_or_file_name(tag, path);
        let mut properties = properties(&tagged, "MPEG-1 Layer 3");
        properties.variable_bit_rate = has_vbr_header(path)?;
        Ok(ParsedTags { fields, properties })
    }
}

impl TagReader for Mp4Reader {
    fn format(&self) -> FileFormat {
        FileFormat::M4a
    }

    fn read(&self, path: &Path) -> Result<ParsedTags, MetadataError> {
        let mut file = File::open(path)?;
        let mp4 = Mp4File::read_from(&mut file, ParseOptions::new())?;
        ensure_aac(mp4.properties().codec(), path)?;

        let tagged = lofty::read_from_path(path)?;
        let tag = tagged
            .tag(TagType::Mp4Ilst)
            .or_else(|| tagged.primary_tag());
        let fields = tag.map(TagFields::from_tag).unwrap_or_default();
        Ok(ParsedTags {
            fields,
            properties: properties(&tagged, "AAC"),
        })
    }
}

fn ensure_aac(codec: &Mp4Codec, path: &Path) -> Result<(), MetadataError> {
    if matches!(codec, Mp4Codec::AAC) {
        Ok(())
    } else {
        Err(MetadataError::Unsupported(format!(
            "{} is not AAC encoded",
            path.display()
        )))
    }
}

impl TagReader for FlacReader {
    fn format(&self) -> FileFormat {
        FileFormat::Flac
    }

    fn read(&self, path: &Path) -> Result<ParsedTags, MetadataError> {
        let tagged = lofty::read_from_path(path)?;
        let tag = tagged
            .tag(TagType::VorbisComments)
            .or_else(|| tagged.first_tag());
        let fields = tag.map(TagFields::from_tag).unwrap_or_default();
        Ok(ParsedTags {
            fields,
            properties: properties(&tagged, "FLAC"),
        })
    }
}

impl TagReader for WavReader {
    fn format(&self) -> FileFormat {
        FileFormat::Wav
    }

    fn read(&self, path: &Path) -> Result<ParsedTags, MetadataError> {
        let tagged = lofty::read_from_path(path)?;
        let tag = tagged
            .tag(TagType::Id3v2)
            .or_else(|| tagged.tag(TagType::RiffInfo));
        let fields = fields_or_file_name(tag, path);
        Ok(ParsedTags {
            fields,
            properties: properties(&tagged, "PCM"),
        })
    }
}

fn fields_or_file_name(tag: Option<&Tag>, path: &Path) -> TagFields {
    let mut fields = tag.map(TagFields::from_tag).unwrap_or_default();
    let untitled = fields.name.as_deref().map(str::is_empty).unwrap_or(true);
    if tag.is_none() || untitled {
        fields.name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());
    }
    fields
}

const ID3V2_HEADER_LEN: u64 = 10;
const FRAME_SCAN_BYTES: u64 = 4096;
// Xing follows the side info (at most 32 bytes after the 4 byte header); VBRI
// sits at a fixed offset of 36.
const VBR_TAG_WINDOW: usize = 40;

/// Xing and VBRI frames mark variable bit rate streams; "Info" is the CBR form.
/// Only the first MPEG frame after any ID3v2 tag is inspected.
fn has_vbr_header(path: &Path) -> Result<bool, MetadataError> {
    let mut file = File::open(path)?;
    let mut header = Vec::new();
    (&mut file).take(ID3V2_HEADER_LEN).read_to_end(&mut header)?;
    let audio_start = id3v2_len(&header).unwrap_or(0);
    file.seek(SeekFrom::Start(audio_start))?;

    let mut head = Vec::new();
    file.take(FRAME_SCAN_BYTES).read_to_end(&mut head)?;
    let sync = head
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] & 0xE0 == 0xE0);
    let frame = match sync {
        Some(start) => &head[start..],
        None => return Ok(false),
    };
    let window = &frame[..frame.len().min(VBR_TAG_WINDOW + 4)];
    Ok(window.windows(4).any(|w| w == b"Xing" || w == b"VBRI"))
}

/// Total length of a leading ID3v2 tag, footer included.
fn id3v2_len(header: &[u8]) -> Option<u64> {
    if header.len() < ID3V2_HEADER_LEN as usize || &header[..3] != b"ID3" {
        return None;
    }
    let size = header[6..10]
        .iter()
        .fold(0u64, |acc, byte| (acc << 7) | u64::from(byte & 0x7F));
    let footer = if header[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };
    Some(ID3V2_HEADER_LEN + size + footer)
}

fn properties(tagged: &TaggedFile, encoding: &str) -> AudioProperties {
    let props = tagged.properties();
    AudioProperties {
        duration_ms: props.duration().as_millis() as u64,
        bit_rate: props
            .audio_bitrate()
            .or_else(|| props.overall_bitrate())
            .unwrap_or(0),
        variable_bit_rate: false,
        encoding: encoding.to_string(),
    }
}
