use std::fs;
use std::path::Path;

use lofty::config::WriteOptions;
use lofty::prelude::{ItemKey, TagExt, TaggedFileExt};
use lofty::tag::Tag;
use tracing::warn;

use crate::{MetadataError, TagFields};

#[derive(Debug)]
pub enum WriteMetadataError {
    Backup(std::io::Error),
    Write(MetadataError),
    Restore {
        write: MetadataError,
        restore: std::io::Error,
    },
}

impl std::fmt::Display for WriteMetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMetadataError::Backup(err) => write!(f, "backup failed: {}", err),
            WriteMetadataError::Write(err) => write!(f, "write failed: {}", err),
            WriteMetadataError::Restore { write, restore } => write!(
                f,
                "write failed: {}; restoring the backup also failed: {}",
                write, restore
            ),
        }
    }
}

impl std::error::Error for WriteMetadataError {}

/// Writes `fields` into the file's tag. The file is copied aside first and put
/// back if the write fails, so a failed write leaves the original bytes.
pub fn write_tags(path: &Path, fields: &TagFields) -> Result<(), WriteMetadataError> {
    let backup = tempfile::Builder::new()
        .prefix("musicott-backup-")
        .tempfile()
        .map_err(WriteMetadataError::Backup)?;
    fs::copy(path, backup.path()).map_err(WriteMetadataError::Backup)?;

    match write_in_place(path, fields) {
        Ok(()) => Ok(()),
        Err(write) => {
            warn!("Failed to write tags for {:?}: {}", path, write);
            match fs::copy(backup.path(), path) {
                Ok(_) => Err(WriteMetadataError::Write(write)),
                Err(restore) => Err(WriteMetadataError::Restore { write, restore }),
            }
        }
    }
}

fn write_in_place(path: &Path, fields: &TagFields) -> Result<(), MetadataError> {
    let mut tagged = lofty::read_from_path(path)?;
    if tagged.primary_tag().is_none() {
        let tag_type = tagged.primary_tag_type();
        tagged.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged
        .primary_tag_mut()
        .ok_or_else(|| MetadataError::Unsupported(format!("no writable tag in {:?}", path)))?;

    set_text(tag, ItemKey::TrackTitle, fields.name.as_deref());
    set_text(tag, ItemKey::TrackArtist, fields.artist.as_deref());
    set_text(tag, ItemKey::AlbumTitle, fields.album.as_deref());
    set_text(tag, ItemKey::AlbumArtist, fields.album_artist.as_deref());
    set_text(tag, ItemKey::Genre, fields.genre.as_deref());
    set_text(tag, ItemKey::Comment, fields.comments.as_deref());
    set_text(tag, ItemKey::ContentGroup, fields.label.as_deref());
    set_number(tag, ItemKey::TrackNumber, fields.track_number);
    set_number(tag, ItemKey::DiscNumber, fields.disc_number);
    set_number(tag, ItemKey::Year, fields.year);
    set_number(tag, ItemKey::Bpm, fields.bpm);
    if fields.is_compilation {
        tag.insert_text(ItemKey::FlagCompilation, "1".to_string());
    } else {
        tag.remove_key(&ItemKey::FlagCompilation);
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

fn set_text(tag: &mut Tag, key: ItemKey, value: Option<&str>) {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => {
            tag.insert_text(key, value.to_string());
        }
        Some(_) => {
            tag.remove_key(&key);
        }
        None => {}
    }
}

fn set_number(tag: &mut Tag, key: ItemKey, value: u16) {
    if value == 0 {
        tag.remove_key(&key);
    } else {
        tag.insert_text(key, value.to_string());
    }
}
