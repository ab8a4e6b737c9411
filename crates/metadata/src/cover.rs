use std::fs;
use std::path::{Path, PathBuf};

use lofty::picture::{Picture, PictureType};
use lofty::prelude::TaggedFileExt;
use tracing::debug;

use crate::MetadataError;

/// Folder images accepted as a cover, in lookup order.
pub const FOLDER_COVERS: [&str; 3] = ["cover.jpg", "cover.jpeg", "cover.png"];

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

pub fn find_folder_cover(folder: &Path) -> Option<PathBuf> {
    FOLDER_COVERS
        .iter()
        .map(|name| folder.join(name))
        .find(|candidate| candidate.is_file())
}

/// Embedded picture first, then a cover image next to the file. An unreadable
/// tag only skips the embedded lookup.
pub fn read_cover(path: &Path) -> Result<Option<CoverArt>, MetadataError> {
    match embedded_cover(path) {
        Ok(Some(cover)) => return Ok(Some(cover)),
        Ok(None) => {}
        Err(err) => debug!("No embedded cover in {:?}: {}", path, err),
    }
    let folder = match path.parent() {
        Some(folder) => folder,
        None => return Ok(None),
    };
    match find_folder_cover(folder) {
        Some(cover_path) => {
            let data = fs::read(&cover_path)?;
            let mime = mime_guess::from_path(&cover_path)
                .first_raw()
                .map(str::to_string);
            Ok(Some(CoverArt { data, mime }))
        }
        None => Ok(None),
    }
}

fn embedded_cover(path: &Path) -> Result<Option<CoverArt>, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(None),
    };
    Ok(pick_picture(tag.pictures()).map(|picture| CoverArt {
        data: picture.data().to_vec(),
        mime: picture.mime_type().map(|mime| mime.as_str().to_string()),
    }))
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    pictures
        .iter()
        .find(|picture| picture.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
}
