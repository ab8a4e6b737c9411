use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use common::{Playlist, Track, TrackId};
use library::Library;
use metadata::{find_folder_cover, read_tags};
use plist::{Dictionary, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::TaskError;
use crate::events::{ImportReport, JobKind, JobState, TaskEvent};
use crate::parser::TrackParser;

const XML_PREAMBLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const PLIST_DOCTYPE: &str = r#"<!DOCTYPE plist PUBLIC "-//Apple Computer//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#;
const MASTER_PLAYLIST: &str = "####!####";
const IMPORTABLE_EXTENSIONS: [&str; 3] = ["mp3", "m4a", "wav"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItunesPolicy {
    Metadata,
    #[default]
    ItunesData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItunesOptions {
    pub policy: ItunesPolicy,
    pub import_playlists: bool,
    pub keep_play_count: bool,
}

impl Default for ItunesOptions {
    fn default() -> Self {
        Self {
            policy: ItunesPolicy::ItunesData,
            import_playlists: false,
            keep_play_count: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItunesTrack {
    pub itunes_id: i64,
    pub track_type: String,
    pub location: Option<PathBuf>,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub genre: String,
    pub grouping: String,
    pub bpm: i64,
    pub disc_number: i64,
    pub track_number: i64,
    pub year: i64,
    pub size: i64,
    pub total_time: i64,
    pub play_count: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItunesPlaylist {
    pub name: String,
    pub persistent_id: String,
    pub parent_persistent_id: Option<String>,
    pub is_folder: bool,
    pub all_items: bool,
    pub items: Vec<i64>,
}

#[derive(Debug, Default)]
pub struct ItunesLibrary {
    pub tracks: Vec<ItunesTrack>,
    pub playlists: Vec<ItunesPlaylist>,
}

/// Checks the first two lines for the XML preamble or the Apple plist doctype.
pub fn is_valid_itunes_xml(path: &Path) -> std::io::Result<bool> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();
    let first = lines.next().transpose()?.unwrap_or_default();
    let second = lines.next().transpose()?.unwrap_or_default();
    Ok(first.contains(XML_PREAMBLE) || second.contains(PLIST_DOCTYPE))
}

pub fn read_itunes_library(path: &Path) -> Result<ItunesLibrary, TaskError> {
    let root = Value::from_file(path)?;
    let root = root
        .as_dictionary()
        .ok_or_else(|| TaskError::InvalidItunesLibrary(path.to_path_buf()))?;

    let mut library = ItunesLibrary::default();
    if let Some(tracks) = root.get("Tracks").and_then(Value::as_dictionary) {
        for (_, value) in tracks.iter() {
            if let Some(dict) = value.as_dictionary() {
                library.tracks.push(track_from_dict(dict));
            }
        }
    }
    library.tracks.sort_by_key(|t| t.itunes_id);
    if let Some(playlists) = root.get("Playlists").and_then(Value::as_array) {
        library.playlists = playlists
            .iter()
            .filter_map(Value::as_dictionary)
            .map(playlist_from_dict)
            .collect();
    }
    Ok(library)
}

fn text(dict: &Dictionary, key: &str) -> String {
    dict.get(key)
        .and_then(Value::as_string)
        .unwrap_or_default()
        .to_string()
}

fn int(dict: &Dictionary, key: &str) -> i64 {
    dict.get(key)
        .and_then(|v| {
            v.as_signed_integer()
                .or_else(|| v.as_unsigned_integer().map(|u| u as i64))
        })
        .unwrap_or(0)
}

fn flag(dict: &Dictionary, key: &str) -> bool {
    dict.get(key).and_then(Value::as_boolean).unwrap_or(false)
}

fn track_from_dict(dict: &Dictionary) -> ItunesTrack {
    let location = dict
        .get("Location")
        .and_then(Value::as_string)
        .and_then(location_to_path);
    ItunesTrack {
        itunes_id: int(dict, "Track ID"),
        track_type: text(dict, "Track Type"),
        location,
        name: text(dict, "Name"),
        artist: text(dict, "Artist"),
        album: text(dict, "Album"),
        album_artist: text(dict, "Album Artist"),
        genre: text(dict, "Genre"),
        grouping: text(dict, "Grouping"),
        bpm: int(dict, "BPM"),
        disc_number: int(dict, "Disc Number"),
        track_number: int(dict, "Track Number"),
        year: int(dict, "Year"),
        size: int(dict, "Size"),
        total_time: int(dict, "Total Time"),
        play_count: int(dict, "Play Count"),
    }
}

fn playlist_from_dict(dict: &Dictionary) -> ItunesPlaylist {
    let items = dict
        .get("Playlist Items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_dictionary)
                .map(|item| int(item, "Track ID"))
                .filter(|id| *id > 0)
                .collect()
        })
        .unwrap_or_default();
    let parent = text(dict, "Parent Persistent ID");
    ItunesPlaylist {
        name: text(dict, "Name"),
        persistent_id: text(dict, "Playlist Persistent ID"),
        parent_persistent_id: if parent.is_empty() { None } else { Some(parent) },
        is_folder: flag(dict, "Folder"),
        all_items: flag(dict, "All Items"),
        items,
    }
}

fn location_to_path(location: &str) -> Option<PathBuf> {
    match url::Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        Ok(_) => None,
        Err(err) => {
            debug!("Unreadable iTunes location {:?}: {}", location, err);
            None
        }
    }
}

pub fn is_importable_track(track: &ItunesTrack) -> bool {
    if track.track_type == "URL" || track.track_type == "Remote" {
        return false;
    }
    let ext = track
        .location
        .as_ref()
        .and_then(|p| p.extension())
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    matches!(ext, Some(ext) if IMPORTABLE_EXTENSIONS.contains(&ext.as_str()))
}

fn is_importable_playlist(playlist: &ItunesPlaylist) -> bool {
    playlist.name != MASTER_PLAYLIST && playlist.all_items && !playlist.items.is_empty()
}

fn clamp_u16(value: i64) -> u16 {
    if value < 1 {
        0
    } else {
        value.min(u16::MAX as i64) as u16
    }
}

/// Builds a track from the iTunes entry, then reads the file for the
/// technical fields. A failed read is only logged.
pub fn convert_itunes_data(id: TrackId, entry: &ItunesTrack, path: &Path, keep_play_count: bool) -> Track {
    let mut track = Track::with_location(id, path);
    track.name = entry.name.clone();
    track.artist = entry.artist.clone();
    track.album = entry.album.clone();
    track.album_artist = entry.album_artist.clone();
    track.genre = entry.genre.clone();
    track.label = entry.grouping.clone();
    track.bpm = clamp_u16(entry.bpm);
    track.disc_number = clamp_u16(entry.disc_number);
    track.track_number = clamp_u16(entry.track_number);
    track.year = clamp_u16(entry.year);
    track.size = entry.size.max(0) as u64;
    track.duration_ms = entry.total_time.max(0) as u64;
    track.is_compilation = false;
    track.in_disk = true;
    if keep_play_count {
        track.play_count = entry.play_count.max(0) as u32;
    }

    match read_tags(path) {
        Ok(parsed) => {
            track.encoding = parsed.properties.encoding;
            track.encoder = parsed.fields.encoder.unwrap_or_default();
            track.bit_rate = parsed.properties.bit_rate;
            track.is_variable_bit_rate = parsed.properties.variable_bit_rate;
            track.has_cover = parsed.fields.has_embedded_cover;
        }
        Err(err) => warn!("Could not read audio properties of {:?}: {}", path, err),
    }
    if !track.has_cover {
        track.has_cover = find_folder_cover(Path::new(&track.file_folder)).is_some();
    }
    track
}

pub(crate) fn run_import(
    xml: &Path,
    options: ItunesOptions,
    library: &Library,
    parser: &dyn TrackParser,
    token: &CancellationToken,
    progress: &mut dyn FnMut(TaskEvent),
) -> ImportReport {
    let mut report = ImportReport::new(JobKind::Itunes, false);
    progress(TaskEvent::Status("Reading iTunes library".to_string()));
    let itunes = match read_itunes_library(xml) {
        Ok(itunes) => itunes,
        Err(err) => {
            warn!("Failed to read iTunes library {:?}: {}", xml, err);
            return ImportReport::failed(JobKind::Itunes, false, err.to_string());
        }
    };

    let entries: Vec<&ItunesTrack> = itunes.tracks.iter().filter(|t| is_importable_track(t)).collect();
    report.total = entries.len();
    info!(
        "iTunes library has {} importable tracks of {}",
        entries.len(),
        itunes.tracks.len()
    );
    progress(TaskEvent::Status(format!("Importing {} tracks", entries.len())));

    let mut id_map: HashMap<i64, TrackId> = HashMap::new();
    let mut batch: HashMap<PathBuf, TrackId> = HashMap::new();
    let mut tracks = Vec::new();
    let mut processed = 0;
    report.state = JobState::Succeeded;
    for entry in entries {
        if token.is_cancelled() {
            report.state = JobState::Cancelled;
            break;
        }
        processed += 1;
        let path = match &entry.location {
            Some(path) if path.exists() => path.clone(),
            Some(path) => {
                report.not_found.push(path.clone());
                progress(TaskEvent::Progress { processed, total: report.total });
                continue;
            }
            None => continue,
        };
        if let Some(id) = batch.get(&path) {
            debug!("{:?} is listed more than once in the iTunes library", path);
            id_map.insert(entry.itunes_id, *id);
            progress(TaskEvent::Progress { processed, total: report.total });
            continue;
        }
        let existing = library.find_by_path(&path);
        let id = existing
            .as_ref()
            .map(Track::id)
            .unwrap_or_else(|| library.next_track_id());
        let converted = match options.policy {
            ItunesPolicy::ItunesData => Ok(convert_itunes_data(id, entry, &path, options.keep_play_count)),
            ItunesPolicy::Metadata => parser.parse(id, &path).map(|mut track| {
                if options.keep_play_count {
                    track.play_count = entry.play_count.max(0) as u32;
                }
                track
            }),
        };
        match converted {
            Ok(mut track) => {
                if let Some(existing) = &existing {
                    track.date_added = existing.date_added;
                    if !options.keep_play_count {
                        track.play_count = existing.play_count;
                    }
                }
                id_map.insert(entry.itunes_id, track.id());
                batch.insert(path, track.id());
                tracks.push(track);
            }
            Err(err) => {
                warn!("Failed to read tags for {:?}: {}", path, err.cause);
                report.errors.push(err);
            }
        }
        progress(TaskEvent::Progress { processed, total: report.total });
    }

    if !report.not_found.is_empty() {
        warn!("{} iTunes tracks not found on disk", report.not_found.len());
    }
    report.track_ids = library.add_tracks(tracks);

    if options.import_playlists && report.state == JobState::Succeeded {
        let playlists = build_playlists(&itunes.playlists, &id_map);
        report.playlists = playlists.len();
        for playlist in playlists {
            library.add_playlist(playlist);
        }
    }
    report
}

/// Maps iTunes playlists onto library playlists. Folders keep only their
/// importable children; track ids without a mapping are dropped.
pub fn build_playlists(playlists: &[ItunesPlaylist], id_map: &HashMap<i64, TrackId>) -> Vec<Playlist> {
    fn build(
        parent: Option<&str>,
        playlists: &[ItunesPlaylist],
        id_map: &HashMap<i64, TrackId>,
    ) -> Vec<Playlist> {
        let mut out = Vec::new();
        for itunes in playlists
            .iter()
            .filter(|p| p.parent_persistent_id.as_deref() == parent)
        {
            if itunes.is_folder {
                let children = build(Some(itunes.persistent_id.as_str()), playlists, id_map);
                if !children.is_empty() {
                    out.push(Playlist::folder(&itunes.name, children));
                }
            } else if is_importable_playlist(itunes) {
                let mut playlist = Playlist::new(&itunes.name);
                playlist.track_ids = itunes
                    .items
                    .iter()
                    .filter_map(|id| id_map.get(id).copied())
                    .collect();
                if !playlist.track_ids.is_empty() {
                    out.push(playlist);
                }
            }
        }
        out
    }
    build(None, playlists, id_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::tests::PathParser;
    use std::fs;
    use tempfile::tempdir;

    fn library_xml(music: &Path) -> String {
        let location = |name: &str| {
            url::Url::from_file_path(music.join(name))
                .unwrap()
                .to_string()
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple Computer//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>Tracks</key>
	<dict>
		<key>100</key>
		<dict>
			<key>Track ID</key><integer>100</integer>
			<key>Name</key><string>So What</string>
			<key>Artist</key><string>Miles Davis</string>
			<key>Album</key><string>Kind of Blue</string>
			<key>Grouping</key><string>Modal</string>
			<key>Year</key><integer>1959</integer>
			<key>Track Number</key><integer>1</integer>
			<key>Disc Number</key><integer>0</integer>
			<key>Play Count</key><integer>7</integer>
			<key>Total Time</key><integer>545000</integer>
			<key>Track Type</key><string>File</string>
			<key>Location</key><string>{present}</string>
		</dict>
		<key>200</key>
		<dict>
			<key>Track ID</key><integer>200</integer>
			<key>Name</key><string>Gone</string>
			<key>Track Type</key><string>File</string>
			<key>Location</key><string>{missing}</string>
		</dict>
		<key>300</key>
		<dict>
			<key>Track ID</key><integer>300</integer>
			<key>Name</key><string>Stream</string>
			<key>Track Type</key><string>URL</string>
			<key>Location</key><string>http://radio.example/stream.mp3</string>
		</dict>
		<key>400</key>
		<dict>
			<key>Track ID</key><integer>400</integer>
			<key>Name</key><string>Lossless</string>
			<key>Track Type</key><string>File</string>
			<key>Location</key><string>{flac}</string>
		</dict>
	</dict>
	<key>Playlists</key>
	<array>
		<dict>
			<key>Name</key><string>####!####</string>
			<key>Master</key><true/>
			<key>All Items</key><true/>
			<key>Playlist Persistent ID</key><string>M</string>
			<key>Playlist Items</key>
			<array><dict><key>Track ID</key><integer>100</integer></dict></array>
		</dict>
		<dict>
			<key>Name</key><string>Jazz</string>
			<key>Folder</key><true/>
			<key>All Items</key><true/>
			<key>Playlist Persistent ID</key><string>F1</string>
		</dict>
		<dict>
			<key>Name</key><string>Favourites</string>
			<key>All Items</key><true/>
			<key>Playlist Persistent ID</key><string>P1</string>
			<key>Parent Persistent ID</key><string>F1</string>
			<key>Playlist Items</key>
			<array>
				<dict><key>Track ID</key><integer>100</integer></dict>
				<dict><key>Track ID</key><integer>200</integer></dict>
			</array>
		</dict>
		<dict>
			<key>Name</key><string>Empty</string>
			<key>All Items</key><true/>
			<key>Playlist Persistent ID</key><string>P2</string>
		</dict>
	</array>
</dict>
</plist>
"#,
            present = location("so what.mp3"),
            missing = location("gone.mp3"),
            flac = location("lossless.flac"),
        )
    }

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("so what.mp3"), b"not really audio").unwrap();
        fs::write(dir.path().join("lossless.flac"), b"").unwrap();
        let xml = dir.path().join("Music Library.xml");
        fs::write(&xml, library_xml(dir.path())).unwrap();
        (dir, xml)
    }

    #[test]
    fn validation_accepts_either_header_line() {
        let dir = tempdir().unwrap();
        let only_doctype = dir.path().join("a.xml");
        fs::write(&only_doctype, format!("<?xml version=\"1.0\"?>\n{}\n", PLIST_DOCTYPE)).unwrap();
        assert!(is_valid_itunes_xml(&only_doctype).unwrap());

        let only_preamble = dir.path().join("b.xml");
        fs::write(&only_preamble, format!("{}\n<plist>\n", XML_PREAMBLE)).unwrap();
        assert!(is_valid_itunes_xml(&only_preamble).unwrap());

        let neither = dir.path().join("c.xml");
        fs::write(&neither, "hello\nworld\n").unwrap();
        assert!(!is_valid_itunes_xml(&neither).unwrap());
    }

    #[test]
    fn reads_tracks_and_playlists() {
        let (_dir, xml) = fixture();
        let itunes = read_itunes_library(&xml).unwrap();
        assert_eq!(itunes.tracks.len(), 4);
        assert_eq!(itunes.tracks[0].name, "So What");
        assert_eq!(itunes.tracks[0].grouping, "Modal");
        assert!(is_importable_track(&itunes.tracks[0]));
        assert!(!is_importable_track(&itunes.tracks[2]));
        assert!(!is_importable_track(&itunes.tracks[3]));
        assert_eq!(itunes.playlists.len(), 4);
        assert_eq!(itunes.playlists[2].parent_persistent_id.as_deref(), Some("F1"));
    }

    #[test]
    fn itunes_data_policy_keeps_itunes_fields() {
        let (dir, xml) = fixture();
        let library = Library::new(0);
        let options = ItunesOptions {
            policy: ItunesPolicy::ItunesData,
            import_playlists: true,
            keep_play_count: true,
        };
        let report = run_import(
            &xml,
            options,
            &library,
            &PathParser,
            &CancellationToken::new(),
            &mut |_: TaskEvent| {},
        );

        assert_eq!(report.state, JobState::Succeeded);
        assert_eq!(report.total, 2);
        assert_eq!(report.track_ids, vec![1]);
        assert_eq!(report.not_found, vec![dir.path().join("gone.mp3")]);
        let track = library.get_track(1).unwrap();
        assert_eq!(track.name, "So What");
        assert_eq!(track.label, "Modal");
        assert_eq!(track.year, 1959);
        assert_eq!(track.disc_number, 0);
        assert_eq!(track.play_count, 7);
        assert_eq!(track.duration_ms, 545_000);
        assert!(!track.is_compilation);

        assert_eq!(report.playlists, 1);
        let playlists = library.playlists();
        assert_eq!(playlists[0].name, "Jazz");
        assert!(playlists[0].is_folder);
        assert_eq!(playlists[0].children[0].track_ids, vec![1]);
    }

    #[test]
    fn metadata_policy_reads_the_file_and_can_drop_play_count() {
        let (_dir, xml) = fixture();
        let library = Library::new(0);
        let options = ItunesOptions {
            policy: ItunesPolicy::Metadata,
            import_playlists: false,
            keep_play_count: false,
        };
        let report = run_import(
            &xml,
            options,
            &library,
            &PathParser,
            &CancellationToken::new(),
            &mut |_: TaskEvent| {},
        );
        assert_eq!(report.track_ids.len(), 1);
        let track = library.get_track(report.track_ids[0]).unwrap();
        assert_eq!(track.name, "so what");
        assert_eq!(track.play_count, 0);
        assert!(library.playlists().is_empty());
    }

    #[test]
    fn unreadable_library_fails_the_job() {
        let dir = tempdir().unwrap();
        let xml = dir.path().join("broken.xml");
        fs::write(&xml, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist><dict>").unwrap();
        let report = run_import(
            &xml,
            ItunesOptions::default(),
            &Library::new(0),
            &PathParser,
            &CancellationToken::new(),
            &mut |_: TaskEvent| {},
        );
        assert_eq!(report.state, JobState::Failed);
        assert!(report.failure.is_some());
    }

    #[test]
    fn negative_and_zero_numbers_clamp_to_zero() {
        assert_eq!(clamp_u16(-4), 0);
        assert_eq!(clamp_u16(0), 0);
        assert_eq!(clamp_u16(12), 12);
        assert_eq!(clamp_u16(1_000_000), u16::MAX);
    }

    #[test]
    fn known_path_keeps_date_added_and_stored_play_count() {
        let (dir, xml) = fixture();
        let library = Library::new(0);
        let mut known = Track::with_location(9, &dir.path().join("so what.mp3"));
        known.date_added = 1_234;
        known.play_count = 40;
        library.add_tracks(vec![known]);

        let options = ItunesOptions {
            policy: ItunesPolicy::ItunesData,
            import_playlists: false,
            keep_play_count: false,
        };
        let report = run_import(
            &xml,
            options,
            &library,
            &PathParser,
            &CancellationToken::new(),
            &mut |_: TaskEvent| {},
        );
        assert_eq!(report.track_ids, vec![9]);
        let track = library.get_track(9).unwrap();
        assert_eq!(track.name, "So What");
        assert_eq!(track.date_added, 1_234);
        assert_eq!(track.play_count, 40);
        assert_eq!(library.track_count(), 1);
    }

    #[test]
    fn shared_location_becomes_one_track() {
        let dir = tempdir().unwrap();
        let song = dir.path().join("twice.mp3");
        fs::write(&song, b"").unwrap();
        let location = url::Url::from_file_path(&song).unwrap().to_string();
        let xml = dir.path().join("Music Library.xml");
        fs::write(
            &xml,
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>Tracks</key>
	<dict>
		<key>1</key>
		<dict>
			<key>Track ID</key><integer>1</integer>
			<key>Name</key><string>Twice</string>
			<key>Track Type</key><string>File</string>
			<key>Location</key><string>{location}</string>
		</dict>
		<key>2</key>
		<dict>
			<key>Track ID</key><integer>2</integer>
			<key>Name</key><string>Twice again</string>
			<key>Track Type</key><string>File</string>
			<key>Location</key><string>{location}</string>
		</dict>
	</dict>
	<key>Playlists</key>
	<array>
		<dict>
			<key>Name</key><string>Repeat</string>
			<key>All Items</key><true/>
			<key>Playlist Persistent ID</key><string>R</string>
			<key>Playlist Items</key>
			<array><dict><key>Track ID</key><integer>2</integer></dict></array>
		</dict>
	</array>
</dict>
</plist>
"#
            ),
        )
        .unwrap();

        let library = Library::new(0);
        let options = ItunesOptions {
            import_playlists: true,
            ..ItunesOptions::default()
        };
        let report = run_import(
            &xml,
            options,
            &library,
            &PathParser,
            &CancellationToken::new(),
            &mut |_: TaskEvent| {},
        );
        assert_eq!(report.total, 2);
        assert_eq!(report.track_ids, vec![1]);
        assert_eq!(library.track_count(), 1);
        assert_eq!(library.get_track(1).unwrap().name, "Twice");
        assert_eq!(library.playlists()[0].track_ids, vec![1]);
    }
}
