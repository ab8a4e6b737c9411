use std::env;
use std::path::PathBuf;

use library::Library;
use tasks::{collect_audio_files, TagParser, TrackParser};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let folder = args
        .next()
        .or_else(|| env::var("MUSIC_FOLDER").ok())
        .ok_or("MUSIC_FOLDER not set and no path argument")?;
    let extensions: Vec<String> = match args.next() {
        Some(list) => list.split(',').map(|ext| ext.trim().to_string()).collect(),
        None => vec!["mp3".to_string()],
    };

    let files = collect_audio_files(&PathBuf::from(&folder), &extensions);
    // Ids come from a throwaway library so nothing is persisted.
    let library = Library::new(0);
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    for file in &files {
        match TagParser.parse(library.next_track_id(), file) {
            Ok(track) => parsed.push(track),
            Err(err) => errors.push(err),
        }
    }
    library.add_tracks(parsed);
    let stats = library.stats();

    println!(
        "Parsed {} of {} files: {} artists, {} albums",
        stats.tracks,
        files.len(),
        stats.artists,
        stats.albums
    );
    for err in &errors {
        println!("  {}", err);
    }

    Ok(())
}
