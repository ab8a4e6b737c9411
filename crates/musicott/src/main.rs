mod config;
mod persist;
mod state;

use std::env;
use std::path::{Path, PathBuf};

use common::has_extension;
use config::{config_path_from_env, load_or_create_preferences};
use crossbeam_channel::Receiver;
use state::AppContext;
use tasks::{ImportReport, TaskEvent};
use tracing::{info, warn};

const USAGE: &str = "usage: musicott <import <folder> | files <file>... | itunes <xml> | waveform <track-id> | remove <track-id>... | stats>";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let command = args.next().ok_or(USAGE)?;
    let rest: Vec<String> = args.collect();

    let config_path = config_path_from_env();
    let (preferences, created) = load_or_create_preferences(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let ctx = AppContext::build(config_path, preferences)?;
    let result = run(&ctx, &command, &rest);
    ctx.shutdown();
    result
}

fn run(ctx: &AppContext, command: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        "import" => {
            let folder = args.first().ok_or(USAGE)?;
            let extensions = ctx.preferences.read().import_extensions.clone();
            ctx.coordinator
                .submit_folder_import(Path::new(folder), &extensions, false)?;
            print_report(&drain(&ctx.coordinator.events()));
        }
        "files" => {
            let extensions = ctx.preferences.read().import_extensions.clone();
            let (files, skipped): (Vec<PathBuf>, Vec<PathBuf>) = args
                .iter()
                .map(PathBuf::from)
                .partition(|path| has_extension(path, &extensions));
            for path in &skipped {
                warn!("Skipping {:?}: extension not in {:?}", path, extensions);
            }
            if files.is_empty() {
                return Err("no importable files given".into());
            }
            ctx.coordinator.submit_file_import(files, false)?;
            print_report(&drain(&ctx.coordinator.events()));
        }
        "itunes" => {
            let xml = args.first().ok_or(USAGE)?;
            let options = ctx.preferences.read().itunes_options();
            ctx.coordinator.submit_itunes_import(Path::new(xml), options)?;
            print_report(&drain(&ctx.coordinator.events()));
        }
        "waveform" => {
            let id: u32 = args.first().ok_or(USAGE)?.parse()?;
            let track = ctx
                .library
                .get_track(id)
                .ok_or_else(|| format!("track {} not found", id))?;
            if !ctx.waveforms.analyze(track) {
                return Err("waveform worker is not running".into());
            }
        }
        "remove" => {
            let ids = args
                .iter()
                .map(|value| value.parse::<u32>())
                .collect::<Result<Vec<_>, _>>()?;
            let removed = ctx.library.remove_tracks(&ids);
            println!("Removed {} tracks", removed.len());
        }
        "stats" => {
            let stats = ctx.library.stats();
            println!("Config {}", ctx.config_path.display());
            println!(
                "{} tracks, {} artists, {} albums, {} waveforms, {} playlists",
                stats.tracks, stats.artists, stats.albums, stats.waveforms, stats.playlists
            );
            for track in ctx.library.tracks() {
                println!(
                    "  {} {} - {} ({} kbps)",
                    track,
                    track.artist,
                    track.name,
                    track.bit_rate_label()
                );
            }
        }
        _ => return Err(USAGE.into()),
    }
    Ok(())
}

/// Presentation loop: shows progress until the job reports back.
fn drain(events: &Receiver<TaskEvent>) -> ImportReport {
    let mut last_percent = None;
    loop {
        match events.recv() {
            Ok(TaskEvent::Finished(report)) => return report,
            Ok(TaskEvent::Status(message)) => info!("{}", message),
            Ok(event) => {
                let percent = event.progress_ratio().map(|r| (r * 100.0) as u32);
                if percent.is_some() && percent != last_percent {
                    info!("Import progress {}%", percent.unwrap_or(0));
                    last_percent = percent;
                }
            }
            Err(_) => {
                return ImportReport::failed(
                    tasks::JobKind::Folder,
                    false,
                    "event channel closed".to_string(),
                )
            }
        }
    }
}

fn print_report(report: &ImportReport) {
    println!("{}", report.summary());
    for err in &report.errors {
        println!("  {}", err);
    }
    for path in &report.not_found {
        println!("  not found: {}", path.display());
    }
}
