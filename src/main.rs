mod api;
mod config;
mod downloader;
mod errors;
mod fetcher;
mod pool;
mod security;
mod utils;
#[cfg(test)]
mod pipeline_test;

use crate::api::client::{MetadataApi, XimalayaClient};
use crate::config::{AppConfig, AudioFormat};
use crate::downloader::http::HttpTrackSource;
use crate::downloader::queue::{DownloadEvent, DownloadQueue};
use crate::downloader::DownloadOptions;
use crate::errors::{AppError, Result};
use crate::fetcher::{AlbumFetcher, FetchEvent, TrackList};
use crate::security::{validate_cookie, SecureStorage};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Concurrency used for metadata page fetches. Downloads get their own
/// independently-configured pool.
const FETCH_CONCURRENCY: usize = 4;

#[derive(Parser)]
#[command(name = "ximalaya-downloader", version, about = "Fetch Ximalaya album metadata and download selected tracks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch an album's metadata and list its tracks
    Fetch {
        album_id: u64,
        /// List tracks in descending order
        #[arg(long)]
        desc: bool,
    },
    /// Download tracks from an album
    Download {
        album_id: u64,
        /// Track selection by list position, e.g. "1,3,5-10". All tracks
        /// when omitted.
        #[arg(long)]
        tracks: Option<String>,
        /// Number of parallel downloads
        #[arg(long)]
        jobs: Option<usize>,
        /// Audio format: mp3 or m4a
        #[arg(long)]
        format: Option<AudioFormat>,
        /// Skip the numeric file name prefix
        #[arg(long)]
        no_number: bool,
        /// Download directory override
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Store the login cookie used to resolve paid-track URLs
    Login,
    /// Forget the stored login cookie
    Logout,
    /// Print the current configuration
    Config,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("Error: {}", error);
        if error.is_retryable() {
            eprintln!("This looks transient; running the same command again may succeed.");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Fetch { album_id, desc } => fetch_command(album_id, desc).await,
        Command::Download {
            album_id,
            tracks,
            jobs,
            format,
            no_number,
            dir,
        } => download_command(album_id, tracks, jobs, format, no_number, dir).await,
        Command::Login => login_command(),
        Command::Logout => logout_command(),
        Command::Config => config_command(),
    }
}

async fn fetch_command(album_id: u64, desc: bool) -> Result<()> {
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {}", e);
        AppConfig::default()
    });

    let client: Arc<dyn MetadataApi> = Arc::new(XimalayaClient::new()?);
    let list = fetch_album_tracks(client, album_id, !desc).await?;

    println!(
        "\nAlbum: {} ({} tracks, {})",
        list.album().title,
        list.album().track_count,
        list.album().album_type.as_str()
    );
    println!("{:>4}  {:>5}  {:>10}  {:>3}  Title", "#", "Time", "ID", "URL");
    for (position, track) in list.tracks().iter().enumerate() {
        println!(
            "{:>4}  {:>5}  {:>10}  {:>3}  {}",
            position + 1,
            utils::format_duration(track.duration_secs),
            track.id,
            if track.mp3_url.is_some() || track.m4a_url.is_some() {
                "yes"
            } else {
                "no"
            },
            track.title
        );
    }

    config.last_album_id = Some(album_id);
    if let Err(e) = config.save() {
        warn!("Could not persist last album id: {}", e);
    }

    Ok(())
}

async fn download_command(
    album_id: u64,
    tracks: Option<String>,
    jobs: Option<usize>,
    format: Option<AudioFormat>,
    no_number: bool,
    dir: Option<PathBuf>,
) -> Result<()> {
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {}", e);
        AppConfig::default()
    });

    let cookie = SecureStorage::new()?.get_cookie()?.unwrap_or_default();
    if cookie.is_empty() {
        info!("No login cookie stored; only freely playable tracks can be resolved");
    }

    let client: Arc<dyn MetadataApi> = Arc::new(XimalayaClient::new()?);
    let list = fetch_album_tracks(Arc::clone(&client), album_id, !config.descending_order).await?;
    if list.is_empty() {
        return Err(AppError::NotFound(format!(
            "Album {} has no fetchable tracks",
            album_id
        )));
    }

    let selection = match tracks {
        Some(selection) => parse_selection(&selection, list.len())?,
        None => (1..=list.len()).collect(),
    };

    let album_title = list.album().title.clone();
    let all_tracks = list.into_tracks();
    let selected: Vec<_> = selection
        .iter()
        .map(|&position| all_tracks[position - 1].clone())
        .collect();

    let options = DownloadOptions {
        dir: dir.unwrap_or_else(|| config.download_dir.clone()),
        format: format.unwrap_or(config.preferred_format),
        number_files: !no_number && config.number_files,
        max_concurrency: jobs.unwrap_or(config.max_concurrent_downloads).max(1),
        cookie,
    };

    let total = selected.len();
    let queue = DownloadQueue::plan(selected, &album_title, options);
    let source = Arc::new(HttpTrackSource::new()?);
    let mut events = queue.start(client, source).await?;

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::TaskState { .. } => {}
            DownloadEvent::TaskFinished {
                number,
                track_id,
                title,
                error,
            } => {
                bar.inc(1);
                match error {
                    None => bar.set_message(title),
                    Some(error) => bar.println(format!(
                        "Track {} ({}, #{}) failed: {}",
                        track_id, title, number, error
                    )),
                }
            }
            DownloadEvent::Complete { succeeded, failed } => {
                bar.finish_and_clear();
                println!("Done: {} succeeded, {} failed of {}", succeeded, failed, total);
                break;
            }
        }
    }

    config.last_album_id = Some(album_id);
    if let Err(e) = config.save() {
        warn!("Could not persist last album id: {}", e);
    }

    Ok(())
}

/// Runs one album fetch to completion and aggregates the pages into the
/// visible track list. Page results are applied here, on the control path;
/// pool workers never touch the list.
async fn fetch_album_tracks(
    client: Arc<dyn MetadataApi>,
    album_id: u64,
    ascending: bool,
) -> Result<TrackList> {
    let fetcher = AlbumFetcher::new(client, FETCH_CONCURRENCY);
    let mut events = fetcher.fetch_album(album_id, ascending);

    let mut list: Option<TrackList> = None;
    while let Some(event) = events.recv().await {
        match event {
            FetchEvent::Album(album) => {
                info!(
                    "Fetching {} tracks of album {} (\"{}\")",
                    album.track_count, album.id, album.title
                );
                list = Some(TrackList::new(album));
            }
            FetchEvent::AlbumFailed { error, .. } => return Err(error),
            FetchEvent::Page { page, result } => match result {
                Ok(tracks) => {
                    if let Some(list) = list.as_mut() {
                        list.extend_from_page(tracks);
                    }
                }
                Err(error) => {
                    eprintln!("Page {} of album {} failed: {}", page, album_id, error);
                }
            },
            FetchEvent::Complete {
                pages_fetched,
                pages_failed,
            } => {
                if pages_failed > 0 {
                    eprintln!(
                        "{} of {} pages failed; the track list is incomplete",
                        pages_failed,
                        pages_fetched + pages_failed
                    );
                }
                break;
            }
        }
    }

    list.ok_or_else(|| AppError::NotFound(format!("Album {} returned no metadata", album_id)))
}

fn login_command() -> Result<()> {
    let cookie = rpassword::prompt_password("Paste your www.ximalaya.com cookie: ")
        .map_err(|e| AppError::Validation(format!("Could not read cookie: {}", e)))?;
    validate_cookie(&cookie)?;

    SecureStorage::new()?.store_cookie(cookie.trim())?;
    println!("Cookie stored.");
    Ok(())
}

fn logout_command() -> Result<()> {
    SecureStorage::new()?.clear_cookie()?;
    println!("Cookie cleared.");
    Ok(())
}

fn config_command() -> Result<()> {
    let config = AppConfig::load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Parses a 1-based selection like "1,3,5-10" against a list of `max`
/// entries. Order is preserved and duplicates are dropped.
fn parse_selection(selection: &str, max: usize) -> Result<Vec<usize>> {
    let mut picked = Vec::new();
    let mut seen = HashSet::new();

    for part in selection.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (parse_position(start)?, parse_position(end)?),
            None => {
                let position = parse_position(part)?;
                (position, position)
            }
        };

        if start == 0 || start > end || end > max {
            return Err(AppError::Validation(format!(
                "Selection \"{}\" is out of range (1..={})",
                part, max
            )));
        }

        for position in start..=end {
            if seen.insert(position) {
                picked.push(position);
            }
        }
    }

    if picked.is_empty() {
        return Err(AppError::Validation("Selection is empty".to_string()));
    }

    Ok(picked)
}

fn parse_position(text: &str) -> Result<usize> {
    text.trim()
        .parse::<usize>()
        .map_err(|_| AppError::Validation(format!("\"{}\" is not a track position", text)))
}
