//! Tubeloader - video, audio, subtitle and thumbnail downloader
//!
//! Resolves items through the public watch page or the hosted metadata API,
//! picks a stream by quality and codec preference, and downloads single
//! items or whole playlists with a bounded worker pool.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tubeloader::downloader::{ItemReport, SubtitleFormat, SubtitleRequest, TransferError};
use tubeloader::queue::PlaylistResult;
use tubeloader::{DownloadRequest, ItemDownloader, PlaylistOrchestrator, QualityConstraint, Settings};

#[derive(Parser)]
#[command(name = "tubeloader", version, about)]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download one item
    Video {
        /// Item id or URL
        identifier: String,
        #[command(flatten)]
        options: DownloadOptions,
    },
    /// Download every item of a playlist
    Playlist {
        /// Playlist id or URL
        identifier: String,
        #[command(flatten)]
        options: DownloadOptions,
        /// Concurrent downloads (1-16)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Print the resolved metadata and streams as JSON
    Info {
        identifier: String,
    },
}

#[derive(Args)]
struct DownloadOptions {
    /// best, worst, a height such as 720p, or a format id
    #[arg(short, long, default_value = "best")]
    quality: String,

    #[arg(long)]
    audio_only: bool,

    #[arg(long)]
    video_only: bool,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File name to use instead of the title (single items only)
    #[arg(long)]
    name: Option<String>,

    /// Subtitle language code
    #[arg(long)]
    subs: Option<String>,

    /// srt, vtt, xml or json
    #[arg(long, default_value = "srt")]
    sub_format: String,

    /// Take any caption track when the language has none
    #[arg(long)]
    sub_fallback: bool,

    /// Also save the thumbnail
    #[arg(long)]
    thumbnail: bool,
}

impl DownloadOptions {
    fn into_request(self, identifier: String, settings: &Settings) -> Result<DownloadRequest> {
        let subtitles = match self.subs {
            Some(language) => {
                let format: SubtitleFormat = self.sub_format.parse()?;
                Some(SubtitleRequest {
                    allow_fallback: self.sub_fallback,
                    ..SubtitleRequest::new(language, format)
                })
            }
            None => None,
        };

        Ok(DownloadRequest {
            identifier,
            quality: self.quality.parse::<QualityConstraint>()?,
            audio_only: self.audio_only,
            video_only: self.video_only,
            output_dir: self
                .output
                .unwrap_or_else(|| settings.download_location.clone()),
            filename_override: self.name,
            subtitles,
            with_thumbnail: self.thumbnail,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current chunk");
            ctrl_c.cancel();
        }
    });

    let downloader = Arc::new(ItemDownloader::from_settings(&settings, Some(cancel))?);

    match cli.command {
        Command::Video {
            identifier,
            options,
        } => {
            let request = options.into_request(identifier, &settings)?;
            let progress = |bytes: u64, total: Option<u64>| match total {
                Some(total) if total > 0 => eprint!(
                    "\r{:>6.1}% of {:.1} MB",
                    bytes as f64 * 100.0 / total as f64,
                    total as f64 / 1_048_576.0
                ),
                _ => eprint!("\r{:.1} MB", bytes as f64 / 1_048_576.0),
            };
            let report = downloader
                .download(&request, &progress)
                .await
                .map_err(|e| describe_failure(&request.identifier, &e))?;
            eprintln!();
            print_report(&report);
            if !report.is_success() {
                bail!("{} was not downloaded", report.id);
            }
        }
        Command::Playlist {
            identifier,
            options,
            workers,
        } => {
            let template = options.into_request(identifier.clone(), &settings)?;
            let workers = workers.unwrap_or(settings.max_workers);
            let orchestrator = PlaylistOrchestrator::new(downloader);
            let result = orchestrator
                .download_playlist(&identifier, &template, workers, None)
                .await
                .map_err(|e| anyhow::anyhow!("[{}] {}", e.kind(), e))?;
            print_playlist(&result);
            if result.failure_count > 0 {
                bail!("{} of {} items failed", result.failure_count, result.total);
            }
        }
        Command::Info { identifier } => {
            let catalog = downloader
                .resolver()
                .resolve(&identifier)
                .await
                .map_err(|e| anyhow::anyhow!("[{}] {}", e.kind(), e))?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
    }

    Ok(())
}

fn describe_failure(identifier: &str, e: &TransferError) -> anyhow::Error {
    match &e.format_id {
        Some(format_id) => anyhow::anyhow!("{} format {}: [{}] {}", identifier, format_id, e.kind(), e),
        None => anyhow::anyhow!("{}: [{}] {}", identifier, e.kind(), e),
    }
}

fn print_report(report: &ItemReport) {
    println!("{} ({})", report.title, report.id);
    match &report.primary {
        Ok(results) => {
            for result in results {
                println!("  saved {} ({} bytes)", result.output_path.display(), result.bytes_written);
            }
        }
        Err(e) => println!("  failed: [{}] {}", e.kind(), e),
    }
    for (label, outcome) in [("subtitle", &report.subtitle), ("thumbnail", &report.thumbnail)] {
        match outcome {
            Some(Ok(result)) => println!("  {} {}", label, result.output_path.display()),
            Some(Err(e)) => println!("  {} failed: [{}] {}", label, e.kind(), e),
            None => {}
        }
    }
}

fn print_playlist(result: &PlaylistResult) {
    println!("{} ({})", result.title, result.playlist_id);
    for (index, item) in result.items.iter().enumerate() {
        match item.error() {
            Some(e) => println!("{:>4}. {} failed: [{}] {}", index + 1, item.identifier, e.kind(), e),
            None => {
                let title = item.outcome.as_ref().map(|r| r.title.as_str()).unwrap_or_default();
                println!("{:>4}. {} {}", index + 1, item.identifier, title);
            }
        }
    }
    println!(
        "{} downloaded, {} failed, {} total",
        result.success_count, result.failure_count, result.total
    );
}
