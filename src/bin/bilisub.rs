#![forbid(unsafe_code)]

//! Command-line front end: search for popular videos, or download their
//! Chinese subtitles one at a time or in parallel batches.
//!
//! Credentials come from `bilisub.toml` (or `--config`); see the `config`
//! module for the file layout and the environment overrides.

use anyhow::{Context, Result, bail};
use bilisub_tools::batch::run_batch;
use bilisub_tools::client::BiliClient;
use bilisub_tools::config::{ConfigOverrides, resolve_config};
use bilisub_tools::fetch::fetch_subtitle;
use bilisub_tools::metadata::VideoSearchResult;
use bilisub_tools::search::search_videos;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_OUTPUT_DIR: &str = "subtitles";
const DEFAULT_MIN_PLAY: u64 = 50_000;
const DEFAULT_MAX_RESULTS: usize = 5;

#[derive(Debug, Parser)]
#[command(
    name = "bilisub",
    version,
    about = "Search Bilibili and save video subtitles as Markdown"
)]
struct Cli {
    /// Path to the TOML config holding cookies, headers and settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search videos by keyword and list the popular ones.
    Search {
        #[arg(required = true, num_args = 1..)]
        keyword: Vec<String>,
        #[arg(short = 'm', long, default_value_t = DEFAULT_MIN_PLAY)]
        min_play: u64,
        #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RESULTS)]
        max_results: usize,
        /// Number of result pages to scan at most.
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Print the results as JSON instead of a listing.
        #[arg(long)]
        json: bool,
    },
    /// Download the subtitles of a single video.
    Download {
        bvid: String,
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        output: PathBuf,
    },
    /// Download subtitles for many videos in parallel.
    Batch {
        bvids: Vec<String>,
        /// File with one video id per line (`#` starts a comment).
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        output: PathBuf,
        /// Worker threads; defaults to `max_workers` from the config.
        #[arg(short, long)]
        workers: Option<usize>,
        /// Also write the per-video outcomes as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let config = resolve_config(ConfigOverrides {
        config_path: cli.config.clone(),
    })?;
    let client = BiliClient::new(&config)?;

    match cli.command {
        Command::Search {
            keyword,
            min_play,
            max_results,
            pages,
            json,
        } => {
            let keyword = keyword.join(" ");
            let videos = search_videos(
                &client,
                &keyword,
                min_play,
                max_results,
                pages,
                config.settings.search_page_size,
            );
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&videos).context("serializing results")?
                );
            } else {
                print_search_results(&videos);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Download { bvid, output } => {
            fs::create_dir_all(&output)
                .with_context(|| format!("Creating output directory {}", output.display()))?;
            match fetch_subtitle(&client, &bvid, &output) {
                Ok(path) => {
                    println!("{bvid}: saved {}", path.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    println!("{bvid}: failed ({err})");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Batch {
            bvids,
            input,
            output,
            workers,
            report,
        } => {
            let mut video_ids = bvids;
            if let Some(path) = &input {
                video_ids.extend(read_id_list(path)?);
            }
            if video_ids.is_empty() {
                bail!("no video ids given; pass them as arguments or with --input");
            }

            let workers = workers.unwrap_or(config.settings.max_workers);
            let batch = run_batch(&client, &video_ids, &output, workers)?;
            for outcome in &batch.outcomes {
                match (outcome.path(), outcome.error()) {
                    (Some(path), _) => println!("ok   {}: {}", outcome.video_id, path.display()),
                    (None, error) => println!(
                        "fail {}: {}",
                        outcome.video_id,
                        error.unwrap_or("unknown error")
                    ),
                }
            }
            println!();
            println!("Done: {}/{} succeeded", batch.succeeded, batch.total);

            if let Some(path) = &report {
                batch.write_json(path)?;
                println!("Report written to {}", path.display());
            }

            if batch.succeeded == 0 {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bilisub_tools=info,bilisub=info"));
    let use_json = std::env::var("LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(env_filter)
            .init();
    }
}

fn print_search_results(videos: &[VideoSearchResult]) {
    if videos.is_empty() {
        println!("No videos matched.");
        return;
    }
    println!("Found {} video(s):", videos.len());
    for (index, video) in videos.iter().enumerate() {
        println!();
        println!("{}. {}", index + 1, video.title);
        println!("   bvid:        {}", video.bvid);
        println!("   author:      {}", video.author);
        println!("   plays:       {}", video.play_count);
        println!("   description: {}", video.description);
    }
}

/// Reads one id per line, skipping blank lines and `#` comments.
fn read_id_list(path: &Path) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
