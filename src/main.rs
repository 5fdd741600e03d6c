//! # Thread Harvest
//!
//! Collects community discussion threads about real-world events from a
//! public forum, deduplicates and filters them, fetches their comment trees
//! and reports which web domains the comments cite.
//!
//! ## Usage
//!
//! ```sh
//! thread_harvest run --config fires.yaml
//! thread_harvest hash ./data -p secret
//! ```
//!
//! ## Architecture
//!
//! The pipeline runs in stages that exchange CSV tables keyed by `post_id`:
//! 1. **Collection**: global search, then local scopes deduplicated against it
//! 2. **Filtering**: keyword and date filters, then merge by `post_id`
//! 3. **Comments**: thread fetches with bounded retries and a failure manifest
//! 4. **Domains**: link extraction and domain canonicalization
//!
//! Each stage is sequential and rate-limited by fixed delays.

use clap::Parser;
use std::collections::BTreeSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod collector;
mod config;
mod dedup;
mod domains;
mod error;
mod fetcher;
mod filter;
mod hashing;
mod models;
mod pipeline;
mod source;
mod table;
mod utils;

use cli::{Cli, Command};
use config::{DomainsConfig, PipelineConfig};
use filter::{FilterSpec, filter_files, merge_tables};
use hashing::HashOutcome;
use pipeline::{RunSummary, Stage};
use source::reddit::RedditClient;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("thread_harvest starting up");

    let args = Cli::parse();
    debug!(?args.command, "Parsed CLI arguments");

    let code = match args.command {
        Command::Collect { config } => {
            let config = load_config(Some(config.as_path()), args.user_agent)?;
            run_stages(&config, &[Stage::Global, Stage::Local]).await?
        }

        Command::Run { config, stages } => {
            let config = load_config(Some(config.as_path()), args.user_agent)?;
            let stages = if stages.is_empty() {
                Stage::ALL.to_vec()
            } else {
                stages
            };
            run_stages(&config, &stages).await?
        }

        Command::Filter {
            broad,
            narrow,
            keywords,
            output,
            date_column,
            cutoff,
            text_columns,
        } => {
            let spec = FilterSpec {
                required_keywords: &keywords,
                date_column: &date_column,
                date_cutoff: &cutoff,
                text_columns: &text_columns,
            };
            filter_files(&broad, &narrow, &spec, &output)?;
            ExitCode::SUCCESS
        }

        Command::Merge { inputs, output } => {
            let merged = merge_tables(&inputs)?;
            merged.store(&output)?;
            info!(path = %output.display(), rows = merged.len(), "Saved merged posts");
            ExitCode::SUCCESS
        }

        Command::MergeIds { inputs, output } => {
            pipeline::merge_ids(&inputs, &output)?;
            ExitCode::SUCCESS
        }

        Command::Comments {
            config,
            retry_failed,
        } => {
            let config = load_config(config.as_deref(), args.user_agent)?;
            check_output_dirs([&config.comments.output, &config.comments.manifest]).await?;
            let client = RedditClient::new(&config.source)?;
            let summary = pipeline::comments_stage(&client, &config.comments, retry_failed).await?;
            if summary.failed > 0 {
                warn!(
                    failed = summary.failed,
                    manifest = %config.comments.manifest.display(),
                    "Some posts failed; re-run with --retry-failed"
                );
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }

        Command::Domains {
            input,
            counts_output,
            unique_output,
            text_columns,
        } => {
            let config = DomainsConfig {
                input,
                text_columns,
                counts_output,
                unique_output,
                ..DomainsConfig::default()
            };
            pipeline::domains_stage(&config)?;
            ExitCode::SUCCESS
        }

        Command::Hash {
            input,
            output,
            password,
            columns,
        } => match hashing::hash_path(&input, output.as_deref(), &columns, &password).await? {
            HashOutcome::Written(paths) => {
                info!(files = paths.len(), "Done");
                ExitCode::SUCCESS
            }
            HashOutcome::InputMissing => {
                error!(path = %input.display(), "Input not found");
                ExitCode::from(1)
            }
        },
    };

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(code)
}

/// Load the pipeline config, or defaults when no path is given.
fn load_config(
    path: Option<&Path>,
    user_agent: Option<String>,
) -> Result<PipelineConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => {
            let config = PipelineConfig::load(path)?;
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        None => PipelineConfig::default(),
    };
    if let Some(user_agent) = user_agent {
        config.source.user_agent = user_agent;
    }
    Ok(config)
}

/// Ensure the parent directory of every output is writable before any
/// request is made.
async fn check_output_dirs<'a>(
    outputs: impl IntoIterator<Item = &'a PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let dirs: BTreeSet<&Path> = outputs
        .into_iter()
        .filter_map(|p| p.parent())
        .filter(|d| !d.as_os_str().is_empty())
        .collect();
    for dir in dirs {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir.display(),
                error = %e,
                "Output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }
    Ok(())
}

async fn run_stages(config: &PipelineConfig, stages: &[Stage]) -> Result<ExitCode, Box<dyn Error>> {
    check_output_dirs(&pipeline::output_paths(config)).await?;
    let client = RedditClient::new(&config.source)?;
    let summary: RunSummary = pipeline::run(&client, config, stages).await;

    for report in &summary.stages {
        match &report.error {
            Some(e) => error!(stage = %report.stage, elapsed_ms = report.elapsed.as_millis() as u64, error = %e, "Stage failed"),
            None => info!(stage = %report.stage, elapsed_ms = report.elapsed.as_millis() as u64, "Stage succeeded"),
        }
    }
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
