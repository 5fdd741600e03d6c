//! Stage entry points and the single orchestration entry point.
//!
//! A full run goes:
//!
//! 1. **Global**: each global query over the `all` scope, no deduplication
//! 2. **Local**: each local query over its scopes, skipping ids already in
//!    the known tables
//! 3. **Filter**: each broad/narrow pair into a final table
//! 4. **Merge**: final tables into one, first row per `post_id`
//! 5. **Comments**: comment rows for every merged post, failures manifested
//! 6. **Domains**: link domain counts over the comment bodies
//!
//! Each stage communicates only through files. A stage that fails is logged
//! and the run moves on to the next one; [`RunSummary`] reports what failed.

use crate::collector::{ALL_SCOPES, SearchCollector};
use crate::config::{
    CollectionConfig, CommentsConfig, DomainsConfig, FilterConfig, MergeConfig, PipelineConfig,
};
use crate::dedup::DedupIndex;
use crate::domains::{DomainMapping, DomainNormalizer, DomainReport};
use crate::error::TableError;
use crate::fetcher::{FailureManifest, RetryPolicy, RetryingFetcher};
use crate::filter::{FilterSpec, filter_files, merge_tables};
use crate::models::{Comment, Post};
use crate::source::RecordSource;
use crate::table::{POST_ID, Table, append_records, store_records};
use clap::ValueEnum;
use itertools::Itertools;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    Global,
    Local,
    Filter,
    Merge,
    Comments,
    Domains,
}

impl Stage {
    /// Every stage, in run order.
    pub const ALL: [Stage; 6] = [
        Stage::Global,
        Stage::Local,
        Stage::Filter,
        Stage::Merge,
        Stage::Comments,
        Stage::Domains,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Global => "global",
            Stage::Local => "local",
            Stage::Filter => "filter",
            Stage::Merge => "merge",
            Stage::Comments => "comments",
            Stage::Domains => "domains",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    pub elapsed: Duration,
    /// Error message when the stage aborted.
    pub error: Option<String>,
}

/// Outcome of every stage a run attempted.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub stages: Vec<StageReport>,
}

impl RunSummary {
    pub fn failed(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|r| r.error.is_some())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Counts from one comments stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentsSummary {
    pub posts: usize,
    pub rows: usize,
    pub failed: usize,
}

/// Run the global queries. Returns the number of posts written.
#[instrument(level = "info", skip_all, fields(queries = config.global.len()))]
pub async fn collect_global<S: RecordSource>(
    source: &S,
    config: &CollectionConfig,
) -> Result<usize, Box<dyn Error>> {
    let collector = SearchCollector::new(source, config.scope_delay()?)
        .with_order(&config.sort, &config.window);
    let scopes = [ALL_SCOPES.to_string()];
    let known = DedupIndex::default();

    let mut total = 0;
    for query in &config.global {
        let posts = collector.collect(&scopes, &query.query, &known).await;
        store_records(&query.output, Post::COLUMNS, &posts)?;
        info!(query = %query.query, path = %query.output.display(), count = posts.len(), "Saved global posts");
        total += posts.len();
    }
    Ok(total)
}

/// Run the local queries against the known-id snapshot. Returns the number
/// of posts written.
#[instrument(level = "info", skip_all, fields(queries = config.local.len()))]
pub async fn collect_local<S: RecordSource>(
    source: &S,
    config: &CollectionConfig,
) -> Result<usize, Box<dyn Error>> {
    let known = DedupIndex::build(&config.known_tables());
    if known.is_empty() {
        warn!("No known post ids; local results may repeat global ones");
    }
    let collector = SearchCollector::new(source, config.scope_delay()?)
        .with_order(&config.sort, &config.window);

    let mut total = 0;
    for query in &config.local {
        info!(name = %query.name, scopes = query.scopes.len(), "Collecting local posts");
        let posts = collector.collect(&query.scopes, &query.query, &known).await;
        store_records(&query.output, Post::COLUMNS, &posts)?;
        info!(name = %query.name, path = %query.output.display(), count = posts.len(), "Saved local posts");
        total += posts.len();
    }
    Ok(total)
}

/// Filter every broad/narrow pair. A pair that fails is logged and the rest
/// still run; the stage fails if any pair did.
#[instrument(level = "info", skip_all, fields(sets = config.sets.len()))]
pub fn filter_stage(config: &FilterConfig) -> Result<usize, Box<dyn Error>> {
    let mut written = 0;
    let mut failed = 0;
    for set in &config.sets {
        let spec = FilterSpec {
            required_keywords: &set.keywords,
            date_column: &config.date_column,
            date_cutoff: &config.date_cutoff,
            text_columns: &config.text_columns,
        };
        match filter_files(&set.broad, &set.narrow, &spec, &set.output) {
            Ok(table) => written += table.len(),
            Err(e) => {
                error!(output = %set.output.display(), error = %e, "Filter set failed");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(format!("{failed} of {} filter sets failed", config.sets.len()).into());
    }
    Ok(written)
}

/// Merge the final tables into one. Returns the merged row count.
#[instrument(level = "info", skip_all, fields(output = %config.output.display()))]
pub fn merge_stage(config: &MergeConfig) -> Result<usize, Box<dyn Error>> {
    let merged = merge_tables(&config.inputs)?;
    merged.store(&config.output)?;
    info!(rows = merged.len(), columns = merged.headers().len(), "Saved merged posts");
    Ok(merged.len())
}

/// Union the `post_id`s of `inputs` into a single-column table.
#[instrument(level = "info", skip_all, fields(output = %output.display()))]
pub fn merge_ids<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<usize, Box<dyn Error>> {
    let index = DedupIndex::build(inputs);
    index.store(output)?;
    info!(unique = index.len(), "Saved merged post ids");
    Ok(index.len())
}

/// Distinct non-empty `post_id`s of a table, in table order.
pub fn post_ids_from_table(path: &Path) -> Result<Vec<String>, TableError> {
    let table = Table::load(path)?;
    let column = table.column(POST_ID).ok_or_else(|| TableError::MissingColumn {
        column: POST_ID.to_string(),
        path: path.to_path_buf(),
    })?;
    Ok(column
        .filter(|id| !id.is_empty())
        .unique()
        .map(String::from)
        .collect())
}

/// Fetch comments for every merged post.
///
/// With `retry_failed` the ids come from the failure manifest instead and the
/// rows are appended to the existing comments table.
#[instrument(level = "info", skip_all, fields(retry_failed = retry_failed))]
pub async fn comments_stage<S: RecordSource>(
    source: &S,
    config: &CommentsConfig,
    retry_failed: bool,
) -> Result<CommentsSummary, Box<dyn Error>> {
    let post_ids = if retry_failed {
        FailureManifest::load(&config.manifest)?.ids().to_vec()
    } else {
        post_ids_from_table(&config.input)?
    };
    info!(posts = post_ids.len(), "Loaded post ids");

    let policy = RetryPolicy {
        max_attempts: config.retries.max(1),
        retry_delay: config.retry_delay()?,
        item_delay: config.item_delay()?,
    };
    let fetcher = RetryingFetcher::new(source, policy).with_manifest_path(&config.manifest);

    let (rows, failed) = match fetcher.fetch_all(&post_ids).await {
        Ok(rows) => (rows, 0),
        Err(failure) => {
            warn!(
                failed = failure.manifest.len(),
                manifest = %config.manifest.display(),
                "Saving partial comments"
            );
            (failure.rows, failure.manifest.len())
        }
    };

    if retry_failed {
        append_records(&config.output, Comment::COLUMNS, &rows)?;
    } else {
        store_records(&config.output, Comment::COLUMNS, &rows)?;
    }
    info!(path = %config.output.display(), rows = rows.len(), failed, "Saved comments");

    Ok(CommentsSummary {
        posts: post_ids.len(),
        rows: rows.len(),
        failed,
    })
}

/// Normalize link domains and write the frequency and unique tables.
#[instrument(level = "info", skip_all, fields(input = %config.input.display()))]
pub fn domains_stage(config: &DomainsConfig) -> Result<DomainReport, Box<dyn Error>> {
    let mut mapping = DomainMapping::default();
    mapping.extend(config.mappings.iter().cloned());
    let normalizer = DomainNormalizer::new(mapping);

    let report = normalizer.normalize_table(&config.input, &config.text_columns)?;
    report.write_frequencies(&config.counts_output)?;
    report.write_unique(&config.unique_output)?;
    info!(
        counts = %config.counts_output.display(),
        unique = %config.unique_output.display(),
        domains = report.unique().len(),
        top = ?report.frequencies().first(),
        "Saved domain tables"
    );
    Ok(report)
}

/// Run the selected stages in order.
#[instrument(level = "info", skip_all, fields(stages = stages.len()))]
pub async fn run<S: RecordSource>(
    source: &S,
    config: &PipelineConfig,
    stages: &[Stage],
) -> RunSummary {
    let mut summary = RunSummary::default();

    for stage in Stage::ALL.into_iter().filter(|s| stages.contains(s)) {
        info!(%stage, "Stage starting");
        let t0 = Instant::now();
        let result = match stage {
            Stage::Global => collect_global(source, &config.collection).await.map(|_| ()),
            Stage::Local => collect_local(source, &config.collection).await.map(|_| ()),
            Stage::Filter => filter_stage(&config.filter).map(|_| ()),
            Stage::Merge => merge_stage(&config.merge).map(|_| ()),
            Stage::Comments => comments_stage(source, &config.comments, false).await.map(|_| ()),
            Stage::Domains => domains_stage(&config.domains).map(|_| ()),
        };
        let elapsed = t0.elapsed();

        let error = match result {
            Ok(()) => {
                info!(%stage, elapsed_ms = elapsed.as_millis() as u64, "Stage complete");
                None
            }
            Err(e) => {
                error!(%stage, elapsed_ms = elapsed.as_millis() as u64, error = %e, "Stage failed; continuing");
                Some(e.to_string())
            }
        };
        summary.stages.push(StageReport {
            stage,
            elapsed,
            error,
        });
    }

    let failed = summary.failed().count();
    info!(stages = summary.stages.len(), failed, "Run complete");
    summary
}

/// Every output path a config names, for early directory checks.
pub fn output_paths(config: &PipelineConfig) -> Vec<PathBuf> {
    let collection = &config.collection;
    collection
        .global
        .iter()
        .map(|q| q.output.clone())
        .chain(collection.local.iter().map(|q| q.output.clone()))
        .chain(config.filter.sets.iter().map(|s| s.output.clone()))
        .chain([
            config.merge.output.clone(),
            config.comments.output.clone(),
            config.comments.manifest.clone(),
            config.domains.counts_output.clone(),
            config.domains.unique_output.clone(),
        ])
        .collect()
}
