//! Pipeline configuration.
//!
//! A single YAML file enumerates everything a run needs: the record source,
//! the scopes and queries to collect, keyword sets and cutoff for filtering,
//! the merge inputs, and the comment and domain stages. Every field has a
//! default, so a config only needs to name what differs.
//!
//! ```yaml
//! collection:
//!   global:
//!     - query: "Palisades Fire"
//!       output: palisades_global_posts.csv
//!   local:
//!     - name: Palisades Fire
//!       scopes: [PacificPalisades]
//!       query: fire wildfire
//!       output: palisades_local_posts.csv
//! filter:
//!   date_cutoff: "2024-12-31"
//!   sets:
//!     - broad: palisades_global_posts.csv
//!       narrow: palisades_local_posts.csv
//!       keywords: [palisades fire, palisades wildfire]
//!       output: palisades_final_posts.csv
//! ```

use crate::collector::{DEFAULT_SORT, DEFAULT_WINDOW};
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for [`crate::pipeline::run`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub collection: CollectionConfig,
    pub filter: FilterConfig,
    pub merge: MergeConfig,
    pub comments: CommentsConfig,
    pub domains: DomainsConfig,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail once a stage is running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collection.scope_delay()?;
        self.comments.retry_delay()?;
        self.comments.item_delay()?;
        Ok(())
    }
}

fn delay(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidDelay { field, value: secs })
}

/// Connection settings for the Reddit JSON client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Results requested per search page.
    pub page_limit: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com/".to_string(),
            user_agent: concat!("thread_harvest/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            page_limit: 100,
        }
    }
}

/// A query run against the `all` scope without deduplication.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalQuery {
    pub query: String,
    pub output: PathBuf,
}

/// A query run against named scopes, skipping posts already collected.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalQuery {
    pub name: String,
    pub scopes: Vec<String>,
    pub query: String,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub global: Vec<GlobalQuery>,
    pub local: Vec<LocalQuery>,
    /// Tables whose `post_id`s are skipped by local queries. Defaults to the
    /// outputs of the global queries.
    pub known_tables: Option<Vec<PathBuf>>,
    pub scope_delay_secs: f64,
    /// Search ordering passed to the source.
    pub sort: String,
    /// Search time window passed to the source.
    pub window: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            global: Vec::new(),
            local: Vec::new(),
            known_tables: None,
            scope_delay_secs: 2.0,
            sort: DEFAULT_SORT.to_string(),
            window: DEFAULT_WINDOW.to_string(),
        }
    }
}

impl CollectionConfig {
    pub fn scope_delay(&self) -> Result<Duration, ConfigError> {
        delay("scope_delay_secs", self.scope_delay_secs)
    }

    pub fn known_tables(&self) -> Vec<PathBuf> {
        match &self.known_tables {
            Some(tables) => tables.clone(),
            None => self.global.iter().map(|g| g.output.clone()).collect(),
        }
    }
}

/// One broad/narrow pair filtered into a final table.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterSet {
    pub broad: PathBuf,
    pub narrow: PathBuf,
    pub keywords: Vec<String>,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub date_column: String,
    pub date_cutoff: String,
    pub text_columns: Vec<String>,
    pub sets: Vec<FilterSet>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            date_column: "date".to_string(),
            date_cutoff: "2024-12-31".to_string(),
            text_columns: vec!["title".to_string(), "body".to_string()],
            sets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: PathBuf::from("all_final_posts.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommentsConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub manifest: PathBuf,
    pub retries: u32,
    pub retry_delay_secs: f64,
    pub item_delay_secs: f64,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("all_final_posts.csv"),
            output: PathBuf::from("all_raw_comments.csv"),
            manifest: PathBuf::from("failed_ids.txt"),
            retries: 3,
            retry_delay_secs: 5.0,
            item_delay_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DomainsConfig {
    pub input: PathBuf,
    pub text_columns: Vec<String>,
    pub counts_output: PathBuf,
    pub unique_output: PathBuf,
    /// Extra alias entries, applied after the built-in ones.
    pub mappings: Vec<(String, String)>,
}

impl CommentsConfig {
    pub fn retry_delay(&self) -> Result<Duration, ConfigError> {
        delay("retry_delay_secs", self.retry_delay_secs)
    }

    pub fn item_delay(&self) -> Result<Duration, ConfigError> {
        delay("item_delay_secs", self.item_delay_secs)
    }
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("all_raw_comments.csv"),
            text_columns: vec!["body".to_string()],
            counts_output: PathBuf::from("sorted_domains_count.csv"),
            unique_output: PathBuf::from("comment_unique_domains.csv"),
            mappings: Vec::new(),
        }
    }
}
