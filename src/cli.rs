//! Command-line interface definitions for Thread Harvest.
//!
//! Each pipeline stage has its own subcommand so it can be re-run alone;
//! `run` drives the whole pipeline from a YAML config. Secrets and the
//! source User-Agent can also come from environment variables.

use crate::pipeline::Stage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the Thread Harvest application.
///
/// # Examples
///
/// ```sh
/// # Whole pipeline from a config file
/// thread_harvest run --config fires.yaml
///
/// # Only re-fetch comments for posts that failed last time
/// thread_harvest comments --config fires.yaml --retry-failed
///
/// # Pseudonymize id columns of every table in a directory
/// THREAD_HARVEST_PASSWORD=secret thread_harvest hash ./data
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Override the User-Agent sent to the record source
    #[arg(long, global = true, env = "THREAD_HARVEST_USER_AGENT")]
    pub user_agent: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the global and local collection queries from a config
    Collect {
        /// Path to the pipeline config.yaml
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Keyword-filter a broad table, append a narrow one and apply the date cutoff
    Filter {
        /// Table from the site-wide search
        broad: PathBuf,

        /// Table from the community search
        narrow: PathBuf,

        /// Keywords; a broad row is kept if any of them appears
        #[arg(short, long, num_args = 1.., required = true)]
        keywords: Vec<String>,

        /// Output table
        #[arg(short, long)]
        output: PathBuf,

        /// Column holding `YYYY-MM-DD HH:MM:SS` dates
        #[arg(long, default_value = "date")]
        date_column: String,

        /// Rows dated on or before this value are dropped
        #[arg(long, default_value = "2024-12-31")]
        cutoff: String,

        /// Columns searched for keywords
        #[arg(long, num_args = 1.., default_values = ["title", "body"])]
        text_columns: Vec<String>,
    },

    /// Merge final tables, keeping the first row per post_id
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, default_value = "all_final_posts.csv")]
        output: PathBuf,
    },

    /// Union the post_id columns of several tables
    MergeIds {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, default_value = "merged_global_posts.csv")]
        output: PathBuf,
    },

    /// Fetch comments for every merged post
    Comments {
        /// Optional path to the pipeline config.yaml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Re-fetch only the ids in the failure manifest and append the rows
        #[arg(long)]
        retry_failed: bool,
    },

    /// Count the link domains cited in a table
    Domains {
        /// Table to scan
        #[arg(default_value = "all_raw_comments.csv")]
        input: PathBuf,

        /// Frequency table (Domain,Count)
        #[arg(long, default_value = "sorted_domains_count.csv")]
        counts_output: PathBuf,

        /// Distinct domains (Unique_Domain)
        #[arg(long, default_value = "comment_unique_domains.csv")]
        unique_output: PathBuf,

        /// Columns scanned for links
        #[arg(long, num_args = 1.., default_values = ["body"])]
        text_columns: Vec<String>,
    },

    /// Hash-protect id columns of a CSV file or directory with HMAC-SHA256
    Hash {
        /// Input CSV file or directory
        input: PathBuf,

        /// Output file or directory (default: adds a `_hashed` suffix)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Key for HMAC hashing
        #[arg(short, long, env = "THREAD_HARVEST_PASSWORD", hide_env_values = true)]
        password: String,

        /// Columns to hash
        #[arg(short, long, num_args = 1.., default_values = ["post_id", "author_id", "comment_id", "author"])]
        columns: Vec<String>,
    },

    /// Run the pipeline stages from a config
    Run {
        /// Path to the pipeline config.yaml
        #[arg(short, long)]
        config: PathBuf,

        /// Run only these stages (repeatable); all stages by default
        #[arg(short, long = "stage", value_enum)]
        stages: Vec<Stage>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_parsing() {
        let cli = Cli::parse_from(&[
            "thread_harvest",
            "run",
            "--config",
            "fires.yaml",
            "--stage",
            "filter",
            "--stage",
            "merge",
        ]);

        match cli.command {
            Command::Run { config, stages } => {
                assert_eq!(config, PathBuf::from("fires.yaml"));
                assert_eq!(stages, [Stage::Filter, Stage::Merge]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_hash_defaults() {
        let cli = Cli::parse_from(&["thread_harvest", "hash", "data", "-p", "secret"]);

        match cli.command {
            Command::Hash {
                input,
                output,
                password,
                columns,
            } => {
                assert_eq!(input, PathBuf::from("data"));
                assert_eq!(output, None);
                assert_eq!(password, "secret");
                assert_eq!(columns, ["post_id", "author_id", "comment_id", "author"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_hash_short_flags() {
        let cli = Cli::parse_from(&[
            "thread_harvest",
            "hash",
            "posts.csv",
            "-o",
            "/tmp/out.csv",
            "-p",
            "k",
            "-c",
            "post_id",
            "author",
        ]);

        match cli.command {
            Command::Hash {
                output, columns, ..
            } => {
                assert_eq!(output, Some(PathBuf::from("/tmp/out.csv")));
                assert_eq!(columns, ["post_id", "author"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_filter_defaults() {
        let cli = Cli::parse_from(&[
            "thread_harvest",
            "filter",
            "global.csv",
            "local.csv",
            "-k",
            "eaton fire",
            "eaton wildfire",
            "-o",
            "final.csv",
        ]);

        match cli.command {
            Command::Filter {
                keywords,
                date_column,
                cutoff,
                text_columns,
                ..
            } => {
                assert_eq!(keywords, ["eaton fire", "eaton wildfire"]);
                assert_eq!(date_column, "date");
                assert_eq!(cutoff, "2024-12-31");
                assert_eq!(text_columns, ["title", "body"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_comments_retry_flag() {
        let cli = Cli::parse_from(&["thread_harvest", "comments", "--retry-failed"]);

        match cli.command {
            Command::Comments {
                config,
                retry_failed,
            } => {
                assert!(config.is_none());
                assert!(retry_failed);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_filter_requires_keywords() {
        let result = Cli::try_parse_from(&["thread_harvest", "filter", "a.csv", "b.csv", "-o", "c.csv"]);
        assert!(result.is_err());
    }
}
