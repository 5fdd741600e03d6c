//! Comment fetching with bounded retries and a failure manifest.
//!
//! Each post goes through a small state machine:
//!
//! ```text
//! Pending -> Fetching -> Success
//!               |  ^
//!               v  |
//!            RetryWait -> Failed
//! ```
//!
//! A fetch resolves the thread, expands every "more replies" placeholder and
//! flattens the tree into [`Comment`] rows. Errors are retried after a fixed
//! delay until the attempt ceiling is reached.
//!
//! # Batch behaviour
//!
//! [`RetryingFetcher::fetch_all`] walks the ids in order and sleeps a fixed
//! delay after every item. A failed item is recorded in the
//! [`FailureManifest`] and the batch moves on. When the manifest is non-empty
//! the batch returns [`BatchFailure`], which still carries every row that was
//! fetched.

use crate::error::SourceError;
use crate::models::Comment;
use crate::source::{RecordSource, ReplyNode};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Attempt ceiling and delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per item, including the first.
    pub max_attempts: u32,
    /// Pause between attempts on the same item.
    pub retry_delay: Duration,
    /// Pause after every item, whatever its outcome.
    pub item_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            item_delay: Duration::from_secs(10),
        }
    }
}

/// Result of one attempt, or of a whole item once retries are settled.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(Vec<Comment>),
    /// The attempt failed and another one is allowed.
    RetriableFailure(SourceError),
    /// The ceiling was reached; `manifest_entry` is the id to re-drive.
    TerminalFailure {
        cause: SourceError,
        manifest_entry: String,
    },
}

/// Ids whose fetch exhausted every attempt, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureManifest {
    ids: Vec<String>,
}

impl FailureManifest {
    pub fn push(&mut self, id: String) {
        self.ids.push(id);
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Overwrite `path` with one id per line.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let mut out = String::new();
        for id in &self.ids {
            out.push_str(id);
            out.push('\n');
        }
        std::fs::write(path, out)
    }

    /// Read a manifest written by [`FailureManifest::write`]. Blank lines are
    /// ignored.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self {
            ids: raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
        })
    }
}

/// One or more items exhausted their retries.
#[derive(Debug, Error)]
#[error("failed to fetch comments for {} post(s): {}", .manifest.len(), .manifest.ids().join(", "))]
pub struct BatchFailure {
    /// Rows of every item that did succeed.
    pub rows: Vec<Comment>,
    pub manifest: FailureManifest,
}

/// Fetches flattened comment rows from a [`RecordSource`].
pub struct RetryingFetcher<'a, S> {
    source: &'a S,
    policy: RetryPolicy,
    manifest_path: Option<PathBuf>,
}

impl<S> fmt::Debug for RetryingFetcher<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("policy", &self.policy)
            .field("manifest_path", &self.manifest_path)
            .finish()
    }
}

impl<'a, S: RecordSource> RetryingFetcher<'a, S> {
    pub fn new(source: &'a S, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            manifest_path: None,
        }
    }

    /// Persist the failure manifest to `path` after every batch.
    pub fn with_manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// Run one attempt and classify it against the ceiling.
    async fn attempt(&self, post_id: &str, attempt: u32) -> FetchOutcome {
        match self.fetch_once(post_id).await {
            Ok(rows) => FetchOutcome::Success(rows),
            Err(cause) if attempt < self.policy.max_attempts => {
                FetchOutcome::RetriableFailure(cause)
            }
            Err(cause) => FetchOutcome::TerminalFailure {
                cause,
                manifest_entry: post_id.to_string(),
            },
        }
    }

    /// Fetch one post's comments, retrying up to the ceiling.
    ///
    /// Never returns [`FetchOutcome::RetriableFailure`].
    #[instrument(level = "info", skip(self))]
    pub async fn fetch_with_retry(&self, post_id: &str) -> FetchOutcome {
        let total_t0 = Instant::now();
        let mut attempt = 1;

        loop {
            let attempt_t0 = Instant::now();
            match self.attempt(post_id, attempt).await {
                FetchOutcome::RetriableFailure(e) => {
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        delay = ?self.policy.retry_delay,
                        error = %e,
                        "Comment fetch attempt failed; retrying"
                    );
                    sleep(self.policy.retry_delay).await;
                    attempt += 1;
                }
                FetchOutcome::TerminalFailure {
                    cause,
                    manifest_entry,
                } => {
                    error!(
                        attempt,
                        elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                        error = %cause,
                        "All retry attempts failed"
                    );
                    return FetchOutcome::TerminalFailure {
                        cause,
                        manifest_entry,
                    };
                }
                FetchOutcome::Success(rows) => {
                    debug!(attempt, count = rows.len(), "Comment fetch succeeded");
                    return FetchOutcome::Success(rows);
                }
            }
        }
    }

    /// Resolve the thread, expand placeholders and flatten breadth-first.
    async fn fetch_once(&self, post_id: &str) -> Result<Vec<Comment>, SourceError> {
        let thread = self.source.thread(post_id).await?;
        let expected = thread.post.num_comments;
        let mut queue: VecDeque<ReplyNode> = thread.replies.into();
        let mut rows = Vec::new();
        let mut expanded = 0usize;

        while let Some(node) = queue.pop_front() {
            match node {
                ReplyNode::Comment { comment, replies } => {
                    rows.push(Comment::from_raw(post_id, comment));
                    queue.extend(replies);
                }
                ReplyNode::More(placeholder) => {
                    expanded += 1;
                    queue.extend(self.source.expand_more(post_id, &placeholder).await?);
                }
            }
        }

        debug!(%post_id, count = rows.len(), expected, expanded, "Flattened comment tree");
        Ok(rows)
    }

    /// Fetch every id in order, collecting failures instead of aborting.
    #[instrument(level = "info", skip_all, fields(count = post_ids.len()))]
    pub async fn fetch_all(&self, post_ids: &[String]) -> Result<Vec<Comment>, BatchFailure> {
        let mut rows = Vec::new();
        let mut manifest = FailureManifest::default();

        for (i, post_id) in post_ids.iter().enumerate() {
            info!(index = i, %post_id, "Fetching comments");
            match self.fetch_with_retry(post_id).await {
                FetchOutcome::Success(comments) => {
                    info!(%post_id, count = comments.len(), "Fetched comments");
                    rows.extend(comments);
                }
                FetchOutcome::TerminalFailure {
                    cause,
                    manifest_entry,
                } => {
                    error!(%post_id, error = %cause, "Giving up on post");
                    manifest.push(manifest_entry);
                }
                FetchOutcome::RetriableFailure(cause) => {
                    // fetch_with_retry settles every retriable outcome
                    error!(%post_id, error = %cause, "Unsettled fetch outcome");
                    manifest.push(post_id.clone());
                }
            }
            sleep(self.policy.item_delay).await;
        }

        if let Some(path) = &self.manifest_path {
            match manifest.write(path) {
                Ok(()) => info!(path = %path.display(), failed = manifest.len(), "Wrote failure manifest"),
                Err(e) => error!(path = %path.display(), error = %e, "Failed to write failure manifest"),
            }
        }

        if manifest.is_empty() {
            info!(rows = rows.len(), "Comment batch complete");
            Ok(rows)
        } else {
            let failure = BatchFailure { rows, manifest };
            warn!(rows = failure.rows.len(), error = %failure, "Comment batch partially failed");
            Err(failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{
        MorePlaceholder, Page, RawComment, RawPost, SearchRequest, Thread,
    };
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Scripted source: each post fails a number of times before succeeding.
    #[derive(Default)]
    struct ScriptedThreads {
        failures_before_success: HashMap<String, u32>,
        more: HashMap<String, Vec<ReplyNode>>,
        calls: RefCell<HashMap<String, u32>>,
    }

    fn comment(id: &str, replies: Vec<ReplyNode>) -> ReplyNode {
        ReplyNode::Comment {
            comment: RawComment {
                id: id.to_string(),
                author: Some(format!("user_{id}")),
                body: format!("body {id}"),
                score: 1,
                created_utc: 1_736_294_400.0,
            },
            replies,
        }
    }

    fn post(id: &str) -> RawPost {
        RawPost {
            id: id.to_string(),
            subreddit: "LosAngeles".to_string(),
            author: None,
            author_flair_text: None,
            title: String::new(),
            score: 0,
            created_utc: 0.0,
            num_comments: 0,
            selftext: String::new(),
        }
    }

    impl RecordSource for ScriptedThreads {
        async fn search_page(
            &self,
            _request: &SearchRequest,
            _after: Option<&str>,
        ) -> Result<Page<RawPost>, SourceError> {
            Ok(Page {
                items: Vec::new(),
                after: None,
            })
        }

        async fn thread(&self, post_id: &str) -> Result<Thread, SourceError> {
            let mut calls = self.calls.borrow_mut();
            let n = calls.entry(post_id.to_string()).or_insert(0);
            *n += 1;
            let fail_for = self.failures_before_success.get(post_id).copied().unwrap_or(0);
            if *n <= fail_for {
                return Err(SourceError::Network(format!("attempt {n} reset")));
            }
            Ok(Thread {
                post: post(post_id),
                replies: vec![
                    comment(&format!("{post_id}_a"), vec![comment(&format!("{post_id}_b"), vec![])]),
                    ReplyNode::More(MorePlaceholder {
                        parent_id: format!("t3_{post_id}"),
                        children: vec![format!("{post_id}_m")],
                    }),
                ],
            })
        }

        async fn expand_more(
            &self,
            post_id: &str,
            _placeholder: &MorePlaceholder,
        ) -> Result<Vec<ReplyNode>, SourceError> {
            Ok(self.more.get(post_id).cloned().unwrap_or_default())
        }
    }

    fn no_delay(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::ZERO,
            item_delay: Duration::ZERO,
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_success_on_third_attempt() {
        let source = ScriptedThreads {
            failures_before_success: HashMap::from([("p1".to_string(), 2)]),
            ..Default::default()
        };
        let fetcher = RetryingFetcher::new(&source, no_delay(3));

        let rows = fetcher.fetch_all(&ids(&["p1"])).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.calls.borrow()["p1"], 3);
    }

    #[tokio::test]
    async fn test_exhausted_item_is_manifested_and_batch_continues() {
        let source = ScriptedThreads {
            failures_before_success: HashMap::from([("bad".to_string(), 3)]),
            ..Default::default()
        };
        let fetcher = RetryingFetcher::new(&source, no_delay(3));

        let failure = fetcher
            .fetch_all(&ids(&["p1", "bad", "p2"]))
            .await
            .unwrap_err();
        assert_eq!(failure.manifest.ids(), ["bad"]);
        assert_eq!(source.calls.borrow()["bad"], 3);
        assert!(failure.rows.iter().all(|c| c.post_id != "bad"));
        let posts: Vec<&str> = failure.rows.iter().map(|c| c.post_id.as_str()).collect();
        assert_eq!(posts, ["p1", "p1", "p2", "p2"]);
    }

    #[tokio::test]
    async fn test_terminal_outcome_carries_last_error() {
        let source = ScriptedThreads {
            failures_before_success: HashMap::from([("bad".to_string(), 10)]),
            ..Default::default()
        };
        let fetcher = RetryingFetcher::new(&source, no_delay(3));

        match fetcher.fetch_with_retry("bad").await {
            FetchOutcome::TerminalFailure {
                cause,
                manifest_entry,
            } => {
                assert_eq!(manifest_entry, "bad");
                assert_eq!(cause.to_string(), "network error: attempt 3 reset");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_placeholders_are_expanded_breadth_first() {
        let source = ScriptedThreads {
            more: HashMap::from([(
                "p1".to_string(),
                vec![comment("p1_m", vec![comment("p1_m_child", vec![])])],
            )]),
            ..Default::default()
        };
        let fetcher = RetryingFetcher::new(&source, no_delay(1));

        let rows = fetcher.fetch_all(&ids(&["p1"])).await.unwrap();
        let comment_ids: Vec<&str> = rows.iter().map(|c| c.comment_id.as_str()).collect();
        assert_eq!(comment_ids, ["p1_a", "p1_b", "p1_m", "p1_m_child"]);
        assert!(rows.iter().all(|c| c.post_id == "p1"));
    }

    #[tokio::test]
    async fn test_manifest_is_overwritten_each_batch() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("failed_ids.txt");
        std::fs::write(&manifest, "stale\n").unwrap();

        let source = ScriptedThreads {
            failures_before_success: HashMap::from([("bad".to_string(), 5)]),
            ..Default::default()
        };
        let fetcher = RetryingFetcher::new(&source, no_delay(2)).with_manifest_path(&manifest);

        assert!(fetcher.fetch_all(&ids(&["bad", "p1"])).await.is_err());
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), "bad\n");

        assert!(fetcher.fetch_all(&ids(&["p1"])).await.is_ok());
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), "");
    }

    fn timed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::from_secs(5),
            item_delay: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_delay_follows_every_item_including_failures() {
        let source = ScriptedThreads {
            failures_before_success: HashMap::from([("bad".to_string(), 3)]),
            ..Default::default()
        };
        let fetcher = RetryingFetcher::new(&source, timed(3));

        let start = tokio::time::Instant::now();
        let failure = fetcher.fetch_all(&ids(&["p1", "bad"])).await.unwrap_err();
        assert_eq!(failure.manifest.ids(), ["bad"]);
        // two waits between the three attempts on "bad", one wait after each item
        assert_eq!(start.elapsed(), Duration::from_secs(2 * 5 + 2 * 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_only_between_attempts() {
        let source = ScriptedThreads {
            failures_before_success: HashMap::from([("p1".to_string(), 1)]),
            ..Default::default()
        };
        let fetcher = RetryingFetcher::new(&source, timed(3));

        let start = tokio::time::Instant::now();
        assert!(matches!(
            fetcher.fetch_with_retry("p1").await,
            FetchOutcome::Success(_)
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        assert!(matches!(
            fetcher.fetch_with_retry("p2").await,
            FetchOutcome::Success(_)
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_manifest_load_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_ids.txt");
        std::fs::write(&path, "a1\n\n b2 \n").unwrap();

        let manifest = FailureManifest::load(&path).unwrap();
        assert_eq!(manifest.ids(), ["a1", "b2"]);
    }
}
