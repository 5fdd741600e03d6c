//! Search-based post collection across scopes.
//!
//! For each scope the collector pages through the source's search results
//! (by default most-commented first over the past year, no page limit), drops posts whose id is
//! already in the [`DedupIndex`], and normalizes the rest into [`Post`] rows.
//!
//! A scope that does not exist, or that fails mid-way, is logged and skipped;
//! posts gathered from earlier pages of a failing scope are kept. A fixed
//! delay separates consecutive scopes.

use crate::dedup::DedupIndex;
use crate::error::SourceError;
use crate::models::Post;
use crate::source::{RecordSource, SearchRequest};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Scope that covers the whole source.
pub const ALL_SCOPES: &str = "all";

pub const DEFAULT_SORT: &str = "comments";
pub const DEFAULT_WINDOW: &str = "year";

/// Collects posts matching a query from one or more scopes.
pub struct SearchCollector<'a, S> {
    source: &'a S,
    scope_delay: Duration,
    sort: String,
    window: String,
}

impl<S> fmt::Debug for SearchCollector<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchCollector")
            .field("scope_delay", &self.scope_delay)
            .field("sort", &self.sort)
            .field("window", &self.window)
            .finish()
    }
}

/// Per-scope tallies, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ScopeStats {
    pages: usize,
    kept: usize,
    skipped: usize,
}

impl<'a, S: RecordSource> SearchCollector<'a, S> {
    pub fn new(source: &'a S, scope_delay: Duration) -> Self {
        Self {
            source,
            scope_delay,
            sort: DEFAULT_SORT.to_string(),
            window: DEFAULT_WINDOW.to_string(),
        }
    }

    /// Override the result ordering and time window sent with each search.
    pub fn with_order(mut self, sort: &str, window: &str) -> Self {
        self.sort = sort.to_string();
        self.window = window.to_string();
        self
    }

    /// Collect posts for `query` from each scope in order.
    #[instrument(level = "info", skip_all, fields(%query, scopes = scopes.len()))]
    pub async fn collect(&self, scopes: &[String], query: &str, known: &DedupIndex) -> Vec<Post> {
        let mut posts = Vec::new();

        for (i, scope) in scopes.iter().enumerate() {
            if i > 0 {
                sleep(self.scope_delay).await;
            }
            info!(%scope, %query, "Searching scope");
            let request = SearchRequest {
                scope: scope.clone(),
                query: query.to_string(),
                sort: self.sort.clone(),
                window: self.window.clone(),
            };

            let mut stats = ScopeStats::default();
            match self.collect_scope(&request, known, &mut posts, &mut stats).await {
                Ok(()) => info!(
                    %scope,
                    pages = stats.pages,
                    kept = stats.kept,
                    skipped = stats.skipped,
                    "Scope complete"
                ),
                Err(e) if e.is_not_found() => {
                    warn!(%scope, error = %e, "Scope not found; skipping")
                }
                Err(e) => error!(
                    %scope,
                    error = %e,
                    kept = stats.kept,
                    "Error while searching scope; keeping posts collected so far"
                ),
            }
        }

        info!(total = posts.len(), "Collection complete");
        posts
    }

    async fn collect_scope(
        &self,
        request: &SearchRequest,
        known: &DedupIndex,
        posts: &mut Vec<Post>,
        stats: &mut ScopeStats,
    ) -> Result<(), SourceError> {
        let mut after: Option<String> = None;
        loop {
            let page = self.source.search_page(request, after.as_deref()).await?;
            stats.pages += 1;
            for raw in page.items {
                if known.is_known(&raw.id) {
                    debug!(post_id = %raw.id, "Skipping known post");
                    stats.skipped += 1;
                    continue;
                }
                posts.push(Post::from(raw));
                stats.kept += 1;
            }
            match page.after {
                Some(cursor) if after.as_deref() != Some(cursor.as_str()) => after = Some(cursor),
                _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MorePlaceholder, Page, RawPost, ReplyNode, Thread};
    use std::cell::RefCell;
    use std::collections::HashMap;

    enum ScopeScript {
        Pages(Vec<Vec<&'static str>>),
        NotFound,
        FailAfter(Vec<Vec<&'static str>>),
    }

    struct ScriptedSearch {
        scopes: HashMap<&'static str, ScopeScript>,
        requests: RefCell<Vec<(String, Option<String>)>>,
    }

    fn raw(id: &str, scope: &str) -> RawPost {
        RawPost {
            id: id.to_string(),
            subreddit: scope.to_string(),
            author: None,
            author_flair_text: Some("Evacuee".to_string()),
            title: format!("title {id}"),
            score: 5,
            created_utc: 1_736_294_400.0,
            num_comments: 2,
            selftext: String::new(),
        }
    }

    impl RecordSource for ScriptedSearch {
        async fn search_page(
            &self,
            request: &SearchRequest,
            after: Option<&str>,
        ) -> Result<Page<RawPost>, SourceError> {
            self.requests
                .borrow_mut()
                .push((request.scope.clone(), after.map(String::from)));
            let page_no: usize = after.map(|a| a.parse().unwrap()).unwrap_or(0);
            let (pages, fail_at_end) = match self.scopes.get(request.scope.as_str()) {
                Some(ScopeScript::Pages(p)) => (p, false),
                Some(ScopeScript::FailAfter(p)) => (p, true),
                Some(ScopeScript::NotFound) | None => {
                    return Err(SourceError::NotFound(request.scope.clone()));
                }
            };
            if page_no >= pages.len() {
                assert!(fail_at_end);
                return Err(SourceError::Http {
                    status: 503,
                    url: "search".to_string(),
                });
            }
            let next = page_no + 1;
            let has_more = next < pages.len() || fail_at_end;
            Ok(Page {
                items: pages[page_no].iter().map(|id| raw(id, &request.scope)).collect(),
                after: has_more.then(|| next.to_string()),
            })
        }

        async fn thread(&self, post_id: &str) -> Result<Thread, SourceError> {
            Err(SourceError::NotFound(post_id.to_string()))
        }

        async fn expand_more(
            &self,
            _post_id: &str,
            _placeholder: &MorePlaceholder,
        ) -> Result<Vec<ReplyNode>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn scopes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_pages_through_scopes_in_order_skipping_known() {
        let source = ScriptedSearch {
            scopes: HashMap::from([
                ("Pasadena", ScopeScript::Pages(vec![vec!["a", "b"], vec!["c"]])),
                ("Altadena", ScopeScript::Pages(vec![vec!["d", "e"]])),
            ]),
            requests: RefCell::new(Vec::new()),
        };
        let known: DedupIndex = ["b", "e"].into_iter().map(String::from).collect();
        let collector = SearchCollector::new(&source, Duration::ZERO);

        let posts = collector
            .collect(&scopes(&["Pasadena", "Altadena"]), "fire wildfire", &known)
            .await;
        let ids: Vec<&str> = posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "d"]);
        assert_eq!(posts[2].subreddit, "Altadena");
        assert_eq!(posts[0].date, "2025-01-08 00:00:00");
        assert_eq!(posts[0].author_id, None);
        assert_eq!(source.requests.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_scope_is_skipped() {
        let source = ScriptedSearch {
            scopes: HashMap::from([("LosAngeles", ScopeScript::Pages(vec![vec!["x"]]))]),
            requests: RefCell::new(Vec::new()),
        };
        let collector = SearchCollector::new(&source, Duration::ZERO);

        let posts = collector
            .collect(
                &scopes(&["NoSuchPlace", "LosAngeles"]),
                "fire",
                &DedupIndex::default(),
            )
            .await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_id, "x");
    }

    #[tokio::test]
    async fn test_error_mid_scope_keeps_earlier_pages() {
        let source = ScriptedSearch {
            scopes: HashMap::from([
                ("California", ScopeScript::FailAfter(vec![vec!["p1", "p2"]])),
                ("LosAngeles", ScopeScript::Pages(vec![vec!["p3"]])),
            ]),
            requests: RefCell::new(Vec::new()),
        };
        let collector = SearchCollector::new(&source, Duration::ZERO);

        let posts = collector
            .collect(
                &scopes(&["California", "LosAngeles"]),
                "fire",
                &DedupIndex::default(),
            )
            .await;
        let ids: Vec<&str> = posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2", "p3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_delay_only_between_scopes() {
        let source = ScriptedSearch {
            scopes: HashMap::from([
                ("Pasadena", ScopeScript::Pages(vec![vec!["a"], vec!["b"]])),
                ("Altadena", ScopeScript::NotFound),
                ("Sierra", ScopeScript::Pages(vec![vec!["c"]])),
            ]),
            requests: RefCell::new(Vec::new()),
        };
        let collector = SearchCollector::new(&source, Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let posts = collector
            .collect(
                &scopes(&["Pasadena", "Altadena", "Sierra"]),
                "fire",
                &DedupIndex::default(),
            )
            .await;
        assert_eq!(posts.len(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2 * 2));

        let start = tokio::time::Instant::now();
        collector
            .collect(&scopes(&["Sierra"]), "fire", &DedupIndex::default())
            .await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_order_is_sent_with_every_request() {
        struct RecordOrder(RefCell<Vec<(String, String)>>);
        impl RecordSource for RecordOrder {
            async fn search_page(
                &self,
                request: &SearchRequest,
                _after: Option<&str>,
            ) -> Result<Page<RawPost>, SourceError> {
                self.0
                    .borrow_mut()
                    .push((request.sort.clone(), request.window.clone()));
                Ok(Page {
                    items: Vec::new(),
                    after: None,
                })
            }
            async fn thread(&self, post_id: &str) -> Result<Thread, SourceError> {
                Err(SourceError::NotFound(post_id.to_string()))
            }
            async fn expand_more(
                &self,
                _post_id: &str,
                _placeholder: &MorePlaceholder,
            ) -> Result<Vec<ReplyNode>, SourceError> {
                Ok(Vec::new())
            }
        }

        let source = RecordOrder(RefCell::new(Vec::new()));
        SearchCollector::new(&source, Duration::ZERO)
            .collect(&scopes(&["LosAngeles"]), "fire", &DedupIndex::default())
            .await;
        SearchCollector::new(&source, Duration::ZERO)
            .with_order("new", "all")
            .collect(&scopes(&["LosAngeles"]), "fire", &DedupIndex::default())
            .await;
        assert_eq!(
            *source.0.borrow(),
            [
                ("comments".to_string(), "year".to_string()),
                ("new".to_string(), "all".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops_paging() {
        struct StuckCursor;
        impl RecordSource for StuckCursor {
            async fn search_page(
                &self,
                request: &SearchRequest,
                after: Option<&str>,
            ) -> Result<Page<RawPost>, SourceError> {
                Ok(Page {
                    items: vec![raw(after.unwrap_or("first"), &request.scope)],
                    after: Some("same".to_string()),
                })
            }
            async fn thread(&self, post_id: &str) -> Result<Thread, SourceError> {
                Err(SourceError::NotFound(post_id.to_string()))
            }
            async fn expand_more(
                &self,
                _post_id: &str,
                _placeholder: &MorePlaceholder,
            ) -> Result<Vec<ReplyNode>, SourceError> {
                Ok(Vec::new())
            }
        }

        let collector = SearchCollector::new(&StuckCursor, Duration::ZERO);
        let posts = collector
            .collect(&scopes(&[ALL_SCOPES]), "fire", &DedupIndex::default())
            .await;
        let ids: Vec<&str> = posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, ["first", "same"]);
    }
}
