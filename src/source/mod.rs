//! Record sources: where posts and comment threads come from.
//!
//! A [`RecordSource`] exposes three operations:
//!
//! 1. **Search**: one page of results for a query inside a scope
//! 2. **Thread**: a post with its reply tree, possibly containing
//!    [`MorePlaceholder`]s for replies the source did not inline
//! 3. **Expand**: resolve one placeholder into further reply nodes
//!
//! Pagination and placeholder resolution are driven by the callers
//! ([`crate::collector`] and [`crate::fetcher`]), so a test double only has
//! to answer single requests.
//!
//! # Sources
//!
//! | Source | Module | Notes |
//! |--------|--------|-------|
//! | Reddit | [`reddit`] | Public JSON endpoints, no OAuth |

use crate::error::SourceError;

pub mod reddit;

/// A search inside one scope.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub scope: String,
    pub query: String,
    /// Result ordering, e.g. `comments` or `new`.
    pub sort: String,
    /// Time window, e.g. `year` or `all`.
    pub window: String,
}

/// One page of results plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` on the last page.
    pub after: Option<String>,
}

/// Identity of a post author; absent entirely when the account is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: Option<String>,
    pub has_verified_email: Option<bool>,
}

/// A post as returned by a source.
#[derive(Debug, Clone)]
pub struct RawPost {
    pub id: String,
    pub subreddit: String,
    pub author: Option<Author>,
    pub author_flair_text: Option<String>,
    pub title: String,
    pub score: i64,
    /// Epoch seconds.
    pub created_utc: f64,
    pub num_comments: u64,
    pub selftext: String,
}

/// A comment as returned by a source.
#[derive(Debug, Clone)]
pub struct RawComment {
    pub id: String,
    /// Author name; `None` when deleted.
    pub author: Option<String>,
    pub body: String,
    pub score: i64,
    /// Epoch seconds.
    pub created_utc: f64,
}

/// Replies the source left out of a thread response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorePlaceholder {
    /// Fullname of the parent (`t1_…` or `t3_…`).
    pub parent_id: String,
    /// Ids of the hidden children. Empty for "continue this thread" links.
    pub children: Vec<String>,
}

/// A node in a reply tree.
#[derive(Debug, Clone)]
pub enum ReplyNode {
    Comment {
        comment: RawComment,
        replies: Vec<ReplyNode>,
    },
    More(MorePlaceholder),
}

/// A post together with its (partial) reply tree.
#[derive(Debug, Clone)]
pub struct Thread {
    pub post: RawPost,
    pub replies: Vec<ReplyNode>,
}

/// Contract every record source implements.
pub trait RecordSource {
    /// Fetch one page of search results. `after` is the cursor returned by
    /// the previous page.
    async fn search_page(
        &self,
        request: &SearchRequest,
        after: Option<&str>,
    ) -> Result<Page<RawPost>, SourceError>;

    /// Fetch a post and its reply tree.
    async fn thread(&self, post_id: &str) -> Result<Thread, SourceError>;

    /// Resolve a placeholder found in the thread of `post_id`.
    async fn expand_more(
        &self,
        post_id: &str,
        placeholder: &MorePlaceholder,
    ) -> Result<Vec<ReplyNode>, SourceError>;
}
