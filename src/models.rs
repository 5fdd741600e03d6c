//! Row models for the tables produced by each stage.
//!
//! - [`Post`]: one search result, written by the collector
//! - [`Comment`]: one flattened reply, written by the comment fetcher
//!
//! Raw records as returned by a source live in [`crate::source`]; the
//! conversions here normalize timestamps and deleted authors.

use crate::source::{RawComment, RawPost};
use crate::utils::format_utc;
use serde::{Deserialize, Serialize};

/// Author sentinel for comments whose author account no longer exists.
pub const DELETED_AUTHOR: &str = "[deleted]";

/// A collected post.
///
/// Field order matches the column order of the post tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: String,
    /// Display name of the community the post was found in.
    pub subreddit: String,
    /// `None` when the author was deleted or removed.
    pub author_id: Option<String>,
    pub author_verified: Option<bool>,
    /// The author's flair text in that community.
    pub flare: Option<String>,
    pub title: String,
    pub score: i64,
    /// Creation time as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub date: String,
    pub num_comments: u64,
    pub body: String,
}

impl Post {
    pub const COLUMNS: &'static [&'static str] = &[
        "post_id",
        "subreddit",
        "author_id",
        "author_verified",
        "flare",
        "title",
        "score",
        "date",
        "num_comments",
        "body",
    ];
}

impl From<RawPost> for Post {
    fn from(raw: RawPost) -> Self {
        let (author_id, author_verified) = match raw.author {
            Some(author) => (author.id, author.has_verified_email),
            None => (None, None),
        };
        Self {
            post_id: raw.id,
            subreddit: raw.subreddit,
            author_id,
            author_verified,
            flare: raw.author_flair_text,
            title: raw.title,
            score: raw.score,
            date: format_utc(raw.created_utc),
            num_comments: raw.num_comments,
            body: raw.selftext,
        }
    }
}

/// A flattened comment, stamped with the post it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub post_id: String,
    pub comment_id: String,
    /// Author name, or [`DELETED_AUTHOR`].
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: String,
}

impl Comment {
    pub const COLUMNS: &'static [&'static str] =
        &["post_id", "comment_id", "author", "body", "score", "created_utc"];

    pub fn from_raw(post_id: &str, raw: RawComment) -> Self {
        Self {
            post_id: post_id.to_string(),
            comment_id: raw.id,
            author: raw.author.unwrap_or_else(|| DELETED_AUTHOR.to_string()),
            body: raw.body,
            score: raw.score,
            created_utc: format_utc(raw.created_utc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Author;

    fn raw_post(author: Option<Author>) -> RawPost {
        RawPost {
            id: "1hxyz".to_string(),
            subreddit: "Altadena".to_string(),
            author,
            author_flair_text: None,
            title: "Eaton fire evacuation map".to_string(),
            score: 42,
            created_utc: 1_736_294_400.0,
            num_comments: 7,
            selftext: "".to_string(),
        }
    }

    #[test]
    fn test_post_normalizes_date() {
        let post = Post::from(raw_post(None));
        assert_eq!(post.date, "2025-01-08 00:00:00");
        assert_eq!(post.post_id, "1hxyz");
    }

    #[test]
    fn test_post_with_deleted_author_has_null_identity() {
        let post = Post::from(raw_post(None));
        assert_eq!(post.author_id, None);
        assert_eq!(post.author_verified, None);
    }

    #[test]
    fn test_post_keeps_author_identity() {
        let post = Post::from(raw_post(Some(Author {
            id: Some("abc12".to_string()),
            has_verified_email: Some(true),
        })));
        assert_eq!(post.author_id.as_deref(), Some("abc12"));
        assert_eq!(post.author_verified, Some(true));
    }

    #[test]
    fn test_comment_marks_deleted_author() {
        let comment = Comment::from_raw(
            "1hxyz",
            RawComment {
                id: "m1".to_string(),
                author: None,
                body: "stay safe".to_string(),
                score: 3,
                created_utc: 1_736_294_461.0,
            },
        );
        assert_eq!(comment.author, DELETED_AUTHOR);
        assert_eq!(comment.post_id, "1hxyz");
        assert_eq!(comment.created_utc, "2025-01-08 00:01:01");
    }

    #[test]
    fn test_columns_match_serialized_field_order() {
        let post = Post::from(raw_post(None));
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.serialize(&post).unwrap();
        let out = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
        let header = out.lines().next().unwrap();
        assert_eq!(header, Post::COLUMNS.join(","));
    }
}
