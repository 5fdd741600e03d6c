//! Reddit record source over the public JSON endpoints.
//!
//! Every listing page on `www.reddit.com` is also served as JSON by appending
//! `.json`. This client uses four of them:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | search | `/r/{scope}/search.json?restrict_sr=1` |
//! | thread | `/comments/{id}.json` |
//! | expand (hidden siblings) | `/api/morechildren.json` |
//! | expand (continue thread) | `/comments/{id}/_/{comment}.json` |
//!
//! Unknown communities answer with a 404 or a redirect to the community
//! search page, private ones with a 403; all become [`SourceError::NotFound`]. Redirects are never
//! followed for that reason.

use super::{
    Author, MorePlaceholder, Page, RawComment, RawPost, RecordSource, ReplyNode, SearchRequest,
    Thread,
};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::utils::truncate_for_log;
use reqwest::{Client, StatusCode, redirect};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

/// Maximum number of ids `morechildren` accepts per call.
const MORE_CHILDREN_BATCH: usize = 100;

const DELETED: &str = "[deleted]";

/// Client for the public Reddit JSON API.
#[derive(Debug, Clone)]
pub struct RedditClient {
    http: Client,
    base_url: Url,
    page_limit: u32,
    /// `has_verified_email` per author name; `None` when the lookup failed.
    verified: Arc<Mutex<HashMap<String, Option<bool>>>>,
}

impl RedditClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SourceError::Parse(format!("base url {}: {e}", config.base_url)))?;
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            base_url,
            page_limit: config.page_limit,
            verified: Arc::default(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url
            .join(path)
            .map_err(|e| SourceError::Parse(format!("endpoint {path}: {e}")))
    }

    #[instrument(level = "debug", skip_all, fields(url = %url))]
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        let t0 = Instant::now();
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        debug!(%status, elapsed_ms = t0.elapsed().as_millis() as u64, "Response received");

        if matches!(status, StatusCode::NOT_FOUND | StatusCode::FORBIDDEN) || status.is_redirection() {
            return Err(SourceError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, body = %truncate_for_log(&body, 300), "Unexpected response shape");
            SourceError::Parse(e.to_string())
        })
    }

    /// Whether `name` has a verified email, looked up once per author.
    async fn author_verified(&self, name: &str) -> Option<bool> {
        if let Some(&cached) = self.verified.lock().ok()?.get(name) {
            return cached;
        }

        let lookup = match self.endpoint(&format!("user/{name}/about.json")) {
            Ok(url) => self.get_json::<UserAbout>(url).await,
            Err(e) => Err(e),
        };
        let verified = match lookup {
            Ok(about) => about.data.has_verified_email,
            Err(e) => {
                debug!(author = %name, error = %e, "Author lookup failed");
                None
            }
        };
        if let Ok(mut cache) = self.verified.lock() {
            cache.insert(name.to_string(), verified);
        }
        verified
    }

    async fn more_children(
        &self,
        post_id: &str,
        children: &[String],
    ) -> Result<Vec<ReplyNode>, SourceError> {
        let mut nodes = Vec::new();
        for chunk in children.chunks(MORE_CHILDREN_BATCH) {
            let mut url = self.endpoint("api/morechildren.json")?;
            url.query_pairs_mut()
                .append_pair("api_type", "json")
                .append_pair("raw_json", "1")
                .append_pair("link_id", &format!("t3_{post_id}"))
                .append_pair("children", &chunk.join(","));
            let resp: MoreChildrenResponse = self.get_json(url).await?;
            nodes.extend(resp.json.data.things.into_iter().filter_map(Thing::into_reply));
        }
        Ok(nodes)
    }

    async fn continue_thread(
        &self,
        post_id: &str,
        parent_id: &str,
    ) -> Result<Vec<ReplyNode>, SourceError> {
        let Some(comment_id) = parent_id.strip_prefix("t1_") else {
            return Ok(Vec::new());
        };
        let mut url = self.endpoint(&format!("comments/{post_id}/_/{comment_id}.json"))?;
        url.query_pairs_mut().append_pair("raw_json", "1");
        let (_, comments): (Listing, Listing) = self.get_json(url).await?;

        // The response is rooted at the parent comment, which is already known.
        let replies = comments
            .data
            .children
            .into_iter()
            .filter_map(Thing::into_reply)
            .flat_map(|node| match node {
                ReplyNode::Comment { replies, .. } => replies,
                ReplyNode::More(_) => Vec::new(),
            })
            .collect();
        Ok(replies)
    }
}

impl RecordSource for RedditClient {
    #[instrument(level = "info", skip_all, fields(scope = %request.scope, query = %request.query))]
    async fn search_page(
        &self,
        request: &SearchRequest,
        after: Option<&str>,
    ) -> Result<Page<RawPost>, SourceError> {
        let mut url = self.endpoint(&format!("r/{}/search.json", request.scope))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("q", &request.query)
                .append_pair("restrict_sr", "1")
                .append_pair("sort", &request.sort)
                .append_pair("t", &request.window)
                .append_pair("limit", &self.page_limit.to_string())
                .append_pair("raw_json", "1");
            if let Some(after) = after {
                q.append_pair("after", after);
            }
        }

        let listing: Listing = self.get_json(url).await?;
        let mut items = Vec::with_capacity(listing.data.children.len());
        for thing in listing.data.children {
            let Thing::Post(data) = thing else {
                continue;
            };
            let name = data.live_author().map(String::from);
            let mut post = RawPost::from(data);
            if let (Some(author), Some(name)) = (post.author.as_mut(), name) {
                author.has_verified_email = self.author_verified(&name).await;
            }
            items.push(post);
        }
        debug!(count = items.len(), after = ?listing.data.after, "Search page");
        Ok(Page {
            items,
            after: listing.data.after,
        })
    }

    #[instrument(level = "info", skip_all, fields(%post_id))]
    async fn thread(&self, post_id: &str) -> Result<Thread, SourceError> {
        let mut url = self.endpoint(&format!("comments/{post_id}.json"))?;
        url.query_pairs_mut()
            .append_pair("limit", "500")
            .append_pair("raw_json", "1");
        let (posts, comments): (Listing, Listing) = self.get_json(url).await?;

        let post = posts
            .data
            .children
            .into_iter()
            .find_map(|thing| match thing {
                Thing::Post(data) => Some(RawPost::from(data)),
                _ => None,
            })
            .ok_or_else(|| SourceError::NotFound(format!("post {post_id}")))?;
        let replies = comments
            .data
            .children
            .into_iter()
            .filter_map(Thing::into_reply)
            .collect();
        Ok(Thread { post, replies })
    }

    #[instrument(level = "debug", skip_all, fields(%post_id, parent = %placeholder.parent_id))]
    async fn expand_more(
        &self,
        post_id: &str,
        placeholder: &MorePlaceholder,
    ) -> Result<Vec<ReplyNode>, SourceError> {
        if placeholder.children.is_empty() {
            self.continue_thread(post_id, &placeholder.parent_id).await
        } else {
            self.more_children(post_id, &placeholder.children).await
        }
    }
}

// ---- Wire format ----

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    after: Option<String>,
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", content = "data")]
enum Thing {
    #[serde(rename = "t3")]
    Post(PostData),
    #[serde(rename = "t1")]
    Comment(CommentData),
    #[serde(rename = "more")]
    More(MoreData),
}

impl Thing {
    fn into_reply(self) -> Option<ReplyNode> {
        match self {
            Thing::Comment(data) => Some(data.into_node()),
            Thing::More(data) => Some(ReplyNode::More(MorePlaceholder {
                parent_id: data.parent_id,
                children: data.children,
            })),
            Thing::Post(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    subreddit: String,
    author: Option<String>,
    author_fullname: Option<String>,
    author_flair_text: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    score: i64,
    created_utc: f64,
    #[serde(default)]
    num_comments: u64,
    #[serde(default)]
    selftext: String,
}

impl PostData {
    /// Author name, unless the account is gone.
    fn live_author(&self) -> Option<&str> {
        self.author.as_deref().filter(|name| *name != DELETED)
    }
}

/// Verification is resolved separately; see `RedditClient::author_verified`.
impl From<PostData> for RawPost {
    fn from(data: PostData) -> Self {
        let author = data
            .author
            .filter(|name| name != DELETED)
            .map(|_| Author {
                id: data
                    .author_fullname
                    .map(|full| full.trim_start_matches("t2_").to_string()),
                has_verified_email: None,
            });
        RawPost {
            id: data.id,
            subreddit: data.subreddit,
            author,
            author_flair_text: data.author_flair_text,
            title: data.title,
            score: data.score,
            created_utc: data.created_utc,
            num_comments: data.num_comments,
            selftext: data.selftext,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    author: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    created_utc: f64,
    #[serde(default)]
    replies: Option<Replies>,
}

impl CommentData {
    fn into_node(self) -> ReplyNode {
        let replies = match self.replies {
            Some(Replies::Listing(listing)) => listing
                .data
                .children
                .into_iter()
                .filter_map(Thing::into_reply)
                .collect(),
            _ => Vec::new(),
        };
        ReplyNode::Comment {
            comment: RawComment {
                id: self.id,
                author: self.author.filter(|name| name != DELETED),
                body: self.body,
                score: self.score,
                created_utc: self.created_utc,
            },
            replies,
        }
    }
}

/// Reddit sends `""` instead of a listing when a comment has no replies.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Replies {
    Listing(Listing),
    Empty(#[allow(dead_code)] String),
}

#[derive(Debug, Deserialize)]
struct MoreData {
    parent_id: String,
    #[serde(default)]
    children: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserAbout {
    data: UserData,
}

/// Suspended accounts omit most fields, including `has_verified_email`.
#[derive(Debug, Deserialize)]
struct UserData {
    has_verified_email: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenResponse {
    json: MoreChildrenJson,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenJson {
    data: MoreChildrenData,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenData {
    #[serde(default)]
    things: Vec<Thing>,
}
