//! Client for the feed-normalization service that turns any syndication feed
//! into a uniform JSON document.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::model::FeedEntry;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed normalizer returned {0}")]
    Transport(StatusCode),
    #[error("failed to reach feed normalizer: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed feed payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid feed normalizer URL: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch at most `max_entries` entries from the feed at `url`.
    async fn fetch(&self, url: &str, max_entries: u32) -> Result<Vec<FeedEntry>, FetchError>;
}

#[derive(Clone)]
pub struct FeedClient {
    http: Client,
    base_url: Url,
    timeout_ms: u64,
}

impl fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl FeedClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)?;
        let http = Client::builder()
            .user_agent(concat!("feed2forum/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            timeout_ms,
        })
    }

    pub fn query(&self, url: &str, max_entries: u32) -> String {
        format!(
            "select entry FROM feednormalizer WHERE url='{}' AND output='atom_1.0' AND timeout='{}' | truncate(count={})",
            url, self.timeout_ms, max_entries
        )
    }

    pub fn build_request(&self, url: &str, max_entries: u32) -> Result<reqwest::Request, FetchError> {
        let q = self.query(url, max_entries);
        Ok(self
            .http
            .get(self.base_url.clone())
            .query(&[("q", q.as_str()), ("format", "json")])
            .build()?)
    }
}

#[async_trait]
impl FeedSource for FeedClient {
    #[instrument(skip_all, fields(url = %url, max_entries = max_entries))]
    async fn fetch(&self, url: &str, max_entries: u32) -> Result<Vec<FeedEntry>, FetchError> {
        let request = self.build_request(url, max_entries)?;
        let res = self.http.execute(request).await?;
        if res.status() != StatusCode::OK {
            return Err(FetchError::Transport(res.status()));
        }
        let body = res.text().await?;
        let entries = parse_response(&body)?;
        debug!(count = entries.len(), "fetched feed entries");
        Ok(entries)
    }
}

/// Parse a normalizer response. A zero result count yields no entries.
pub fn parse_response(body: &str) -> Result<Vec<FeedEntry>, FetchError> {
    let payload: NormalizerResponse = serde_json::from_str(body)?;
    if payload.query.count == 0 {
        return Ok(Vec::new());
    }
    let items = match payload.query.results.and_then(|r| r.feed) {
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
        None => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| item.entry)
        .filter_map(RawEntry::into_entry)
        .collect())
}

/// Accepts RFC 3339 first, then RFC 2822.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[derive(Deserialize)]
struct NormalizerResponse {
    query: Query,
}

#[derive(Deserialize)]
struct Query {
    count: u64,
    results: Option<Results>,
}

#[derive(Deserialize)]
struct Results {
    feed: Option<OneOrMany<FeedItem>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

#[derive(Deserialize)]
struct FeedItem {
    entry: Option<RawEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Text {
    Plain(String),
    Rich { content: String },
}

#[derive(Deserialize)]
struct Link {
    href: Option<String>,
}

#[derive(Deserialize, Default)]
struct Author {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct Category {
    term: Option<String>,
}

#[derive(Deserialize)]
struct RawEntry {
    title: Option<Text>,
    link: Option<OneOrMany<Link>>,
    #[serde(default)]
    author: Author,
    published: Option<String>,
    category: Option<OneOrMany<Category>>,
}

impl RawEntry {
    fn into_entry(self) -> Option<FeedEntry> {
        let title = match self.title {
            Some(Text::Plain(s)) | Some(Text::Rich { content: s }) => s,
            None => String::new(),
        };
        let Some(published) = self.published.as_deref().and_then(parse_published) else {
            warn!(title = %title, published = ?self.published, "skipping entry without a usable published date");
            return None;
        };
        // Blank hrefs and terms count as absent.
        let link = match self.link {
            Some(OneOrMany::One(l)) => l.href.filter(|h| !h.is_empty()),
            Some(OneOrMany::Many(ls)) => ls.into_iter().find_map(|l| l.href.filter(|h| !h.is_empty())),
            None => None,
        };
        let category = match self.category {
            Some(OneOrMany::One(c)) => c.term.filter(|t| !t.is_empty()),
            Some(OneOrMany::Many(cs)) => cs.into_iter().find_map(|c| c.term.filter(|t| !t.is_empty())),
            None => None,
        };
        Some(FeedEntry {
            title,
            link,
            author: self.author.name,
            published,
            category,
        })
    }
}
