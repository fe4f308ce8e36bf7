use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which recurring schedule triggers a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Interval {
    Minute,
    Hour,
    HalfDay,
    Day,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::Hour => "hour",
            Interval::HalfDay => "halfDay",
            Interval::Day => "day",
        }
    }

    /// Five-field cron expression the scheduler runs on, in UTC.
    pub fn cron(&self) -> &'static str {
        match self {
            Interval::Minute => "* * * * *",
            Interval::Hour => "0 * * * *",
            Interval::HalfDay => "0 0/12 * * *",
            Interval::Day => "0 0 * * *",
        }
    }
}

/// Which time a created topic should carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimestampPolicy {
    Now,
    #[serde(alias = "article-date")]
    Article,
}

impl TimestampPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampPolicy::Now => "now",
            TimestampPolicy::Article => "article",
        }
    }
}

/// One syndicated article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: Option<String>,
    pub author: String,
    pub published: DateTime<Utc>,
    pub category: Option<String>,
}

impl FeedEntry {
    pub fn published_millis(&self) -> i64 {
        self.published.timestamp_millis()
    }
}

/// Resolved author for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: i64,
    pub can_create_topics: bool,
}

/// Payload handed to the forum's post-creation API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostRequest {
    pub uid: i64,
    pub title: String,
    pub content: String,
    pub cid: i64,
    pub tags: Vec<String>,
}

/// What the forum reports back after creating a topic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedPost {
    pub tid: i64,
    pub pid: i64,
    pub cid: i64,
    pub uid: i64,
}

/// Category privileges for one user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryPrivileges {
    pub cid: i64,
    pub uid: i64,
    pub topics_create: bool,
}
