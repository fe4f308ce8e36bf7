use chrono::Utc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::forum::{post_index_keys, topic_index_keys, Forum};
use crate::identity;
use crate::model::{CreatedPost, FeedEntry, TimestampPolicy};
use crate::settings::SyncConfig;
use crate::transform::transform;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("unknown user '{username}': {source}")]
    Lookup {
        username: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("forum rejected the post: {0}")]
    PostCreation(#[source] anyhow::Error),
    #[error("forum call '{step}' failed: {source}")]
    Host {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Posts feed entries to the forum, one at a time.
#[derive(Clone)]
pub struct Publisher {
    forum: Forum,
    cooldown_offset_seconds: i64,
}

impl Publisher {
    pub fn new(forum: Forum, cooldown_offset_seconds: i64) -> Self {
        Self {
            forum,
            cooldown_offset_seconds,
        }
    }

    /// Resolve the author, create the topic, optionally backdate it, then clear
    /// the author's posting cooldown. Stops at the first failing step.
    #[instrument(skip_all, fields(title = %entry.title))]
    pub async fn publish(&self, cfg: &SyncConfig, entry: &FeedEntry) -> Result<CreatedPost, PublishError> {
        debug!("Posting {}", entry.title);

        let identity = identity::resolve(&self.forum, cfg, &entry.author).await?;
        let request = transform(cfg, entry, &identity);
        let created = self
            .forum
            .posts
            .post(&request)
            .await
            .map_err(PublishError::PostCreation)?;

        if cfg.timestamp == TimestampPolicy::Article {
            self.backdate(&created, entry.published_millis()).await?;
        }

        let last_post_time = Utc::now().timestamp_millis() - self.cooldown_offset_seconds * 1000;
        self.forum
            .users
            .set_user_field(identity.uid, "lastposttime", last_post_time)
            .await
            .map_err(|source| PublishError::Host {
                step: "lastposttime",
                source,
            })?;

        Ok(created)
    }

    /// Rewrite the topic and post times, and their index scores, to `timestamp`.
    async fn backdate(&self, created: &CreatedPost, timestamp: i64) -> Result<(), PublishError> {
        let host = |source| PublishError::Host {
            step: "backdate",
            source,
        };
        let records = &self.forum.records;
        records
            .set_object_field(&format!("topic:{}", created.tid), "timestamp", timestamp)
            .await
            .map_err(host)?;
        records
            .sorted_sets_add(&topic_index_keys(created.cid, created.uid), timestamp, created.tid)
            .await
            .map_err(host)?;
        records
            .set_object_field(&format!("post:{}", created.pid), "timestamp", timestamp)
            .await
            .map_err(host)?;
        records
            .sorted_sets_add(&post_index_keys(created.cid), timestamp, created.pid)
            .await
            .map_err(host)?;
        Ok(())
    }
}
