//! Contracts for the forum the syncer posts into, plus a SQLite-backed adapter.
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::model::{CategoryPrivileges, CreatedPost, PostRequest};

/// Forum administrator; holds every privilege.
pub const ADMIN_UID: i64 = 1;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fails when no user has this username.
    async fn uid_by_username(&self, username: &str) -> Result<i64>;

    async fn set_user_field(&self, uid: i64, field: &str, value: i64) -> Result<()>;
}

#[async_trait]
pub trait Privileges: Send + Sync {
    async fn category_privileges(&self, cid: i64, uid: i64) -> Result<CategoryPrivileges>;
}

#[async_trait]
pub trait PostService: Send + Sync {
    async fn post(&self, request: &PostRequest) -> Result<CreatedPost>;
}

/// Low-level record access, used to rewrite timestamps after the fact.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn set_object_field(&self, key: &str, field: &str, value: i64) -> Result<()>;

    async fn sorted_sets_add(&self, keys: &[String], score: i64, member: i64) -> Result<()>;
}

/// Handles to every forum service the publisher needs.
#[derive(Clone)]
pub struct Forum {
    pub users: Arc<dyn UserDirectory>,
    pub privileges: Arc<dyn Privileges>,
    pub posts: Arc<dyn PostService>,
    pub records: Arc<dyn RecordStore>,
}

impl Forum {
    /// Use one implementation for all four services.
    pub fn from_shared<T>(inner: Arc<T>) -> Self
    where
        T: UserDirectory + Privileges + PostService + RecordStore + 'static,
    {
        Self {
            users: inner.clone(),
            privileges: inner.clone(),
            posts: inner.clone(),
            records: inner,
        }
    }
}

/// Keys of the time-ordered indexes a topic appears in.
pub fn topic_index_keys(cid: i64, uid: i64) -> Vec<String> {
    vec![
        "topics:tid".to_string(),
        format!("cid:{cid}:tids"),
        format!("cid:{cid}:uid:{uid}:tids"),
        format!("uid:{uid}:topics"),
    ]
}

/// Keys of the time-ordered indexes a post appears in.
pub fn post_index_keys(cid: i64) -> Vec<String> {
    vec!["posts:pid".to_string(), format!("cid:{cid}:pids")]
}

#[derive(Debug, Clone)]
pub struct SqliteForum {
    pool: SqlitePool,
}

impl SqliteForum {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn sorted_sets_add_tx(
    tx: &mut Transaction<'_, Sqlite>,
    keys: &[String],
    score: i64,
    member: i64,
) -> Result<()> {
    for key in keys {
        sqlx::query(
            "INSERT INTO sorted_sets (key, member, score) VALUES (?, ?, ?)
             ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
        )
        .bind(key)
        .bind(member.to_string())
        .bind(score)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl UserDirectory for SqliteForum {
    #[instrument(skip_all)]
    async fn uid_by_username(&self, username: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT uid FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("no user named '{}'", username))
    }

    #[instrument(skip_all)]
    async fn set_user_field(&self, uid: i64, field: &str, value: i64) -> Result<()> {
        if field != "lastposttime" {
            bail!("unsupported user field '{}'", field);
        }
        let res = sqlx::query("UPDATE users SET lastposttime = ? WHERE uid = ?")
            .bind(value)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            bail!("no user with uid {}", uid);
        }
        Ok(())
    }
}

#[async_trait]
impl Privileges for SqliteForum {
    #[instrument(skip_all)]
    async fn category_privileges(&self, cid: i64, uid: i64) -> Result<CategoryPrivileges> {
        let granted = sqlx::query_scalar::<_, bool>(
            "SELECT topics_create FROM category_privileges WHERE cid = ? AND uid = ?",
        )
        .bind(cid)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or(false);
        Ok(CategoryPrivileges {
            cid,
            uid,
            topics_create: granted || uid == ADMIN_UID,
        })
    }
}

#[async_trait]
impl PostService for SqliteForum {
    #[instrument(skip_all, fields(cid = request.cid, uid = request.uid))]
    async fn post(&self, request: &PostRequest) -> Result<CreatedPost> {
        if request.title.trim().is_empty() {
            bail!("topic title is empty");
        }
        let privileges = self.category_privileges(request.cid, request.uid).await?;
        if !privileges.topics_create {
            bail!("user {} may not create topics in category {}", request.uid, request.cid);
        }

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let tid: i64 = sqlx::query_scalar(
            "INSERT INTO topics (cid, uid, title, timestamp) VALUES (?, ?, ?, ?) RETURNING tid",
        )
        .bind(request.cid)
        .bind(request.uid)
        .bind(&request.title)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert topic")?;
        let pid: i64 = sqlx::query_scalar(
            "INSERT INTO posts (tid, uid, content, timestamp) VALUES (?, ?, ?, ?) RETURNING pid",
        )
        .bind(tid)
        .bind(request.uid)
        .bind(&request.content)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert post")?;
        for (position, tag) in request.tags.iter().enumerate() {
            sqlx::query("INSERT INTO topic_tags (tid, position, tag) VALUES (?, ?, ?)")
                .bind(tid)
                .bind(position as i64)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }
        sorted_sets_add_tx(&mut tx, &topic_index_keys(request.cid, request.uid), now, tid).await?;
        sorted_sets_add_tx(&mut tx, &post_index_keys(request.cid), now, pid).await?;
        tx.commit().await?;

        debug!(tid, pid, "created topic");
        Ok(CreatedPost {
            tid,
            pid,
            cid: request.cid,
            uid: request.uid,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteForum {
    #[instrument(skip_all)]
    async fn set_object_field(&self, key: &str, field: &str, value: i64) -> Result<()> {
        if field != "timestamp" {
            bail!("unsupported field '{}' on {}", field, key);
        }
        let sql = match key.split_once(':') {
            Some(("topic", _)) => "UPDATE topics SET timestamp = ? WHERE tid = ?",
            Some(("post", _)) => "UPDATE posts SET timestamp = ? WHERE pid = ?",
            _ => bail!("unsupported record key '{}'", key),
        };
        let id: i64 = key
            .split_once(':')
            .map(|(_, id)| id)
            .unwrap_or_default()
            .parse()
            .with_context(|| format!("invalid record key '{}'", key))?;
        sqlx::query(sql).bind(value).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn sorted_sets_add(&self, keys: &[String], score: i64, member: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sorted_sets_add_tx(&mut tx, keys, score, member).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn setup_forum() -> SqliteForum {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        SqliteForum::new(pool)
    }

    async fn add_user(forum: &SqliteForum, name: &str, can_post_in: Option<i64>) -> i64 {
        let uid: i64 = sqlx::query_scalar("INSERT INTO users (username) VALUES (?) RETURNING uid")
            .bind(name)
            .fetch_one(forum.pool())
            .await
            .unwrap();
        if let Some(cid) = can_post_in {
            sqlx::query("INSERT INTO category_privileges (cid, uid, topics_create) VALUES (?, ?, 1)")
                .bind(cid)
                .bind(uid)
                .execute(forum.pool())
                .await
                .unwrap();
        }
        uid
    }

    fn request(uid: i64) -> PostRequest {
        PostRequest {
            uid,
            title: "Representative Line".into(),
            content: "https://example.com/a\n\nBy Remy".into(),
            cid: 1,
            tags: vec!["a".into(), "b".into()],
        }
    }

    #[tokio::test]
    async fn unknown_username_is_an_error() {
        let forum = setup_forum().await;
        assert_eq!(forum.uid_by_username("admin").await.unwrap(), ADMIN_UID);
        let err = forum.uid_by_username("ghost").await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn privileges_follow_grants_and_admin() {
        let forum = setup_forum().await;
        let writer = add_user(&forum, "writer", Some(1)).await;
        let reader = add_user(&forum, "reader", None).await;
        assert!(forum.category_privileges(1, writer).await.unwrap().topics_create);
        assert!(!forum.category_privileges(1, reader).await.unwrap().topics_create);
        assert!(forum.category_privileges(1, ADMIN_UID).await.unwrap().topics_create);
    }

    #[tokio::test]
    async fn post_writes_topic_tags_and_indexes() {
        let forum = setup_forum().await;
        let uid = add_user(&forum, "writer", Some(1)).await;
        let created = forum.post(&request(uid)).await.unwrap();
        assert_eq!(created.cid, 1);
        assert_eq!(created.uid, uid);

        let tags: Vec<String> = sqlx::query_scalar("SELECT tag FROM topic_tags WHERE tid = ? ORDER BY position")
            .bind(created.tid)
            .fetch_all(forum.pool())
            .await
            .unwrap();
        assert_eq!(tags, vec!["a", "b"]);

        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM sorted_sets ORDER BY key")
            .fetch_all(forum.pool())
            .await
            .unwrap();
        assert_eq!(keys.len(), 6);
        assert!(keys.contains(&format!("cid:1:uid:{uid}:tids")));
    }

    #[tokio::test]
    async fn post_rejects_user_without_privilege() {
        let forum = setup_forum().await;
        let uid = add_user(&forum, "reader", None).await;
        assert!(forum.post(&request(uid)).await.is_err());
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM topics")
            .fetch_one(forum.pool())
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn record_store_rewrites_timestamps() {
        let forum = setup_forum().await;
        let created = forum.post(&request(ADMIN_UID)).await.unwrap();
        forum
            .set_object_field(&format!("topic:{}", created.tid), "timestamp", 42)
            .await
            .unwrap();
        forum
            .set_object_field(&format!("post:{}", created.pid), "timestamp", 42)
            .await
            .unwrap();
        forum
            .sorted_sets_add(&topic_index_keys(1, ADMIN_UID), 42, created.tid)
            .await
            .unwrap();

        let ts: i64 = sqlx::query_scalar("SELECT timestamp FROM topics WHERE tid = ?")
            .bind(created.tid)
            .fetch_one(forum.pool())
            .await
            .unwrap();
        assert_eq!(ts, 42);
        let score: i64 = sqlx::query_scalar("SELECT score FROM sorted_sets WHERE key = 'topics:tid' AND member = ?")
            .bind(created.tid.to_string())
            .fetch_one(forum.pool())
            .await
            .unwrap();
        assert_eq!(score, 42);

        assert!(forum.set_object_field("user:1", "timestamp", 1).await.is_err());
    }

    #[tokio::test]
    async fn set_user_field_updates_last_post_time() {
        let forum = setup_forum().await;
        forum.set_user_field(ADMIN_UID, "lastposttime", 1234).await.unwrap();
        let v: i64 = sqlx::query_scalar("SELECT lastposttime FROM users WHERE uid = 1")
            .fetch_one(forum.pool())
            .await
            .unwrap();
        assert_eq!(v, 1234);
        assert!(forum.set_user_field(ADMIN_UID, "email", 1).await.is_err());
        assert!(forum.set_user_field(999, "lastposttime", 1).await.is_err());
    }
}
