//! Runtime sync settings, stored as one JSON record in the forum database.
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::model::{Interval, TimestampPolicy};

pub const PLUGIN_ID: &str = "tdwtfarticles";
pub const SETTINGS_VERSION: &str = "0.5";

/// Maps a feed author's display name to a forum username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorMapping {
    pub name: String,
    pub user: String,
}

/// Settings for a sync run. Missing keys take their default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub url: String,
    pub interval: Interval,
    pub entries: u32,
    pub timestamp: TimestampPolicy,
    /// Epoch millis of the newest accepted entry.
    pub latest_date: i64,
    pub category: i64,
    pub tag_with_category: bool,
    /// Comma-separated default tags.
    pub tags: String,
    pub user_name: String,
    pub authors: Vec<AuthorMapping>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://syndication.thedailywtf.com/TheDailyWtf".into(),
            interval: Interval::Hour,
            entries: 4,
            timestamp: TimestampPolicy::Now,
            latest_date: 0,
            category: 1,
            tag_with_category: true,
            tags: String::new(),
            user_name: String::new(),
            authors: vec![AuthorMapping {
                name: "Alex Papadimoulis".into(),
                user: "apapadimoulis".into(),
            }],
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings, defaults filled in.
    async fn get(&self) -> Result<SyncConfig>;

    /// Set the watermark and persist it.
    async fn set_latest_date(&self, latest_date: i64) -> Result<()>;

    /// Replace the whole record.
    async fn replace(&self, cfg: &SyncConfig) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteSettings {
    pool: SqlitePool,
}

impl SqliteSettings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write(&self, cfg: &SyncConfig) -> Result<()> {
        let value = serde_json::to_string(cfg).context("failed to encode settings")?;
        sqlx::query(
            "INSERT INTO plugin_settings (plugin, version, value) VALUES (?, ?, ?)
             ON CONFLICT(plugin) DO UPDATE SET version = excluded.version, value = excluded.value",
        )
        .bind(PLUGIN_ID)
        .bind(SETTINGS_VERSION)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for SqliteSettings {
    #[instrument(skip_all)]
    async fn get(&self) -> Result<SyncConfig> {
        let raw = sqlx::query_scalar::<_, String>("SELECT value FROM plugin_settings WHERE plugin = ?")
            .bind(PLUGIN_ID)
            .fetch_optional(&self.pool)
            .await?;
        match raw {
            Some(raw) => serde_json::from_str(&raw).context("stored settings are not valid JSON"),
            None => Ok(SyncConfig::default()),
        }
    }

    #[instrument(skip_all)]
    async fn set_latest_date(&self, latest_date: i64) -> Result<()> {
        let mut cfg = self.get().await?;
        cfg.latest_date = latest_date;
        self.write(&cfg).await?;
        info!(latest_date, "persisted watermark");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn replace(&self, cfg: &SyncConfig) -> Result<()> {
        self.write(cfg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    #[test]
    fn partial_record_takes_defaults() {
        let cfg: SyncConfig =
            serde_json::from_str(r#"{"enabled":true,"interval":"halfDay","timestamp":"article-date"}"#).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.interval, Interval::HalfDay);
        assert_eq!(cfg.timestamp, TimestampPolicy::Article);
        assert_eq!(cfg.entries, 4);
        assert_eq!(cfg.authors[0].user, "apapadimoulis");
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let value = serde_json::to_value(SyncConfig::default()).unwrap();
        assert_eq!(value["latestDate"], 0);
        assert_eq!(value["tagWithCategory"], true);
        assert_eq!(value["userName"], "");
        assert_eq!(value["interval"], "hour");
    }

    #[tokio::test]
    async fn empty_store_returns_defaults() {
        let store = SqliteSettings::new(setup_pool().await);
        assert_eq!(store.get().await.unwrap(), SyncConfig::default());
    }

    #[tokio::test]
    async fn set_latest_date_keeps_other_fields() {
        let store = SqliteSettings::new(setup_pool().await);
        let cfg = SyncConfig { enabled: true, tags: "a,b".into(), ..SyncConfig::default() };
        store.replace(&cfg).await.unwrap();

        store.set_latest_date(1_464_003_000_000).await.unwrap();
        let loaded = store.get().await.unwrap();
        assert_eq!(loaded.latest_date, 1_464_003_000_000);
        assert!(loaded.enabled);
        assert_eq!(loaded.tags, "a,b");
    }
}
