//! One sync run: fetch, filter, publish, persist the watermark.
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::feed::FeedSource;
use crate::filter::filter_new;
use crate::publisher::{PublishError, Publisher};
use crate::settings::SettingsStore;

/// What a run did.
#[derive(Debug, Default)]
pub struct RunReport {
    pub fetched: usize,
    pub accepted: usize,
    pub published: usize,
    pub failures: Vec<(String, PublishError)>,
    pub previous_watermark: i64,
    pub watermark: i64,
    pub persisted: bool,
}

#[derive(Clone)]
pub struct SyncDriver {
    settings: Arc<dyn SettingsStore>,
    feed: Arc<dyn FeedSource>,
    publisher: Publisher,
}

impl SyncDriver {
    pub fn new(settings: Arc<dyn SettingsStore>, feed: Arc<dyn FeedSource>, publisher: Publisher) -> Self {
        Self {
            settings,
            feed,
            publisher,
        }
    }

    /// Scheduler entry point. Every error is logged here and never escapes.
    pub async fn run(&self) {
        let span = tracing::info_span!("sync_run", run_id = %Uuid::new_v4());
        async {
            info!("Getting articles from RSS feed.");
            match self.run_once().await {
                Ok(report) => info!(
                    fetched = report.fetched,
                    accepted = report.accepted,
                    published = report.published,
                    failed = report.failures.len(),
                    watermark = report.watermark,
                    "sync run finished"
                ),
                Err(err) => error!(?err, "sync run failed"),
            }
        }
        .instrument(span)
        .await
    }

    /// A single run. Fails only when settings cannot be read, the feed cannot
    /// be fetched or the watermark cannot be saved; per-entry publish errors
    /// are collected in the report and do not stop later entries.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> Result<RunReport> {
        let cfg = self.settings.get().await.context("failed to load settings")?;
        let entries = self
            .feed
            .fetch(&cfg.url, cfg.entries)
            .await
            .context("failed to fetch feed")?;

        let filtered = filter_new(&entries, cfg.latest_date);
        let mut report = RunReport {
            fetched: entries.len(),
            accepted: filtered.accepted.len(),
            previous_watermark: cfg.latest_date,
            watermark: filtered.watermark,
            ..RunReport::default()
        };

        for entry in &filtered.accepted {
            match self.publisher.publish(&cfg, entry).await {
                Ok(created) => {
                    report.published += 1;
                    info!(tid = created.tid, uid = created.uid, title = %entry.title, "posted article");
                }
                Err(err) => {
                    warn!(error = %err, title = %entry.title, "failed to post article");
                    report.failures.push((entry.title.clone(), err));
                }
            }
        }

        if report.watermark > cfg.latest_date {
            self.settings
                .set_latest_date(report.watermark)
                .await
                .context("failed to persist watermark")?;
            report.persisted = true;
        }

        Ok(report)
    }
}
