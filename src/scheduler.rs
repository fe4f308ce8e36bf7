//! Runs the sync driver on the configured cron interval.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::model::Interval;
use crate::settings::{SettingsStore, SyncConfig};
use crate::sync::SyncDriver;

/// Parsed cron schedule for `interval`. The five-field expression gets a
/// leading seconds field.
pub fn schedule(interval: Interval) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&format!("0 {}", interval.cron()))
}

/// First tick of `interval` strictly after `after`, in UTC.
pub fn next_tick(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

struct Job {
    interval: Interval,
    stop: watch::Sender<bool>,
}

/// Owns at most one scheduled job. Only a primary instance ever starts or
/// stops it. Stopping a job ends its timer; a run already in progress is
/// always allowed to finish.
pub struct Scheduler {
    primary: bool,
    job: Option<Job>,
    handles: Vec<JoinHandle<()>>,
    run_lock: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(primary: bool) -> Self {
        Self {
            primary,
            job: None,
            handles: Vec::new(),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn active(&self) -> Option<Interval> {
        self.job.as_ref().map(|job| job.interval)
    }

    /// Stop whatever is scheduled, then schedule `driver` on `interval`.
    pub fn restart(&mut self, interval: Interval, driver: SyncDriver) {
        if !self.primary {
            return;
        }
        self.halt();
        let schedule = match schedule(interval) {
            Ok(schedule) => schedule,
            Err(err) => {
                error!(?err, cron = interval.cron(), "invalid cron expression");
                return;
            }
        };
        info!(interval = interval.as_str(), cron = interval.cron(), "scheduling feed sync");

        let (stop, mut stopped) = watch::channel(false);
        let run_lock = self.run_lock.clone();
        let handle = tokio::spawn(async move {
            let mut after = Utc::now();
            while let Some(next) = next_tick(&schedule, after) {
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                debug!(next = %next, "waiting for next sync tick");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stopped.changed() => break,
                }
                {
                    // Runs from a replaced job and its successor never overlap.
                    let _guard = run_lock.lock().await;
                    driver.run().await;
                }
                if *stopped.borrow() {
                    break;
                }
                // Ticks missed while a run was in progress are skipped.
                after = next.max(Utc::now() - Duration::seconds(1));
            }
        });
        self.handles.push(handle);
        self.job = Some(Job { interval, stop });
    }

    pub fn stop(&mut self) {
        if !self.primary {
            return;
        }
        self.halt();
    }

    /// Schedule when enabled, stop otherwise.
    pub fn apply(&mut self, cfg: &SyncConfig, driver: SyncDriver) {
        if cfg.enabled {
            self.restart(cfg.interval, driver);
        } else {
            self.stop();
        }
    }

    /// Stop the timer and wait for any run still in progress.
    pub async fn shutdown(mut self) {
        self.halt();
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                error!(?err, "sync job ended abnormally");
            }
        }
    }

    fn halt(&mut self) {
        if let Some(job) = self.job.take() {
            let _ = job.stop.send(true);
            info!(interval = job.interval.as_str(), "stopped feed sync schedule");
        }
        self.handles.retain(|handle| !handle.is_finished());
    }
}

/// Apply the stored settings, re-read them every `poll` and reschedule when
/// `enabled` or `interval` changes. Returns once `shutdown` resolves and any
/// in-flight run has finished.
pub async fn run_until<F>(
    settings: Arc<dyn SettingsStore>,
    driver: SyncDriver,
    primary: bool,
    poll: std::time::Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    if !primary {
        info!("not the primary instance; scheduler disabled");
    }
    let mut scheduler = Scheduler::new(primary);
    let mut applied: Option<SyncConfig> = None;
    let mut ticker = tokio::time::interval(poll);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match settings.get().await {
                    Ok(current) => {
                        let changed = applied
                            .as_ref()
                            .map_or(true, |prev| prev.enabled != current.enabled || prev.interval != current.interval);
                        if changed {
                            scheduler.apply(&current, driver.clone());
                            info!(enabled = current.enabled, interval = current.interval.as_str(), "applied settings");
                            applied = Some(current);
                        }
                    }
                    Err(err) => error!(?err, "failed to read settings"),
                }
            }
            _ = &mut shutdown => {
                info!("shutting down");
                scheduler.shutdown().await;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn tick(interval: Interval, after: &str) -> DateTime<Utc> {
        next_tick(&schedule(interval).unwrap(), at(after)).unwrap()
    }

    #[test]
    fn minute_ticks() {
        assert_eq!(tick(Interval::Minute, "2016-05-23T10:30:15Z"), at("2016-05-23T10:31:00Z"));
        assert_eq!(tick(Interval::Minute, "2016-05-23T10:30:00Z"), at("2016-05-23T10:31:00Z"));
    }

    #[test]
    fn hour_ticks() {
        assert_eq!(tick(Interval::Hour, "2016-05-23T10:30:15Z"), at("2016-05-23T11:00:00Z"));
        assert_eq!(tick(Interval::Hour, "2016-05-23T23:59:59Z"), at("2016-05-24T00:00:00Z"));
    }

    #[test]
    fn half_day_ticks() {
        assert_eq!(tick(Interval::HalfDay, "2016-05-23T10:30:00Z"), at("2016-05-23T12:00:00Z"));
        assert_eq!(tick(Interval::HalfDay, "2016-05-23T12:00:00Z"), at("2016-05-24T00:00:00Z"));
        assert_eq!(tick(Interval::HalfDay, "2016-05-23T00:00:00Z"), at("2016-05-23T12:00:00Z"));
    }

    #[test]
    fn day_ticks() {
        assert_eq!(tick(Interval::Day, "2016-05-23T10:30:00Z"), at("2016-05-24T00:00:00Z"));
        assert_eq!(tick(Interval::Day, "2016-05-31T23:00:00Z"), at("2016-06-01T00:00:00Z"));
    }
}
