use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use feed2forum::config;
use feed2forum::db;
use feed2forum::feed::FeedClient;
use feed2forum::forum::{Forum, SqliteForum};
use feed2forum::publisher::Publisher;
use feed2forum::scheduler;
use feed2forum::settings::{SettingsStore, SqliteSettings, SyncConfig};
use feed2forum::sync::SyncDriver;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sync on the configured schedule until interrupted (default)
    Run,
    /// Run a single sync immediately and print the outcome
    Once,
    /// Inspect or replace the stored sync settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    /// Print the current settings as JSON
    Show,
    /// Replace the settings with the contents of a JSON file
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(args.config.as_path()))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let settings = Arc::new(SqliteSettings::new(pool.clone()));
    let forum = Forum::from_shared(Arc::new(SqliteForum::new(pool)));
    let feed = Arc::new(FeedClient::new(&cfg.feed.normalizer_url, cfg.feed.timeout_ms)?);
    let publisher = Publisher::new(forum, cfg.forum.cooldown_offset_seconds());
    let driver = SyncDriver::new(settings.clone(), feed, publisher);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(&cfg, settings, driver).await,
        Command::Once => {
            let report = driver.run_once().await?;
            println!(
                "fetched={} accepted={} published={} failed={} watermark={} -> {} persisted={}",
                report.fetched,
                report.accepted,
                report.published,
                report.failures.len(),
                report.previous_watermark,
                report.watermark,
                report.persisted
            );
            for (title, err) in &report.failures {
                println!("  failed: {title}: {err}");
            }
            Ok(())
        }
        Command::Settings { action: SettingsAction::Show } => {
            let current = settings.get().await?;
            println!("{}", serde_json::to_string_pretty(&current)?);
            Ok(())
        }
        Command::Settings { action: SettingsAction::Import { path } } => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let imported: SyncConfig = serde_json::from_str(&raw).context("invalid settings JSON")?;
            settings.replace(&imported).await?;
            info!(path = %path.display(), "imported settings");
            Ok(())
        }
    }
}

/// Run the scheduler until Ctrl-C, letting any in-flight sync finish first.
async fn run_daemon(cfg: &config::Config, settings: Arc<dyn SettingsStore>, driver: SyncDriver) -> Result<()> {
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
        }
    };
    scheduler::run_until(
        settings,
        driver,
        cfg.app.primary,
        Duration::from_secs(cfg.app.settings_poll_seconds),
        shutdown,
    )
    .await
}
