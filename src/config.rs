//! Configuration loader and validator for the feed→forum syncer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Cooldown the forum applies when its own setting is unset or zero.
pub const DEFAULT_POST_DELAY_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub feed: Feed,
    pub forum: Forum,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub database_url: String,
    /// Only the primary instance drives the scheduler.
    pub primary: bool,
    pub settings_poll_seconds: u64,
}

/// Feed normalizer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    pub normalizer_url: String,
    pub timeout_ms: u64,
}

/// Anti-spam windows configured on the forum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Forum {
    #[serde(default)]
    pub post_delay_seconds: u64,
    #[serde(default)]
    pub newbie_post_delay_seconds: u64,
}

impl Forum {
    /// Seconds to push a user's last post time into the past so the next manual
    /// post clears both cooldown windows.
    pub fn cooldown_offset_seconds(&self) -> i64 {
        let or_default = |v: u64| if v == 0 { DEFAULT_POST_DELAY_SECONDS } else { v };
        let max = or_default(self.post_delay_seconds).max(or_default(self.newbie_post_delay_seconds));
        max as i64 + 1
    }
}

impl Config {
    /// Database URL, honouring a `DATABASE_URL` override.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.app.database_url.clone())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.database_url must be non-empty"));
    }
    if cfg.app.settings_poll_seconds == 0 {
        return Err(ConfigError::Invalid("app.settings_poll_seconds must be > 0"));
    }

    if cfg.feed.normalizer_url.trim().is_empty() {
        return Err(ConfigError::Invalid("feed.normalizer_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.feed.normalizer_url).is_err() {
        return Err(ConfigError::Invalid("feed.normalizer_url must be an absolute URL"));
    }
    if cfg.feed.timeout_ms == 0 {
        return Err(ConfigError::Invalid("feed.timeout_ms must be > 0"));
    }
    // forum delays are u64; zero falls back to the forum default

    Ok(())
}

/// Returns a complete sample configuration.
pub fn example() -> &'static str {
    r#"app:
  database_url: "sqlite://./data/forum.db"
  primary: true
  settings_poll_seconds: 30

feed:
  normalizer_url: "https://query.yahooapis.com/v1/public/yql"
  timeout_ms: 120000

forum:
  post_delay_seconds: 10
  newbie_post_delay_seconds: 120
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert!(cfg.app.primary);
    }

    #[test]
    fn invalid_database_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.database_url = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("app.database_url")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_feed_section() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.feed.normalizer_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("normalizer_url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.feed.normalizer_url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.feed.timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.settings_poll_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn cooldown_uses_larger_window_plus_one() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert_eq!(cfg.forum.cooldown_offset_seconds(), 121);

        let unset = Forum { post_delay_seconds: 0, newbie_post_delay_seconds: 0 };
        assert_eq!(unset.cooldown_offset_seconds(), 11);

        let only_regular = Forum { post_delay_seconds: 30, newbie_post_delay_seconds: 0 };
        assert_eq!(only_regular.cooldown_offset_seconds(), 31);
    }

    #[test]
    fn forum_section_defaults_to_zero() {
        let yaml = example().replace("  post_delay_seconds: 10\n  newbie_post_delay_seconds: 120\n", "  {}\n");
        let yaml = yaml.replace("forum:\n  {}", "forum: {}");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.forum.post_delay_seconds, 0);
        assert_eq!(cfg.forum.cooldown_offset_seconds(), 11);
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.feed.timeout_ms, 120000);
    }
}
