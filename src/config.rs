//! TOML configuration parsing and validation.
//!
//! Secrets are not stored in the file: the Atlassian connectors read
//! `ATLASSIAN_API_TOKEN` and the Dify client reads `DIFY_API_KEY` from the
//! environment when they are constructed.
//!
//! ```toml
//! [db]
//! path = "./data/ksync.sqlite"
//!
//! [sync]
//! failure_ceiling = 5
//! concurrency = 1
//!
//! [sources.jira]
//! base_url = "https://acme.atlassian.net"
//! email = "bot@acme.com"
//! project_key = "PROJ"
//!
//! [sources.confluence]
//! base_url = "https://acme.atlassian.net"
//! email = "bot@acme.com"
//! space_key = "TEAM"
//!
//! [destination]
//! api_url = "https://api.dify.ai/v1"
//! dataset_id = "..."
//! ```

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use knowledge_sync_core::{SourceType, SyncOptions};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_failure_ceiling")]
    pub failure_ceiling: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            failure_ceiling: default_failure_ceiling(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_failure_ceiling() -> u32 {
    5
}
fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub jira: Option<JiraConfig>,
    pub confluence: Option<ConfluenceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub project_key: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfluenceConfig {
    pub base_url: String,
    pub email: String,
    pub space_key: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Page body is cut to this many characters before upload.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_lookback_days() -> i64 {
    30
}
fn default_page_size() -> u32 {
    50
}
fn default_max_chars() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DestinationConfig {
    pub api_url: String,
    pub dataset_id: String,
    #[serde(default = "default_indexing_technique")]
    pub indexing_technique: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// In-call retries for transient HTTP failures before the engine sees one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_indexing_technique() -> String {
    "high_quality".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: default_hour(),
            minute: 0,
        }
    }
}

fn default_hour() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Also append diagnostics to this file.
    pub file: Option<PathBuf>,
}

impl Config {
    /// Engine options derived from `[sync]` and per-source lookback windows.
    pub fn sync_options(&self) -> SyncOptions {
        let mut options = SyncOptions {
            failure_ceiling: self.sync.failure_ceiling,
            concurrency: self.sync.concurrency,
            ..SyncOptions::default()
        };
        if let Some(jira) = &self.sources.jira {
            options = options.with_lookback(SourceType::Issue, Duration::days(jira.lookback_days));
        }
        if let Some(confluence) = &self.sources.confluence {
            options = options.with_lookback(
                SourceType::Page,
                Duration::days(confluence.lookback_days),
            );
        }
        options
    }
}

/// Reject values copied verbatim from a config template.
fn check_placeholder(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{} must not be empty", key);
    }
    if value.starts_with("your-") {
        bail!("{} still holds the template value '{}'", key, value);
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.sync.failure_ceiling == 0 {
        bail!("sync.failure_ceiling must be >= 1");
    }
    if config.sync.concurrency == 0 {
        bail!("sync.concurrency must be >= 1");
    }

    if let Some(jira) = &config.sources.jira {
        check_placeholder("sources.jira.base_url", &jira.base_url)?;
        check_placeholder("sources.jira.email", &jira.email)?;
        check_placeholder("sources.jira.project_key", &jira.project_key)?;
        if jira.lookback_days < 1 {
            bail!("sources.jira.lookback_days must be >= 1");
        }
        if jira.page_size == 0 {
            bail!("sources.jira.page_size must be >= 1");
        }
    }

    if let Some(confluence) = &config.sources.confluence {
        check_placeholder("sources.confluence.base_url", &confluence.base_url)?;
        check_placeholder("sources.confluence.email", &confluence.email)?;
        check_placeholder("sources.confluence.space_key", &confluence.space_key)?;
        if confluence.lookback_days < 1 {
            bail!("sources.confluence.lookback_days must be >= 1");
        }
        if confluence.page_size == 0 {
            bail!("sources.confluence.page_size must be >= 1");
        }
        if confluence.max_chars == 0 {
            bail!("sources.confluence.max_chars must be >= 1");
        }
    }

    check_placeholder("destination.api_url", &config.destination.api_url)?;
    check_placeholder("destination.dataset_id", &config.destination.dataset_id)?;
    match config.destination.indexing_technique.as_str() {
        "high_quality" | "economy" => {}
        other => bail!(
            "Unknown destination.indexing_technique: '{}'. Must be high_quality or economy.",
            other
        ),
    }

    if config.schedule.hour > 23 || config.schedule.minute > 59 {
        bail!(
            "schedule time {:02}:{:02} is not a valid time of day",
            config.schedule.hour,
            config.schedule.minute
        );
    }

    Ok(())
}

/// Read a required secret from the environment.
pub fn secret_from_env(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable not set", name))?;
    check_placeholder(name, &value)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/ksync.sqlite"

[destination]
api_url = "http://localhost/v1"
dataset_id = "ds-1"
"#;

    #[test]
    fn defaults_apply() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.sync.failure_ceiling, 5);
        assert_eq!(config.sync.concurrency, 1);
        assert_eq!(config.server.bind, "127.0.0.1:5000");
        assert_eq!(config.schedule.hour, 4);
        assert_eq!(config.destination.indexing_technique, "high_quality");
        assert!(config.sources.jira.is_none());
    }

    #[test]
    fn per_source_lookback_feeds_options() {
        let text = format!(
            "{}\n[sources.jira]\nbase_url = \"http://j\"\nemail = \"a@b\"\nproject_key = \"P\"\nlookback_days = 7\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&text).unwrap();
        let options = config.sync_options();
        assert_eq!(options.lookback_for(SourceType::Issue), Duration::days(7));
        assert_eq!(options.lookback_for(SourceType::Page), Duration::days(30));
    }

    #[test]
    fn template_values_are_rejected() {
        let text = MINIMAL.replace("ds-1", "your-dataset-id");
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("destination.dataset_id"), "{}", err);
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let text = format!("{}\n[sync]\nfailure_ceiling = 0\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }
}
