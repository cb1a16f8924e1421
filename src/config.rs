//! TOML configuration parsing and validation.
//!
//! The configuration is loaded once at process start by [`load_config`] and
//! then handed to every component explicitly. Channel credentials are the
//! only values read from the environment, see [`ChannelCredentials::from_env`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the directory (under `crawl.root_path`) that receives downloads.
pub const DOWNLOAD_DIR: &str = "supported_files";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Crawl settings. Every field is mandatory.
#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    /// Age (milliseconds) after which an origin's history snapshot is stale.
    pub check_history_offset_ms: u64,
    /// File extensions eligible for ingestion, matched case-insensitively.
    pub supported_filetypes: Vec<String>,
    /// Root directory; downloads land in `<root_path>/supported_files`.
    pub root_path: PathBuf,
    /// Default verbosity for this crate's log output.
    pub log_level: String,
}

impl CrawlConfig {
    pub fn check_history_offset(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.check_history_offset_ms as i64)
    }

    /// Normalised extension set: lowercase, no leading dot.
    pub fn supported_extensions(&self) -> BTreeSet<String> {
        self.supported_filetypes
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }

    pub fn download_root(&self) -> PathBuf {
        self.root_path.join(DOWNLOAD_DIR)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_channel_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Whole-transfer budget for one media download; `timeout_secs` covers every other request.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl ChannelConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_channel_timeout(),
            page_size: default_page_size(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8081".to_string()
}
fn default_channel_timeout() -> u64 {
    30
}
fn default_page_size() -> u32 {
    100
}
fn default_download_timeout() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_analyzer_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: default_analyzer_command(),
            args: Vec::new(),
            timeout_secs: default_analyzer_timeout(),
        }
    }
}

impl AnalyzerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_analyzer_command() -> String {
    "node".to_string()
}
fn default_analyzer_timeout() -> u64 {
    300
}

/// Credentials for the channel bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCredentials {
    pub api_id: String,
    pub api_hash: String,
    pub phone_number: String,
}

impl ChannelCredentials {
    pub const API_ID_VAR: &'static str = "CHANNEL_API_ID";
    pub const API_HASH_VAR: &'static str = "CHANNEL_API_HASH";
    pub const PHONE_VAR: &'static str = "CHANNEL_PHONE_NUMBER";

    /// Reads credentials from the environment. `None` if any is missing or blank.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Some(Self {
            api_id: read(Self::API_ID_VAR)?,
            api_hash: read(Self::API_HASH_VAR)?,
            phone_number: read(Self::PHONE_VAR)?,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.crawl.check_history_offset_ms == 0 {
        anyhow::bail!("crawl.check_history_offset_ms must be > 0");
    }

    if config.crawl.supported_extensions().is_empty() {
        anyhow::bail!("crawl.supported_filetypes must list at least one extension");
    }

    if config.crawl.root_path.as_os_str().is_empty() {
        anyhow::bail!("crawl.root_path must not be empty");
    }

    let level = config.crawl.log_level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        anyhow::bail!(
            "Unknown crawl.log_level: '{}'. Must be one of {}.",
            config.crawl.log_level,
            LOG_LEVELS.join(", ")
        );
    }

    if config.channel.page_size == 0 {
        anyhow::bail!("channel.page_size must be > 0");
    }

    if config.channel.download_timeout_secs == 0 {
        anyhow::bail!("channel.download_timeout_secs must be > 0");
    }

    if config.analyzer.command.trim().is_empty() {
        anyhow::bail!("analyzer.command must not be empty");
    }

    if config.analyzer.timeout_secs == 0 {
        anyhow::bail!("analyzer.timeout_secs must be > 0");
    }

    Ok(config)
}
