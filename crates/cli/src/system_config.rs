//! System-wide configuration
//!
//! Stored as TOML at `<config dir>/quiesce/config.toml`. A missing file
//! means defaults. `QUIESCE_CONFIG` points somewhere else.

use anyhow::{Context, Result};
use quiesce_core::CoalescerConfig;
use quiesce_watcher::WatchConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "QUIESCE_CONFIG";

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub coalescer: CoalescerConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive used when RUST_LOG is unset
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> Result<()> {
        self.coalescer.validate()?;

        if self.log.filter.trim().is_empty() {
            anyhow::bail!("log.filter must not be empty");
        }
        tracing_subscriber::EnvFilter::try_new(&self.log.filter)
            .with_context(|| format!("Invalid log.filter '{}'", self.log.filter))?;

        Ok(())
    }
}

/// Location of the config file
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("quiesce").join("config.toml"))
}

/// Load and validate; defaults when the file does not exist
pub fn load() -> Result<SystemConfig> {
    let Some(path) = config_file_path() else {
        return Ok(SystemConfig::default());
    };
    if !path.exists() {
        return Ok(SystemConfig::default());
    }

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: SystemConfig = toml::from_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}

pub fn save(config: &SystemConfig) -> Result<()> {
    let path = config_file_path().context("Could not determine config file path")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let text = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write the default configuration unless a file already exists
pub fn init_if_missing() -> Result<bool> {
    let path = config_file_path().context("Could not determine config file path")?;
    if path.exists() {
        return Ok(false);
    }
    save(&SystemConfig::default())?;
    Ok(true)
}

pub fn example_config() -> String {
    r#"# quiesce configuration

[coalescer]
# Quiet period after the last change before an event is emitted (1-60000)
debounce_ms = 500
# Longest a continuously changing path is held back (debounce_ms-600000)
max_wait_ms = 2000
# "subject": one event per path; "subject-and-kind": one per path and change kind
key_policy = "subject"

[watch]
use_gitignore = true
use_quiesceignore = true
# Extra gitignore-style patterns
additional_patterns = ["*.gen.rs"]
# File names reported as projects rather than documents
project_manifests = ["Cargo.toml", "package.json"]

[log]
# Used when RUST_LOG is unset
filter = "info"
"#
    .to_string()
}
