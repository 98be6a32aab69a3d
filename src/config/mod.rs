//! Configuration management module
//!
//! Provides centralized configuration including:
//! - Portable paths under `$HOME/.node-alerts/` (log, config, subscriptions)
//! - Runtime [`Settings`] loaded from `config.toml` with environment overrides
//! - The [`Network`] derived from the chain id
//!
//! All configuration is environment-aware and portable.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alerts::Thresholds;

/// Path and build information helpers
pub struct Config;

impl Config {
    /// Base directory: `$HOME/.node-alerts`, or a temp-dir fallback if HOME is not available.
    pub fn base_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".node-alerts");
        }
        std::env::temp_dir().join("node-alerts")
    }

    /// Get the log file path: `$HOME/.node-alerts/node-alerts.log`
    pub fn log_file_path() -> PathBuf {
        Self::base_dir().join("node-alerts.log")
    }

    /// Get the config file path: `$HOME/.node-alerts/config.toml`
    pub fn config_file_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    /// Get the subscriptions file path: `$HOME/.node-alerts/subscriptions.json`
    pub fn subscriptions_file_path() -> PathBuf {
        Self::base_dir().join("subscriptions.json")
    }

    /// Ensure the base directory exists
    pub fn ensure_base_directory() -> std::io::Result<()> {
        std::fs::create_dir_all(Self::base_dir())
    }

    /// Returns the package version from CARGO_PKG_VERSION.
    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// Which network the monitored nodes belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub const TESTNET_CHAIN_ID: &'static str = "mocha-4";

    pub fn from_chain_id(chain_id: &str) -> Self {
        if chain_id.trim() == Self::TESTNET_CHAIN_ID {
            Network::Testnet
        } else {
            Network::Mainnet
        }
    }

    /// Label shown to users in alert messages.
    pub fn label(&self) -> &'static str {
        match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
        }
    }

    /// Prefix of the Prometheus `job` label for this network's nodes.
    pub fn job_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "celestia/",
            Network::Testnet => "mocha-4/",
        }
    }

    /// Regex matching every job on this network.
    pub fn job_pattern(&self) -> String {
        format!("{}.*", self.job_prefix())
    }

    /// Extract the node type from a job label like `celestia/bridge`.
    pub fn parse_node_type(&self, job_label: &str) -> Option<String> {
        let rest = job_label.strip_prefix(self.job_prefix())?;
        let node_type = rest.split('/').next().unwrap_or_default();
        if node_type.is_empty() {
            None
        } else {
            Some(node_type.to_string())
        }
    }
}

/// Runtime settings. Every field has a default so a partial `config.toml` is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chain_id: String,
    pub prometheus_url: String,
    /// Cron expression (with seconds) for the reconciliation cycle.
    pub schedule: String,
    /// Consecutive firing cycles before a fire notification is sent.
    pub activation_threshold: u32,
    pub connected_peers_threshold: f64,
    pub out_of_sync_height_threshold: f64,
    /// Range used for the stalled-blocks check; should be at least twice the scrape interval.
    pub sync_time_window: String,
    pub head_cache_ttl_secs: u64,
    pub http_timeout_secs: u64,
    pub evaluation_concurrency: usize,
    pub reconcile_concurrency: usize,
    /// Check names to run, in order. Empty means all of them.
    pub checks: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chain_id: "celestia".to_string(),
            prometheus_url: "http://localhost:9090".to_string(),
            schedule: "0 * * * * *".to_string(),
            activation_threshold: 3,
            connected_peers_threshold: 2.0,
            out_of_sync_height_threshold: 50.0,
            sync_time_window: "10m".to_string(),
            head_cache_ttl_secs: 60,
            http_timeout_secs: 15,
            evaluation_concurrency: 8,
            reconcile_concurrency: 4,
            checks: Vec::new(),
        }
    }
}

impl Settings {
    /// Load from `path` (missing file means defaults), apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            toml::from_str::<Settings>(&content)
                .with_context(|| format!("Failed to parse config file {:?}", path))?
        } else {
            Settings::default()
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Override fields from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("CHAIN_ID") {
            self.chain_id = v;
        }
        if let Some(v) = get("PROMETHEUS_URL") {
            self.prometheus_url = v;
        }
        if let Some(v) = get("NODE_ALERTS_SCHEDULE") {
            self.schedule = v;
        }
        if let Some(v) = get("NODE_ALERTS_ACTIVATION_THRESHOLD") {
            self.activation_threshold = v
                .parse()
                .with_context(|| format!("Invalid NODE_ALERTS_ACTIVATION_THRESHOLD {:?}", v))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.prometheus_url)
            .with_context(|| format!("Invalid prometheus_url {:?}", self.prometheus_url))?;
        cron::Schedule::from_str(&self.schedule)
            .map_err(|e| anyhow::anyhow!("Invalid schedule {:?}: {}", self.schedule, e))?;
        if self.activation_threshold == 0 {
            bail!("activation_threshold must be at least 1");
        }
        if self.evaluation_concurrency == 0 || self.reconcile_concurrency == 0 {
            bail!("concurrency limits must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be at least 1");
        }
        if self.head_cache_ttl_secs == 0 {
            bail!("head_cache_ttl_secs must be at least 1");
        }
        Ok(())
    }

    pub fn network(&self) -> Network {
        Network::from_chain_id(&self.chain_id)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            connected_peers: self.connected_peers_threshold,
            out_of_sync_height: self.out_of_sync_height_threshold,
            sync_time_window: self.sync_time_window.clone(),
        }
    }

    pub fn head_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.head_cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_network_from_chain_id() {
        assert_eq!(Network::from_chain_id("mocha-4"), Network::Testnet);
        assert_eq!(Network::from_chain_id("celestia"), Network::Mainnet);
        assert_eq!(Network::from_chain_id(""), Network::Mainnet);
        assert_eq!(Network::Testnet.job_pattern(), "mocha-4/.*");
    }

    #[test]
    fn test_parse_node_type() {
        let net = Network::Mainnet;
        assert_eq!(net.parse_node_type("celestia/bridge"), Some("bridge".to_string()));
        assert_eq!(net.parse_node_type("celestia/light/extra"), Some("light".to_string()));
        assert_eq!(net.parse_node_type("mocha-4/bridge"), None);
        assert_eq!(net.parse_node_type("celestia/"), None);
        assert_eq!(net.parse_node_type(""), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str("activation_threshold = 5\nchain_id = \"mocha-4\"").unwrap();
        assert_eq!(settings.activation_threshold, 5);
        assert_eq!(settings.network(), Network::Testnet);
        assert_eq!(settings.sync_time_window, "10m");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PROMETHEUS_URL", "http://prom.internal:9090"),
            ("NODE_ALERTS_ACTIVATION_THRESHOLD", "4"),
            ("CHAIN_ID", "  "),
        ]
        .into_iter()
        .collect();
        let mut settings = Settings::default();
        settings
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.prometheus_url, "http://prom.internal:9090");
        assert_eq!(settings.activation_threshold, 4);
        assert_eq!(settings.chain_id, "celestia");
    }

    #[test]
    fn test_bad_threshold_override_is_an_error() {
        let mut settings = Settings::default();
        let result = settings.apply_overrides(|k| {
            (k == "NODE_ALERTS_ACTIVATION_THRESHOLD").then(|| "three".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.schedule = "every minute".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.prometheus_url = "not a url".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.activation_threshold = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut settings = Settings::default();
        settings.http_timeout_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("http_timeout_secs"));

        let mut settings = Settings::default();
        settings.head_cache_ttl_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("head_cache_ttl_secs"));

        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.reconcile_concurrency, 4);
    }
}
