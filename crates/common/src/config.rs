use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::str::FromStr;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub alchemy: Alchemy,
    pub object_store: ObjectStore,
    pub pipeline: Pipeline,
    pub scoring: Scoring,
    pub jobs: Jobs,
    pub observability: Observability,
    pub web: Option<Web>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alchemy {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub request_timeout_secs: u64,
    pub max_count_per_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStore {
    pub root: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub chain: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Upper bound for one upstream fetch (transfers or balances), pagination included.
    pub fetch_timeout_secs: u64,
    pub refresh_interval_secs: u64,
}

/// Token classification lists used by the risk and stability scorers.
/// Entries are contract addresses; matching is case-insensitive.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Scoring {
    #[serde(default)]
    pub stablecoins: Vec<String>,
    #[serde(default)]
    pub high_risk_indicators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jobs {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Web {
    pub port: u16,
    pub host: String,
}

impl Config {
    /// Load from `WALLET_HEALTH_CONFIG` (or `config/default.toml`) and apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("WALLET_HEALTH_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would panic or stall at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.refresh_interval_secs == 0 {
            bail!("pipeline.refresh_interval_secs must be greater than zero");
        }
        if self.pipeline.fetch_timeout_secs == 0 {
            bail!("pipeline.fetch_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Secrets and deploy-specific paths come from the environment when set.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ALCHEMY_API_KEY").filter(|v| !v.is_empty()) {
            self.alchemy.api_key = key;
        }
        if let Some(path) = lookup("DATABASE_PATH").filter(|v| !v.is_empty()) {
            self.database.path = path;
        }
        if let Some(root) = lookup("OBJECT_STORE_ROOT").filter(|v| !v.is_empty()) {
            self.object_store.root = root;
        }
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
