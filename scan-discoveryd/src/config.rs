use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::types::AddrFamily;
use crate::engine::EngineConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Restrict mDNS to this interface; all interfaces when unset
    #[serde(default)]
    pub interface: Option<String>,
    /// Interface index reported with every event (IPv6 zone id).
    /// 0 looks it up from `interface`.
    #[serde(default)]
    pub interface_index: u32,
    #[serde(default = "default_true")]
    pub ipv4: bool,
    #[serde(default = "default_true")]
    pub ipv6: bool,
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_ms: u64,
    /// Quiet window after which a browse session reports all-for-now
    #[serde(default = "default_all_for_now")]
    pub all_for_now_ms: u64,
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_true() -> bool {
    true
}

fn default_restart_backoff() -> u64 {
    1000
}

fn default_all_for_now() -> u64 {
    1500
}

fn default_resolve_timeout() -> u64 {
    5000
}

fn default_listen() -> String {
    "[::]:8090".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: None,
            interface_index: 0,
            ipv4: true,
            ipv6: true,
            restart_backoff_ms: default_restart_backoff(),
            all_for_now_ms: default_all_for_now(),
            resolve_timeout_ms: default_resolve_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl DiscoveryConfig {
    pub fn families(&self) -> Vec<AddrFamily> {
        let mut families = Vec::new();
        if self.ipv4 {
            families.push(AddrFamily::Ipv4);
        }
        if self.ipv6 {
            families.push(AddrFamily::Ipv6);
        }
        families
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            enabled: self.enabled,
            families: self.families(),
            restart_backoff: Duration::from_millis(self.restart_backoff_ms),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.discovery.enabled && self.discovery.families().is_empty() {
            bail!("discovery needs at least one of ipv4 or ipv6 enabled");
        }
        Ok(())
    }
}
