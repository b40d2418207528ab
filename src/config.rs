//! Configuration module

use crate::dns::{DEFAULT_DOH_ENDPOINT, DEFAULT_DOH_TIMEOUT_SECS};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Main configuration structure
///
/// Ports default to 0, meaning the value is supplied externally (CLI flag
/// from a free-port allocator) or picked by the OS at bind time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy listener port
    pub port: u16,

    /// Companion dashboard port (consumed by external collaborators)
    #[serde(rename = "dashboard-port")]
    pub dashboard_port: u16,

    /// Companion static server port (consumed by external collaborators)
    #[serde(rename = "static-port")]
    pub static_port: u16,

    /// Bind address, loopback only by design
    #[serde(rename = "bind-address")]
    pub bind_address: IpAddr,

    /// DoH endpoint serving the JSON answer format
    #[serde(rename = "doh-endpoint")]
    pub doh_endpoint: String,

    /// DoH query timeout in seconds
    #[serde(rename = "doh-timeout-secs")]
    pub doh_timeout_secs: u64,

    /// Log level
    #[serde(rename = "log-level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load from a YAML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.bind_address.is_loopback() {
            return Err(crate::Error::config(format!(
                "bind address must be loopback, got {}",
                self.bind_address
            )));
        }
        if self.doh_endpoint.is_empty() {
            return Err(crate::Error::config("doh-endpoint must not be empty"));
        }
        Ok(())
    }

    pub fn doh_timeout(&self) -> Duration {
        Duration::from_secs(self.doh_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 0,
            dashboard_port: 0,
            static_port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            doh_endpoint: DEFAULT_DOH_ENDPOINT.to_string(),
            doh_timeout_secs: DEFAULT_DOH_TIMEOUT_SECS,
            log_level: "info".to_string(),
        }
    }
}
