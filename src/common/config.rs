//! Configuration for the coordinator

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the RPC listener
    pub bind_addr: SocketAddr,

    /// Per-call timeout for outbound RPCs to cluster members
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Attempts per recipient before a membership push gives up and the
    /// recipient is hinted down
    #[serde(default = "default_update_retry_limit")]
    pub update_retry_limit: usize,

    /// Delay between membership push attempts
    #[serde(default = "default_update_retry_delay")]
    pub update_retry_delay_ms: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_request_timeout() -> u64 {
    30_000
}
fn default_update_retry_limit() -> usize {
    3
}
fn default_update_retry_delay() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7070".parse().unwrap(),
            request_timeout_ms: default_request_timeout(),
            update_retry_limit: default_update_retry_limit(),
            update_retry_delay_ms: default_update_retry_delay(),
            log_level: default_log_level(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoordinatorConfig = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.update_retry_limit == 0 {
            return Err(crate::Error::InvalidConfig(
                "update_retry_limit must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "request_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn update_retry_delay(&self) -> Duration {
        Duration::from_millis(self.update_retry_delay_ms)
    }
}
