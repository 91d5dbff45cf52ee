//! Proxy forwarding settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outbound proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Deadline for receiving response headers (and the full body when buffered)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// TCP/TLS connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum gap between two chunks of a streamed response
    #[serde(default = "default_stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: u64,

    /// Maximum inbound request body size
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,

    /// Idle keep-alive connections kept per origin
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_stream_idle_timeout_ms() -> u64 {
    60_000
}

fn default_max_request_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stream_idle_timeout_ms: default_stream_idle_timeout_ms(),
            max_request_body_bytes: default_max_request_body_bytes(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.stream_idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_request_body_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_hcl() {
        let config: ProxyConfig = hcl::from_str("timeout_ms = 1500").unwrap();
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.connect_timeout_ms, 5_000);
    }
}
