//! Origin configuration — backend servers and their health-check settings

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HTTP method used for health probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckMethod {
    #[default]
    Get,
    Head,
}

impl HealthCheckMethod {
    pub fn as_method(&self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Head => http::Method::HEAD,
        }
    }
}

/// Origin server configuration
///
/// # Example
///
/// ```hcl
/// origins = [
///   { id = "users-1", hostname = "10.0.0.5", port = 8080,
///     health_check_interval_ms = 2000, unhealthy_threshold = 2 }
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Unique identifier referenced by endpoints
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Record GUID (storage identity)
    #[serde(default = "Uuid::new_v4")]
    pub guid: Uuid,

    /// Hostname or IP address
    pub hostname: String,

    /// TCP port
    pub port: u16,

    /// Use HTTPS towards this origin
    #[serde(default)]
    pub tls: bool,

    /// Interval between health probes in milliseconds
    #[serde(default = "default_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Consecutive failed probes before the origin is marked unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Consecutive successful probes before the origin is marked healthy
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    /// HTTP method used for health probes
    #[serde(default)]
    pub health_check_method: HealthCheckMethod,

    /// Path probed for liveness
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    /// Timeout of a single probe in milliseconds
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// Maximum concurrent proxied requests (unlimited when unset)
    #[serde(default)]
    pub max_parallel_requests: Option<usize>,
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_unhealthy_threshold() -> u32 {
    2
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_health_check_path() -> String {
    "/".to_string()
}

fn default_health_check_timeout_ms() -> u64 {
    2000
}

impl OriginConfig {
    /// Create an origin with default health-check settings
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            guid: Uuid::new_v4(),
            hostname: hostname.into(),
            port,
            tls: false,
            health_check_interval_ms: default_interval_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
            healthy_threshold: default_healthy_threshold(),
            health_check_method: HealthCheckMethod::default(),
            health_check_path: default_health_check_path(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            max_parallel_requests: None,
        }
    }

    /// Base URL of the origin, e.g. `http://10.0.0.5:8080`
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            // IPv6 literal
            format!("{}://[{}]:{}", scheme, self.hostname, self.port)
        } else {
            format!("{}://{}:{}", scheme, self.hostname, self.port)
        }
    }

    /// Full URL probed by the health monitor
    pub fn health_check_url(&self) -> String {
        let path = if self.health_check_path.starts_with('/') {
            self.health_check_path.clone()
        } else {
            format!("/{}", self.health_check_path)
        };
        format!("{}{}", self.base_url(), path)
    }

    /// Validate a single origin definition
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Config("Origin id cannot be empty".to_string()));
        }
        if self.hostname.trim().is_empty() {
            return Err(GatewayError::Config(format!(
                "Origin '{}' has an empty hostname",
                self.id
            )));
        }
        if self.port == 0 {
            return Err(GatewayError::Config(format!(
                "Origin '{}' has an invalid port 0",
                self.id
            )));
        }
        if self.health_check_interval_ms == 0 {
            return Err(GatewayError::Config(format!(
                "Origin '{}': health_check_interval_ms must be greater than zero",
                self.id
            )));
        }
        if self.health_check_timeout_ms == 0 {
            return Err(GatewayError::Config(format!(
                "Origin '{}': health_check_timeout_ms must be greater than zero",
                self.id
            )));
        }
        if self.unhealthy_threshold == 0 || self.healthy_threshold == 0 {
            return Err(GatewayError::Config(format!(
                "Origin '{}': health thresholds must be at least 1",
                self.id
            )));
        }
        if self.max_parallel_requests == Some(0) {
            return Err(GatewayError::Config(format!(
                "Origin '{}': max_parallel_requests must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let mut origin = OriginConfig::new("o1", "127.0.0.1", 8001);
        assert_eq!(origin.base_url(), "http://127.0.0.1:8001");
        origin.tls = true;
        assert_eq!(origin.base_url(), "https://127.0.0.1:8001");
    }

    #[test]
    fn test_base_url_ipv6_literal() {
        let origin = OriginConfig::new("o1", "::1", 8080);
        assert_eq!(origin.base_url(), "http://[::1]:8080");
        assert_eq!(origin.health_check_url(), "http://[::1]:8080/");

        let origin = OriginConfig::new("o2", "[fe80::1]", 9000);
        assert_eq!(origin.base_url(), "http://[fe80::1]:9000");
    }

    #[test]
    fn test_health_check_url_adds_slash() {
        let mut origin = OriginConfig::new("o1", "localhost", 9000);
        origin.health_check_path = "health".to_string();
        assert_eq!(origin.health_check_url(), "http://localhost:9000/health");
    }

    #[test]
    fn test_defaults_from_hcl() {
        let hcl = r#"
            id       = "o1"
            hostname = "localhost"
            port     = 8080
        "#;
        let origin: OriginConfig = hcl::from_str(hcl).unwrap();
        assert_eq!(origin.health_check_interval_ms, 5000);
        assert_eq!(origin.unhealthy_threshold, 2);
        assert_eq!(origin.healthy_threshold, 2);
        assert_eq!(origin.health_check_method, HealthCheckMethod::Get);
        assert_eq!(origin.health_check_path, "/");
        assert!(!origin.tls);
        assert!(origin.max_parallel_requests.is_none());
    }

    #[test]
    fn test_health_check_method_parse() {
        let hcl = r#"
            id                  = "o1"
            hostname            = "localhost"
            port                = 8080
            health_check_method = "HEAD"
        "#;
        let origin: OriginConfig = hcl::from_str(hcl).unwrap();
        assert_eq!(origin.health_check_method.as_method(), http::Method::HEAD);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut origin = OriginConfig::new("o1", "localhost", 8080);
        origin.unhealthy_threshold = 0;
        assert!(origin.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_probe_timeout() {
        let mut origin = OriginConfig::new("o1", "localhost", 8080);
        origin.health_check_timeout_ms = 0;
        let err = origin.validate().unwrap_err();
        assert!(err.to_string().contains("health_check_timeout_ms"));
    }

    #[test]
    fn test_validate_rejects_empty_hostname() {
        let origin = OriginConfig::new("o1", " ", 8080);
        let err = origin.validate().unwrap_err();
        assert!(err.to_string().contains("empty hostname"));
    }

    #[test]
    fn test_validate_ok() {
        assert!(OriginConfig::new("o1", "localhost", 8080).validate().is_ok());
    }
}
