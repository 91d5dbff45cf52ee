//! Configuration types for Portico Gateway
//!
//! Origins and endpoints are declared as HCL lists of objects so their
//! declaration order survives parsing; endpoint order is the routing
//! tie-breaker.

mod endpoint;
mod origin;
mod proxy;

pub use endpoint::{ApiEndpointGroup, EndpointConfig, LoadBalancingMode, RewriteRule};
pub use origin::{HealthCheckMethod, OriginConfig};
pub use proxy::ProxyConfig;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};
use crate::router::RouterTable;
use crate::storage::Repository;

/// Top-level gateway configuration
///
/// # HCL Example
///
/// ```hcl
/// listen = "0.0.0.0:8000"
///
/// origins = [
///   { id = "users-1", hostname = "10.0.0.5", port = 8080 }
/// ]
///
/// endpoints = [
///   { id = "users", origins = ["users-1"],
///     unauthenticated = { GET = ["/{version}/users/{id}"] } }
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Header carrying the base64 auth context to origins
    #[serde(default = "default_auth_context_header")]
    pub auth_context_header: String,

    /// Header carrying the request ID
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,

    /// Request headers never forwarded to any origin
    #[serde(default)]
    pub blocked_headers: Vec<String>,

    /// Forwarding limits and timeouts
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Origin servers
    #[serde(default)]
    pub origins: Vec<OriginConfig>,

    /// API endpoints, in routing priority order
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Graceful shutdown timeout in seconds (default: 30)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_auth_context_header() -> String {
    "x-auth-context".to_string()
}

fn default_request_id_header() -> String {
    "x-request-id".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl GatewayConfig {
    /// Load configuration from an HCL file.
    ///
    /// The file must contain valid HCL content regardless of extension.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_hcl(&content)
    }

    /// Parse configuration from an HCL string
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Build configuration from storage, keeping the listener and proxy
    /// settings of `settings`. Records come back in insertion order.
    pub async fn from_repositories(
        settings: GatewayConfig,
        origins: &dyn Repository<OriginConfig>,
        endpoints: &dyn Repository<EndpointConfig>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let config = Self {
            origins: origins.select_all(cancel).await?,
            endpoints: endpoints.select_all(cancel).await?,
            ..settings
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        self.listen.parse::<SocketAddr>().map_err(|e| {
            GatewayError::Config(format!("Invalid listen address '{}': {}", self.listen, e))
        })?;

        validate_header_name(&self.auth_context_header)?;
        validate_header_name(&self.request_id_header)?;
        for name in &self.blocked_headers {
            validate_header_name(name)?;
        }

        if self.proxy.timeout_ms == 0 || self.proxy.connect_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "Proxy timeouts must be greater than zero".to_string(),
            ));
        }
        if self.proxy.stream_idle_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "Proxy stream_idle_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let mut origin_ids = HashSet::new();
        for origin in &self.origins {
            origin.validate()?;
            if !origin_ids.insert(origin.id.as_str()) {
                return Err(GatewayError::Config(format!(
                    "Duplicate origin id '{}'",
                    origin.id
                )));
            }
        }

        validate_endpoints(&self.endpoints, |id| origin_ids.contains(id))?;
        Ok(())
    }
}

/// Check endpoints against the known origin set and compile their routes
pub(crate) fn validate_endpoints(
    endpoints: &[EndpointConfig],
    origin_exists: impl Fn(&str) -> bool,
) -> Result<RouterTable> {
    for endpoint in endpoints {
        if endpoint.id.is_empty() {
            return Err(GatewayError::Config("Endpoint id cannot be empty".to_string()));
        }
        if endpoint.origins.is_empty() {
            return Err(GatewayError::Config(format!(
                "Endpoint '{}' has no origins configured",
                endpoint.id
            )));
        }
        for origin in &endpoint.origins {
            if !origin_exists(origin) {
                return Err(GatewayError::Config(format!(
                    "Endpoint '{}' references unknown origin '{}'",
                    endpoint.id, origin
                )));
            }
        }
        for name in &endpoint.blocked_headers {
            validate_header_name(name)?;
        }
        if endpoint.timeout_ms == Some(0) {
            return Err(GatewayError::Config(format!(
                "Endpoint '{}' timeout_ms must be greater than zero",
                endpoint.id
            )));
        }
    }

    RouterTable::from_config(endpoints)
}

fn validate_header_name(name: &str) -> Result<()> {
    http::HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|_| GatewayError::Config(format!("Invalid header name '{}'", name)))
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            auth_context_header: default_auth_context_header(),
            request_id_header: default_request_id_header(),
            blocked_headers: Vec::new(),
            proxy: ProxyConfig::default(),
            origins: Vec::new(),
            endpoints: Vec::new(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}
