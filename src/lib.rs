//! # Portico Gateway
//!
//! An API gateway that routes requests by parameterized URL pattern to
//! load-balanced, health-checked origin servers, with an authentication
//! hook and streaming passthrough.
//!
//! ## Architecture
//!
//! ```text
//! Entrypoint → Endpoint Router → Auth Gate → Proxy Forwarder → Origin
//!                                                ↑
//!                        Load Balancer ← Origin Pool ← Health Monitor
//! ```
//!
//! ## Core Features
//!
//! - **Pattern routing**: `/{version}/users/{id}` style patterns, most
//!   specific match wins
//! - **Load balancing**: round-robin or random over healthy origins
//! - **Health checks**: active probes with consecutive-result thresholds
//! - **Failover**: connection failures and timeouts retry on other origins
//! - **Auth hook**: application callback whose result is forwarded to
//!   origins as a base64 header
//! - **Streaming**: chunked, SSE and NDJSON responses relayed unbuffered
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portico_gateway::{Gateway, config::GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> portico_gateway::Result<()> {
//!     let config = GatewayConfig::from_file("gateway.hcl").await?;
//!     let gateway = Gateway::new(config)?;
//!     gateway.start().await?;
//!     gateway.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub(crate) mod entrypoint;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod proxy;
pub mod router;
pub mod service;
pub mod storage;

// Re-export main types
pub use auth::{
    AuthContext, AuthenticationContext, AuthenticationResult, Authenticator,
    AuthorizationContext, AuthorizationResult, FnAuthenticator, RequestContext,
};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;

use observability::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use service::OriginStatus;

/// Gateway runtime state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GatewayState {
    /// Gateway has been created but not yet started
    #[default]
    Created,
    /// Gateway is binding its listener and starting probers
    Starting,
    /// Gateway is actively accepting and proxying requests
    Running,
    /// Gateway is draining connections and shutting down
    Stopping,
    /// Gateway has fully stopped
    Stopped,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Gateway health status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current gateway state
    pub state: GatewayState,
    /// Uptime in seconds since the gateway was created
    pub uptime_secs: u64,
    /// Requests currently being dispatched
    pub active_requests: usize,
    /// Total requests answered
    pub total_requests: u64,
    /// Origins currently eligible for traffic
    pub healthy_origins: usize,
    /// Per-origin health, sorted by identifier
    pub origins: Vec<OriginStatus>,
    /// Number of configured endpoints
    pub endpoints: usize,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_state_default() {
        assert_eq!(GatewayState::default(), GatewayState::Created);
    }

    #[test]
    fn test_gateway_state_display() {
        assert_eq!(GatewayState::Created.to_string(), "created");
        assert_eq!(GatewayState::Starting.to_string(), "starting");
        assert_eq!(GatewayState::Running.to_string(), "running");
        assert_eq!(GatewayState::Stopping.to_string(), "stopping");
        assert_eq!(GatewayState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_gateway_state_serialization() {
        let json = serde_json::to_string(&GatewayState::Running).unwrap();
        let parsed: GatewayState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, GatewayState::Running);
    }

    #[test]
    fn test_health_status_default() {
        let health = HealthStatus::default();
        assert_eq!(health.state, GatewayState::Created);
        assert_eq!(health.uptime_secs, 0);
        assert_eq!(health.active_requests, 0);
        assert!(health.origins.is_empty());
    }

    #[test]
    fn test_health_status_serialization() {
        let health = HealthStatus {
            state: GatewayState::Running,
            uptime_secs: 3600,
            total_requests: 10000,
            healthy_origins: 2,
            ..HealthStatus::default()
        };
        let json = serde_json::to_string(&health).unwrap();
        let parsed: HealthStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state, GatewayState::Running);
        assert_eq!(parsed.total_requests, 10000);
        assert_eq!(parsed.healthy_origins, 2);
    }
}
