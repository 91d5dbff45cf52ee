//! Centralized error types for Portico Gateway

use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An auth context blob could not be decoded
    #[error("Invalid auth context: {0}")]
    AuthContextDecode(String),

    /// Storage collaborator failed
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Origin could not be reached (connect, reset, removed mid-request)
    #[error("Origin '{origin}' unavailable: {reason}")]
    OriginUnavailable { origin: String, reason: String },

    /// Origin did not respond within the deadline
    #[error("Upstream timeout after {0}ms")]
    UpstreamTimeout(u64),

    /// No origin can serve the request
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Origin stream failed after the response started
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Whether the failed attempt may be retried against another origin.
    ///
    /// Only failures that happened before any response byte was relayed
    /// qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OriginUnavailable { .. } | Self::UpstreamTimeout(_) => true,
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::UpstreamTimeout(100).is_retryable());
        assert!(GatewayError::OriginUnavailable {
            origin: "o1".into(),
            reason: "refused".into()
        }
        .is_retryable());
        assert!(!GatewayError::Config("bad".into()).is_retryable());
        assert!(!GatewayError::StreamInterrupted("eof".into()).is_retryable());
        assert!(!GatewayError::ServiceUnavailable("none".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::OriginUnavailable {
            origin: "origin-a".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Origin 'origin-a' unavailable: connection refused"
        );
        assert_eq!(
            GatewayError::UpstreamTimeout(250).to_string(),
            "Upstream timeout after 250ms"
        );
    }
}
