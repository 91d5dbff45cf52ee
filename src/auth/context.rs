//! Auth context — the authentication/authorization outcome exchanged with
//! the caller's application and forwarded to origins.
//!
//! Wire format is the standard base64 encoding of this JSON:
//!
//! ```json
//! {
//!   "Authentication": { "Result": "Success", "FailureMessage": null, "Metadata": {} },
//!   "Authorization":  { "Result": "Permitted", "FailureMessage": null, "Metadata": null },
//!   "FailureMessage": null
//! }
//! ```

use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Outcome of the authentication callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationResult {
    Success,
    Denied,
    InternalError,
}

/// Outcome of the authorization callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationResult {
    Permitted,
    Denied,
    InternalError,
    /// Authorization was skipped because authentication failed
    NotEvaluated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticationContext {
    pub result: AuthenticationResult,
    #[serde(default)]
    pub failure_message: Option<String>,
    /// Application-supplied metadata, passed through untouched
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuthenticationContext {
    pub fn success() -> Self {
        Self {
            result: AuthenticationResult::Success,
            failure_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            result: AuthenticationResult::Denied,
            failure_message: Some(message.into()),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            result: AuthenticationResult::InternalError,
            failure_message: Some(message.into()),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == AuthenticationResult::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizationContext {
    pub result: AuthorizationResult,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuthorizationContext {
    pub fn permitted() -> Self {
        Self {
            result: AuthorizationResult::Permitted,
            failure_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            result: AuthorizationResult::Denied,
            failure_message: Some(message.into()),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            result: AuthorizationResult::InternalError,
            failure_message: Some(message.into()),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn not_evaluated() -> Self {
        Self {
            result: AuthorizationResult::NotEvaluated,
            failure_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Gateway decision derived from an [`AuthContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// 401
    Unauthenticated,
    /// 403
    Forbidden,
    /// 500
    InternalError,
}

impl AuthDecision {
    pub fn status(&self) -> http::StatusCode {
        match self {
            Self::Allow => http::StatusCode::OK,
            Self::Unauthenticated => http::StatusCode::UNAUTHORIZED,
            Self::Forbidden => http::StatusCode::FORBIDDEN,
            Self::InternalError => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Combined authentication and authorization outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthContext {
    pub authentication: AuthenticationContext,
    pub authorization: AuthorizationContext,
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl AuthContext {
    /// Compose both results; the authentication failure message wins
    pub fn new(authentication: AuthenticationContext, authorization: AuthorizationContext) -> Self {
        let failure_message = if !authentication.is_success() {
            Some(
                authentication
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| "Authentication failed".to_string()),
            )
        } else if authorization.result != AuthorizationResult::Permitted {
            Some(
                authorization
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| "Authorization failed".to_string()),
            )
        } else {
            None
        };

        Self {
            authentication,
            authorization,
            failure_message,
        }
    }

    /// What the gateway should do with the request
    pub fn decision(&self) -> AuthDecision {
        match self.authentication.result {
            AuthenticationResult::Denied => return AuthDecision::Unauthenticated,
            AuthenticationResult::InternalError => return AuthDecision::InternalError,
            AuthenticationResult::Success => {}
        }
        match self.authorization.result {
            AuthorizationResult::Permitted => AuthDecision::Allow,
            AuthorizationResult::Denied => AuthDecision::Forbidden,
            AuthorizationResult::InternalError | AuthorizationResult::NotEvaluated => {
                AuthDecision::InternalError
            }
        }
    }

    /// Standard base64 of the UTF-8 JSON encoding
    pub fn to_base64(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    /// Exact inverse of [`AuthContext::to_base64`]
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| GatewayError::AuthContextDecode(format!("invalid base64: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::AuthContextDecode(format!("invalid JSON: {}", e)))
    }
}
