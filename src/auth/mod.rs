//! Auth gate — runs the application's authentication/authorization hook
//!
//! The gate invokes an injected [`Authenticator`] for requests that matched
//! an endpoint's authenticated route group. Errors and panics raised by the
//! hook become `InternalError` results; they never reach the caller raw.

mod context;

pub use context::{
    AuthContext, AuthDecision, AuthenticationContext, AuthenticationResult,
    AuthorizationContext, AuthorizationResult,
};

use crate::error::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Request details handed to the authentication hook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Lower-cased header names; non UTF-8 values are skipped
    pub headers: HashMap<String, String>,
    pub endpoint_id: String,
    /// Pattern that matched the request
    pub pattern: String,
    pub url_params: HashMap<String, String>,
}

impl RequestContext {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Application-supplied authentication and authorization hook
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Decide who the caller is
    async fn authenticate(&self, ctx: &RequestContext) -> Result<AuthenticationContext>;

    /// Decide whether the authenticated caller may proceed.
    ///
    /// Only called after successful authentication; permits by default.
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        _authentication: &AuthenticationContext,
    ) -> Result<AuthorizationContext> {
        Ok(AuthorizationContext::permitted())
    }
}

/// Adapts a synchronous closure into an [`Authenticator`]
pub struct FnAuthenticator<F> {
    f: F,
}

impl<F> FnAuthenticator<F>
where
    F: Fn(&RequestContext) -> AuthenticationContext + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Authenticator for FnAuthenticator<F>
where
    F: Fn(&RequestContext) -> AuthenticationContext + Send + Sync,
{
    async fn authenticate(&self, ctx: &RequestContext) -> Result<AuthenticationContext> {
        Ok((self.f)(ctx))
    }
}

/// Runs the hook and builds the [`AuthContext`]
#[derive(Clone, Default)]
pub struct AuthGate {
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl AuthGate {
    pub fn new(authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self { authenticator }
    }

    pub fn is_configured(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Authenticate, then authorize on success. Each hook runs at most once.
    pub async fn evaluate(&self, ctx: &RequestContext) -> AuthContext {
        let Some(authenticator) = &self.authenticator else {
            tracing::error!(
                endpoint = ctx.endpoint_id,
                "Authenticated route matched but no authenticator is configured"
            );
            return AuthContext::new(
                AuthenticationContext::internal_error("No authenticator configured"),
                AuthorizationContext::not_evaluated(),
            );
        };

        let authentication = match AssertUnwindSafe(authenticator.authenticate(ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(request_id = ctx.request_id, error = %e, "Authentication hook failed");
                AuthenticationContext::internal_error(e.to_string())
            }
            Err(_) => {
                tracing::error!(request_id = ctx.request_id, "Authentication hook panicked");
                AuthenticationContext::internal_error("Authentication hook panicked")
            }
        };

        if !authentication.is_success() {
            tracing::debug!(
                request_id = ctx.request_id,
                result = ?authentication.result,
                "Authentication rejected request"
            );
            return AuthContext::new(authentication, AuthorizationContext::not_evaluated());
        }

        let authorization = match AssertUnwindSafe(authenticator.authorize(ctx, &authentication))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(request_id = ctx.request_id, error = %e, "Authorization hook failed");
                AuthorizationContext::internal_error(e.to_string())
            }
            Err(_) => {
                tracing::error!(request_id = ctx.request_id, "Authorization hook panicked");
                AuthorizationContext::internal_error("Authorization hook panicked")
            }
        };

        AuthContext::new(authentication, authorization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx_with_header(name: &str, value: &str) -> RequestContext {
        let mut ctx = RequestContext {
            request_id: "req-1".to_string(),
            method: "GET".to_string(),
            path: "/x".to_string(),
            ..Default::default()
        };
        ctx.headers.insert(name.to_string(), value.to_string());
        ctx
    }

    struct TokenAuth {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for TokenAuth {
        async fn authenticate(&self, ctx: &RequestContext) -> Result<AuthenticationContext> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match ctx.header("authorization") {
                Some("Bearer good") | Some("Bearer reader") => {
                    Ok(AuthenticationContext::success().with_metadata(json!({"sub": "u1"})))
                }
                Some("Bearer boom") => Err(GatewayError::Other("token service down".into())),
                Some("Bearer panic") => panic!("hook bug"),
                _ => Ok(AuthenticationContext::denied("missing or bad token")),
            }
        }

        async fn authorize(
            &self,
            ctx: &RequestContext,
            authentication: &AuthenticationContext,
        ) -> Result<AuthorizationContext> {
            assert_eq!(authentication.metadata["sub"], "u1");
            if ctx.header("authorization") == Some("Bearer reader") {
                Ok(AuthorizationContext::denied("read only"))
            } else {
                Ok(AuthorizationContext::permitted())
            }
        }
    }

    fn gate() -> (AuthGate, Arc<TokenAuth>) {
        let auth = Arc::new(TokenAuth {
            calls: AtomicUsize::new(0),
        });
        (AuthGate::new(Some(auth.clone())), auth)
    }

    #[tokio::test]
    async fn test_success_path() {
        let (gate, auth) = gate();
        let result = gate.evaluate(&ctx_with_header("authorization", "Bearer good")).await;
        assert_eq!(result.decision(), AuthDecision::Allow);
        assert_eq!(result.authentication.metadata["sub"], "u1");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denied_skips_authorization() {
        let (gate, _) = gate();
        let result = gate.evaluate(&ctx_with_header("authorization", "Bearer bad")).await;
        assert_eq!(result.decision(), AuthDecision::Unauthenticated);
        assert_eq!(result.authorization.result, AuthorizationResult::NotEvaluated);
        assert_eq!(result.failure_message.as_deref(), Some("missing or bad token"));
    }

    #[tokio::test]
    async fn test_authorization_denied() {
        let (gate, _) = gate();
        let result = gate.evaluate(&ctx_with_header("authorization", "Bearer reader")).await;
        assert_eq!(result.decision(), AuthDecision::Forbidden);
        assert_eq!(result.failure_message.as_deref(), Some("read only"));
    }

    #[tokio::test]
    async fn test_hook_error_is_internal_error() {
        let (gate, _) = gate();
        let result = gate.evaluate(&ctx_with_header("authorization", "Bearer boom")).await;
        assert_eq!(result.authentication.result, AuthenticationResult::InternalError);
        assert_eq!(result.decision(), AuthDecision::InternalError);
        assert!(result.failure_message.unwrap().contains("token service down"));
    }

    #[tokio::test]
    async fn test_hook_panic_is_internal_error() {
        let (gate, _) = gate();
        let result = gate.evaluate(&ctx_with_header("authorization", "Bearer panic")).await;
        assert_eq!(result.decision(), AuthDecision::InternalError);
    }

    #[tokio::test]
    async fn test_missing_authenticator() {
        let gate = AuthGate::default();
        assert!(!gate.is_configured());
        let result = gate.evaluate(&RequestContext::default()).await;
        assert_eq!(result.decision(), AuthDecision::InternalError);
    }

    #[tokio::test]
    async fn test_fn_authenticator() {
        let gate = AuthGate::new(Some(Arc::new(FnAuthenticator::new(|ctx: &RequestContext| {
            if ctx.url_params.get("tenant").map(String::as_str) == Some("acme") {
                AuthenticationContext::success()
            } else {
                AuthenticationContext::denied("unknown tenant")
            }
        }))));

        let mut ctx = RequestContext::default();
        ctx.url_params.insert("tenant".to_string(), "acme".to_string());
        assert_eq!(gate.evaluate(&ctx).await.decision(), AuthDecision::Allow);

        ctx.url_params.insert("tenant".to_string(), "other".to_string());
        assert_eq!(gate.evaluate(&ctx).await.decision(), AuthDecision::Unauthenticated);
    }

    #[test]
    fn test_request_context_header_lookup() {
        let ctx = ctx_with_header("x-api-key", "k");
        assert_eq!(ctx.header("X-Api-Key"), Some("k"));
        assert_eq!(ctx.header("missing"), None);
    }
}
