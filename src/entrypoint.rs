//! Entrypoint — HTTP listener and per-request dispatch
//!
//! Accepts connections, routes each request to an endpoint, runs the auth
//! gate for authenticated routes and hands the request to the proxy.

use crate::auth::{AuthDecision, AuthGate, RequestContext};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::observability::{AccessLog, ActiveRequest, GatewayMetrics, RequestTracker};
use crate::proxy::{self, HttpProxy, OutboundRequest, ProxyBody};
use crate::router::{MatchOutcome, RouterTable};
use crate::service::OriginPool;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Header settings resolved once from configuration
#[derive(Debug, Clone)]
pub(crate) struct RequestSettings {
    pub auth_context_header: HeaderName,
    pub request_id_header: HeaderName,
    /// Globally blocked names plus the auth context header
    pub blocked_headers: Vec<HeaderName>,
    pub max_request_body_bytes: usize,
}

impl RequestSettings {
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let auth_context_header = parse_header_name(&config.auth_context_header)?;
        let request_id_header = parse_header_name(&config.request_id_header)?;
        let mut blocked_headers = config
            .blocked_headers
            .iter()
            .map(|h| parse_header_name(h))
            .collect::<Result<Vec<_>>>()?;
        // Clients must never supply their own auth context
        blocked_headers.push(auth_context_header.clone());

        Ok(Self {
            auth_context_header,
            request_id_header,
            blocked_headers,
            max_request_body_bytes: config.proxy.max_request_body_bytes,
        })
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| GatewayError::Config(format!("Invalid header name '{}'", name)))
}

/// Shared state for request handling
pub(crate) struct SharedState {
    pub pool: Arc<OriginPool>,
    /// Swapped whole when endpoints are replaced
    pub router: RwLock<Arc<RouterTable>>,
    pub auth: AuthGate,
    pub proxy: HttpProxy,
    pub settings: RequestSettings,
    pub metrics: Arc<GatewayMetrics>,
    pub access_log: AccessLog,
}

impl SharedState {
    pub fn router(&self) -> Arc<RouterTable> {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn swap_router(&self, table: RouterTable) {
        *self.router.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }
}

/// Bind the listen address
pub(crate) async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| GatewayError::Config(format!("Invalid listen address '{}': {}", addr, e)))?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Other(format!("Failed to bind {}: {}", addr, e)))
}

/// Run the accept loop until `cancel` fires. Open connections finish their
/// in-flight request and then close.
pub(crate) fn serve(
    listener: TcpListener,
    state: Arc<SharedState>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let state = state.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let conn = http1::Builder::new().serve_connection(
                    io,
                    service_fn(move |req| handle_http_request(req, remote_addr, state.clone())),
                );
                tokio::pin!(conn);

                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            tracing::debug!(remote = %remote_addr, error = %e, "Connection closed with error");
                        }
                    }
                    _ = cancel.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(e) = conn.as_mut().await {
                            tracing::debug!(remote = %remote_addr, error = %e, "Connection drain failed");
                        }
                    }
                }
            });
        }
        tracing::info!("HTTP entrypoint stopped accepting connections");
    })
}

/// Handle an individual HTTP request
async fn handle_http_request(
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<SharedState>,
) -> std::result::Result<hyper::Response<ProxyBody>, Infallible> {
    let active = state.metrics.track_active();
    let response = dispatch(req, remote_addr, &state).await;
    Ok(response.map(|body| track_body(body, active)))
}

/// Response body that keeps the request counted as active until the body
/// has been fully written or dropped, which for streams outlives dispatch
struct TrackedBody {
    inner: ProxyBody,
    _active: ActiveRequest,
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, GatewayError>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn track_body(body: ProxyBody, active: ActiveRequest) -> ProxyBody {
    TrackedBody {
        inner: body,
        _active: active,
    }
    .boxed()
}

async fn dispatch(
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    state: &SharedState,
) -> hyper::Response<ProxyBody> {
    let (parts, body) = req.into_parts();
    let settings = &state.settings;

    let request_id = parts
        .headers
        .get(&settings.request_id_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let mut tracker = state.access_log.start_request(
        request_id.clone(),
        remote_addr.ip().to_string(),
        method.clone(),
        path.clone(),
        parts
            .headers
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    let route = match state.router().match_request(&method, &path) {
        MatchOutcome::Matched(route) => route,
        MatchOutcome::NotFound => {
            return finish(
                state,
                &tracker,
                &request_id,
                error_response(StatusCode::NOT_FOUND, "No route matched"),
                None,
            );
        }
        MatchOutcome::MethodNotAllowed => {
            return finish(
                state,
                &tracker,
                &request_id,
                error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
                None,
            );
        }
    };

    let endpoint = route.endpoint.clone();
    tracker.set_endpoint(endpoint.id());
    state.metrics.record_endpoint_request(endpoint.id());

    // Body
    let limit = endpoint
        .config
        .max_request_body_bytes
        .unwrap_or(settings.max_request_body_bytes);
    let declared_len = parts
        .headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared_len.is_some_and(|len| len > limit as u64) {
        return finish(
            state,
            &tracker,
            &request_id,
            error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"),
            None,
        );
    }
    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return finish(
                state,
                &tracker,
                &request_id,
                error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"),
                None,
            );
        }
        Err(e) => {
            tracing::debug!(request_id, error = %e, "Failed to read request body");
            return finish(
                state,
                &tracker,
                &request_id,
                error_response(StatusCode::BAD_REQUEST, "Failed to read request body"),
                None,
            );
        }
    };

    // Auth gate
    let mut auth_header = None;
    if route.group.requires_auth() {
        let ctx = RequestContext {
            request_id: request_id.clone(),
            client_ip: remote_addr.ip().to_string(),
            method: method.clone(),
            path: path.clone(),
            query: parts.uri.query().map(str::to_string),
            headers: header_map(&parts.headers),
            endpoint_id: endpoint.id().to_string(),
            pattern: route.pattern.clone(),
            url_params: route.params.clone(),
        };
        let auth = state.auth.evaluate(&ctx).await;
        let decision = auth.decision();
        if decision != AuthDecision::Allow {
            let message = auth
                .failure_message
                .clone()
                .unwrap_or_else(|| "Request not authorized".to_string());
            return finish(
                state,
                &tracker,
                &request_id,
                error_response(decision.status(), &message),
                None,
            );
        }
        match auth.to_base64().map(HeaderValue::try_from) {
            Ok(Ok(value)) => auth_header = Some(value),
            Ok(Err(e)) => {
                tracing::error!(request_id, error = %e, "Auth context is not a valid header value");
                return finish(
                    state,
                    &tracker,
                    &request_id,
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode auth context"),
                    None,
                );
            }
            Err(e) => {
                tracing::error!(request_id, error = %e, "Failed to encode auth context");
                return finish(
                    state,
                    &tracker,
                    &request_id,
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode auth context"),
                    None,
                );
            }
        }
    }

    // Outbound request
    let mut blocked = settings.blocked_headers.clone();
    for name in &endpoint.config.blocked_headers {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            blocked.push(name);
        }
    }
    let mut headers = proxy::filter_request_headers(&parts.headers, &blocked);
    if let Some(value) = auth_header {
        headers.insert(settings.auth_context_header.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(settings.request_id_header.clone(), value);
    }

    let origin_path = endpoint.rewrite_path(&method, &path).unwrap_or_else(|| path.clone());
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", origin_path, query),
        None => origin_path,
    };
    let outbound = OutboundRequest {
        method: parts.method.clone(),
        path_and_query,
        headers,
        body,
    };

    let forwarded = match state
        .proxy
        .forward(&endpoint, &state.pool, &outbound, &request_id)
        .await
    {
        Ok(forwarded) => forwarded,
        Err(failure) => {
            tracker.set_attempts(failure.attempts);
            tracing::warn!(
                request_id,
                endpoint = endpoint.id(),
                attempts = failure.attempts,
                error = %failure.error,
                "Request could not be forwarded"
            );
            return finish(
                state,
                &tracker,
                &request_id,
                error_response(failure.status(), &failure.error.to_string()),
                None,
            );
        }
    };
    tracker.set_origin(forwarded.origin().id(), forwarded.attempts);

    let head_only = parts.method == http::Method::HEAD;
    match state.proxy.respond(forwarded, head_only, &request_id).await {
        Ok(proxied) => {
            if proxied.streamed {
                state.metrics.record_streamed();
            }
            finish(state, &tracker, &request_id, proxied.response, proxied.body_bytes)
        }
        Err(e) => {
            tracing::warn!(request_id, endpoint = endpoint.id(), error = %e, "Failed to read origin response");
            finish(
                state,
                &tracker,
                &request_id,
                error_response(StatusCode::BAD_GATEWAY, &e.to_string()),
                None,
            )
        }
    }
}

/// Stamp the request ID, count and log the response
fn finish(
    state: &SharedState,
    tracker: &RequestTracker,
    request_id: &str,
    mut response: hyper::Response<ProxyBody>,
    body_bytes: Option<u64>,
) -> hyper::Response<ProxyBody> {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(state.settings.request_id_header.clone(), value);
    }
    let status = response.status().as_u16();
    state.metrics.record_response(status);
    state.access_log.record(&tracker.finish(status, body_bytes));
    response
}

/// JSON error response: `{"error": "..."}`
pub(crate) fn error_response(status: StatusCode, message: &str) -> hyper::Response<ProxyBody> {
    let body = Bytes::from(serde_json::json!({ "error": message }).to_string());
    let mut response = hyper::Response::new(proxy::full_body(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Inbound headers as a lower-cased name map; repeated values are joined
fn header_map(headers: &http::HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_settings_block_auth_header() {
        let mut config = GatewayConfig::default();
        config.blocked_headers = vec!["x-secret".to_string()];
        let settings = RequestSettings::from_config(&config).unwrap();
        assert_eq!(settings.auth_context_header, "x-auth-context");
        assert!(settings.blocked_headers.iter().any(|h| h == "x-secret"));
        assert!(settings.blocked_headers.iter().any(|h| h == "x-auth-context"));
    }

    #[test]
    fn test_request_settings_invalid_header() {
        let mut config = GatewayConfig::default();
        config.request_id_header = "bad header".to_string();
        assert!(RequestSettings::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = error_response(StatusCode::NOT_FOUND, "No \"route\" matched");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "application/json");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "No \"route\" matched");
    }

    #[test]
    fn test_header_map_joins_repeats() {
        let mut headers = http::HeaderMap::new();
        headers.append("Accept", "text/plain".parse().unwrap());
        headers.append("accept", "application/json".parse().unwrap());
        headers.insert("X-Api-Key", "k".parse().unwrap());
        let map = header_map(&headers);
        assert_eq!(map["accept"], "text/plain, application/json");
        assert_eq!(map["x-api-key"], "k");
    }

    #[tokio::test]
    async fn test_tracked_body_holds_active_gauge() {
        let metrics = Arc::new(GatewayMetrics::new());
        let body = track_body(proxy::full_body("streamed"), metrics.track_active());
        assert_eq!(metrics.snapshot().active_requests, 1);

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from("streamed"));
        assert_eq!(metrics.snapshot().active_requests, 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let err = bind("not-an-address").await.unwrap_err();
        assert!(err.to_string().contains("Invalid listen address"));
    }
}
