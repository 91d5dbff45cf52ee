//! HTTP reverse proxy — forwards requests to origins with failover

use super::streaming::{self, ProxyBody, RelayOptions};
use crate::config::ProxyConfig;
use crate::error::{GatewayError, Result};
use crate::observability::GatewayMetrics;
use crate::router::CompiledEndpoint;
use crate::service::{OriginPool, OriginServer, RequestGuard};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use std::time::Duration;

/// A request ready to be sent to any origin of an endpoint
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: http::Method,
    /// Origin path (after rewriting) plus the original query
    pub path_and_query: String,
    /// Filtered headers
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// An origin response whose head has arrived
#[derive(Debug)]
pub struct Forwarded {
    pub response: reqwest::Response,
    /// Keeps the origin's request slot until the body is relayed
    pub guard: RequestGuard,
    /// Origins contacted, including the one that answered
    pub attempts: u32,
    deadline: Duration,
}

impl Forwarded {
    pub fn origin(&self) -> &Arc<OriginServer> {
        self.guard.origin()
    }
}

/// Failure of a forwarded request after every eligible origin was tried
#[derive(Debug)]
pub struct ForwardError {
    pub error: GatewayError,
    pub attempts: u32,
}

impl ForwardError {
    /// 503 when no origin was ever available, 502 otherwise
    pub fn status(&self) -> http::StatusCode {
        if self.attempts == 0 {
            http::StatusCode::SERVICE_UNAVAILABLE
        } else {
            http::StatusCode::BAD_GATEWAY
        }
    }
}

/// Outbound response ready for the client
pub struct ProxiedResponse {
    pub response: http::Response<ProxyBody>,
    /// Body size when buffered
    pub body_bytes: Option<u64>,
    pub streamed: bool,
}

/// HTTP reverse proxy
pub struct HttpProxy {
    client: reqwest::Client,
    config: ProxyConfig,
    metrics: Arc<GatewayMetrics>,
}

impl HttpProxy {
    pub fn new(config: &ProxyConfig, metrics: Arc<GatewayMetrics>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self {
            client,
            config: config.clone(),
            metrics,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Send `request` to the endpoint's origins until one answers.
    ///
    /// Each origin is tried at most once. Only failures that happen before
    /// the response head arrives move on to the next origin.
    pub async fn forward(
        &self,
        endpoint: &CompiledEndpoint,
        pool: &OriginPool,
        request: &OutboundRequest,
        request_id: &str,
    ) -> std::result::Result<Forwarded, ForwardError> {
        let deadline = Duration::from_millis(
            endpoint.config.timeout_ms.unwrap_or(self.config.timeout_ms),
        );
        let max_attempts = endpoint.balancer.max_attempts();
        let mut tried: Vec<String> = Vec::with_capacity(max_attempts);
        let mut attempts = 0u32;
        let mut last_error = None;

        while tried.len() < max_attempts {
            let selected = if tried.is_empty() {
                endpoint.balancer.next_origin(pool, &tried)
            } else {
                endpoint.balancer.failover_origin(pool, &tried)
            };
            let Some(origin) = selected else {
                break;
            };
            tried.push(origin.id().to_string());

            let Some(guard) = origin.try_acquire() else {
                tracing::debug!(
                    request_id,
                    origin = origin.id(),
                    "Origin at max parallel requests, skipping"
                );
                continue;
            };

            if attempts > 0 {
                self.metrics.record_failover();
            }
            attempts += 1;

            match self.attempt(&origin, request, deadline).await {
                Ok(response) => {
                    return Ok(Forwarded {
                        response,
                        guard,
                        attempts,
                        deadline,
                    })
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        request_id,
                        endpoint = endpoint.id(),
                        origin = origin.id(),
                        attempt = attempts,
                        error = %e,
                        "Origin attempt failed, failing over"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(ForwardError { error: e, attempts }),
            }
        }

        let error = last_error.unwrap_or_else(|| {
            GatewayError::ServiceUnavailable(format!(
                "No origin available for endpoint '{}'",
                endpoint.id()
            ))
        });
        Err(ForwardError { error, attempts })
    }

    /// One attempt against one origin, bounded by the header deadline
    async fn attempt(
        &self,
        origin: &OriginServer,
        request: &OutboundRequest,
        deadline: Duration,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", origin.config().base_url(), request.path_and_query);
        let send = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send();

        tokio::select! {
            biased;
            _ = origin.removed_token().cancelled() => Err(GatewayError::OriginUnavailable {
                origin: origin.id().to_string(),
                reason: "origin removed".to_string(),
            }),
            result = tokio::time::timeout(deadline, send) => match result {
                Err(_) => Err(GatewayError::UpstreamTimeout(deadline.as_millis() as u64)),
                Ok(Err(e)) if e.is_connect() => Err(GatewayError::OriginUnavailable {
                    origin: origin.id().to_string(),
                    reason: e.to_string(),
                }),
                Ok(Err(e)) => Err(GatewayError::Http(e)),
                Ok(Ok(response)) => Ok(response),
            },
        }
    }

    /// Turn the origin response into the client response.
    ///
    /// Streamed responses are relayed chunk by chunk; everything else is
    /// buffered and sent with an exact Content-Length.
    pub async fn respond(
        &self,
        forwarded: Forwarded,
        head_only: bool,
        request_id: &str,
    ) -> Result<ProxiedResponse> {
        let Forwarded {
            response,
            guard,
            deadline,
            ..
        } = forwarded;

        let status = response.status();
        let origin_headers = response.headers().clone();
        let streamed = !head_only && streaming::is_streaming_response(&origin_headers);

        let mut builder = http::Response::builder().status(status);
        if let Some(headers) = builder.headers_mut() {
            *headers = filter_response_headers(&origin_headers);
            if head_only {
                if let Some(len) = origin_headers.get(http::header::CONTENT_LENGTH) {
                    headers.insert(http::header::CONTENT_LENGTH, len.clone());
                }
            }
        }

        if streamed {
            let options = RelayOptions {
                request_id: request_id.to_string(),
                origin_id: guard.origin().id().to_string(),
                sse: streaming::is_event_stream(&origin_headers),
                idle_timeout: self.config.stream_idle_timeout(),
                removed: guard.origin().removed_token().clone(),
            };
            let body = streaming::relay(response.bytes_stream(), guard, options);
            let response = builder
                .body(body)
                .map_err(|e| GatewayError::Other(format!("Failed to build response: {}", e)))?;
            return Ok(ProxiedResponse {
                response,
                body_bytes: None,
                streamed: true,
            });
        }

        let body = tokio::time::timeout(deadline, response.bytes())
            .await
            .map_err(|_| GatewayError::UpstreamTimeout(deadline.as_millis() as u64))??;
        drop(guard);

        let len = body.len() as u64;
        let bodyless = status.is_informational()
            || status == http::StatusCode::NO_CONTENT
            || status == http::StatusCode::NOT_MODIFIED;
        if !head_only && !bodyless {
            if let Some(headers) = builder.headers_mut() {
                headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from(len));
            }
        }
        let response = builder
            .body(full_body(body))
            .map_err(|e| GatewayError::Other(format!("Failed to build response: {}", e)))?;
        Ok(ProxiedResponse {
            response,
            body_bytes: Some(len),
            streamed: false,
        })
    }
}

/// Wrap bytes as an outbound body
pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// Headers forwarded to origins: inbound minus hop-by-hop, `Host`,
/// `Content-Length` and every blocked name
pub fn filter_request_headers(inbound: &HeaderMap, blocked: &[HeaderName]) -> HeaderMap {
    let connection_listed = connection_tokens(inbound);
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name.as_str())
            || connection_listed.iter().any(|t| t == name.as_str())
            || name == http::header::HOST
            || name == http::header::CONTENT_LENGTH
            || blocked.contains(name)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers relayed to the client: origin headers minus hop-by-hop and
/// `Content-Length` (recomputed or replaced by chunked framing)
pub fn filter_response_headers(origin: &HeaderMap) -> HeaderMap {
    let connection_listed = connection_tokens(origin);
    let mut out = HeaderMap::with_capacity(origin.len());
    for (name, value) in origin {
        if is_hop_by_hop(name.as_str())
            || connection_listed.iter().any(|t| t == name.as_str())
            || name == http::header::CONTENT_LENGTH
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Header names listed in `Connection`, lower-cased
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
