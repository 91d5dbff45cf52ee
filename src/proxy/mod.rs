//! Proxy layer — request forwarding to origins
//!
//! Handles buffered HTTP forwarding with failover and chunked/SSE
//! streaming passthrough.

pub mod http_proxy;
pub mod streaming;

pub use http_proxy::{
    filter_request_headers, filter_response_headers, full_body, ForwardError, Forwarded,
    HttpProxy, OutboundRequest, ProxiedResponse,
};
pub use streaming::{is_event_stream, is_streaming_response, ProxyBody, SseFramer};
