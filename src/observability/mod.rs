//! Observability — access logging and in-process metrics

pub mod access_log;
pub mod metrics;

pub use access_log::{AccessLog, AccessLogEntry, RequestTracker};
pub use metrics::{ActiveRequest, GatewayMetrics, MetricsSnapshot};
