//! Gateway metrics — lightweight in-process counters and gauges

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Point-in-time view of all metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total requests answered
    pub total_requests: u64,
    /// Responses by status class ("2xx", "4xx", ...)
    pub status_classes: HashMap<String, u64>,
    /// Requests retried on another origin
    pub failovers: u64,
    /// Responses relayed as streams
    pub streamed_responses: u64,
    /// Requests currently being dispatched
    pub active_requests: i64,
    /// Per-endpoint request counts
    pub endpoint_requests: HashMap<String, u64>,
}

/// Gateway metrics collector
pub struct GatewayMetrics {
    total_requests: AtomicU64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    failovers: AtomicU64,
    streamed_responses: AtomicU64,
    active_requests: AtomicI64,
    endpoint_requests: RwLock<HashMap<String, u64>>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_3xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            streamed_responses: AtomicU64::new(0),
            active_requests: AtomicI64::new(0),
            endpoint_requests: RwLock::new(HashMap::new()),
        }
    }

    /// Record a response sent to the client
    pub fn record_response(&self, status: u16) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match status / 100 {
            2 => &self.status_2xx,
            3 => &self.status_3xx,
            4 => &self.status_4xx,
            5 => &self.status_5xx,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        let mut map = self
            .endpoint_requests
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *map.entry(endpoint.to_string()).or_insert(0) += 1;
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_streamed(&self) {
        self.streamed_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_started(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_finished(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a request as active until the returned guard is dropped
    pub fn track_active(self: &Arc<Self>) -> ActiveRequest {
        self.request_started();
        ActiveRequest {
            metrics: self.clone(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut status_classes = HashMap::new();
        for (class, counter) in [
            ("2xx", &self.status_2xx),
            ("3xx", &self.status_3xx),
            ("4xx", &self.status_4xx),
            ("5xx", &self.status_5xx),
        ] {
            status_classes.insert(class.to_string(), counter.load(Ordering::Relaxed));
        }

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            status_classes,
            failovers: self.failovers.load(Ordering::Relaxed),
            streamed_responses: self.streamed_responses.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
            endpoint_requests: self
                .endpoint_requests
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Keeps the active-requests gauge raised while alive
pub struct ActiveRequest {
    metrics: Arc<GatewayMetrics>,
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.metrics.request_finished();
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        let metrics = GatewayMetrics::new();
        for status in [200u16, 204, 301, 404, 405, 502, 503, 99] {
            metrics.record_response(status);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 8);
        assert_eq!(snap.status_classes["2xx"], 2);
        assert_eq!(snap.status_classes["3xx"], 1);
        assert_eq!(snap.status_classes["4xx"], 2);
        assert_eq!(snap.status_classes["5xx"], 2);
    }

    #[test]
    fn test_active_requests_gauge() {
        let metrics = GatewayMetrics::default();
        metrics.request_started();
        metrics.request_started();
        metrics.request_finished();
        assert_eq!(metrics.snapshot().active_requests, 1);
    }

    #[test]
    fn test_active_request_guard() {
        let metrics = Arc::new(GatewayMetrics::new());
        let first = metrics.track_active();
        let second = metrics.track_active();
        assert_eq!(metrics.snapshot().active_requests, 2);
        drop(first);
        assert_eq!(metrics.snapshot().active_requests, 1);
        drop(second);
        assert_eq!(metrics.snapshot().active_requests, 0);
    }

    #[test]
    fn test_endpoint_and_failover_counters() {
        let metrics = GatewayMetrics::new();
        metrics.record_endpoint_request("users");
        metrics.record_endpoint_request("users");
        metrics.record_endpoint_request("orders");
        metrics.record_failover();
        metrics.record_streamed();

        let snap = metrics.snapshot();
        assert_eq!(snap.endpoint_requests["users"], 2);
        assert_eq!(snap.endpoint_requests["orders"], 1);
        assert_eq!(snap.failovers, 1);
        assert_eq!(snap.streamed_responses, 1);
    }
}
