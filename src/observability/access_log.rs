//! Structured access log — one JSON entry per handled request
//!
//! Entries are emitted through `tracing` under the `access_log` target so
//! they can be routed or filtered independently of diagnostic logs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A single access log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub request_id: String,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    /// HTTP status code sent to the client
    pub status: u16,
    /// Response size in bytes; absent for streamed responses
    pub response_bytes: Option<u64>,
    /// Time until the response head was ready, in milliseconds
    pub duration_ms: u64,
    /// Endpoint that matched
    pub endpoint: Option<String>,
    /// Origin that produced the response
    pub origin: Option<String>,
    /// Origins contacted, including failovers
    pub attempts: u32,
    pub user_agent: Option<String>,
}

/// Access log manager: emits entries and counts them
pub struct AccessLog {
    total_entries: AtomicU64,
}

impl AccessLog {
    pub fn new() -> Self {
        Self {
            total_entries: AtomicU64::new(0),
        }
    }

    /// Start tracking a request
    pub fn start_request(
        &self,
        request_id: impl Into<String>,
        client_ip: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        user_agent: Option<String>,
    ) -> RequestTracker {
        RequestTracker {
            start: Instant::now(),
            request_id: request_id.into(),
            client_ip: client_ip.into(),
            method: method.into(),
            path: path.into(),
            user_agent,
            endpoint: None,
            origin: None,
            attempts: 0,
        }
    }

    /// Record and emit a log entry
    pub fn record(&self, entry: &AccessLogEntry) {
        self.total_entries.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "access_log",
            request_id = entry.request_id,
            client_ip = entry.client_ip,
            method = entry.method,
            path = entry.path,
            status = entry.status,
            duration_ms = entry.duration_ms,
            endpoint = entry.endpoint.as_deref().unwrap_or("-"),
            origin = entry.origin.as_deref().unwrap_or("-"),
            attempts = entry.attempts,
            "{}",
            serde_json::to_string(entry).unwrap_or_default()
        );
    }

    /// Number of entries emitted so far
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects request facts while the request is dispatched
pub struct RequestTracker {
    start: Instant,
    request_id: String,
    client_ip: String,
    method: String,
    path: String,
    user_agent: Option<String>,
    endpoint: Option<String>,
    origin: Option<String>,
    attempts: u32,
}

impl RequestTracker {
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn set_endpoint(&mut self, endpoint: &str) {
        self.endpoint = Some(endpoint.to_string());
    }

    pub fn set_origin(&mut self, origin: &str, attempts: u32) {
        self.origin = Some(origin.to_string());
        self.attempts = attempts;
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    /// Build the entry for the final response
    pub fn finish(&self, status: u16, response_bytes: Option<u64>) -> AccessLogEntry {
        AccessLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: self.request_id.clone(),
            client_ip: self.client_ip.clone(),
            method: self.method.clone(),
            path: self.path.clone(),
            status,
            response_bytes,
            duration_ms: self.elapsed_ms(),
            endpoint: self.endpoint.clone(),
            origin: self.origin.clone(),
            attempts: self.attempts,
            user_agent: self.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(log: &AccessLog) -> RequestTracker {
        log.start_request("req-1", "10.0.0.1", "GET", "/v1/users/7", Some("curl/8.0".to_string()))
    }

    #[test]
    fn test_entry_serialization() {
        let log = AccessLog::new();
        let mut t = tracker(&log);
        t.set_endpoint("users");
        t.set_origin("o2", 2);
        let entry = t.finish(200, Some(512));

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"method\":\"GET\""));
        assert!(json.contains("\"status\":200"));
        assert!(json.contains("\"origin\":\"o2\""));

        let parsed: AccessLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, "req-1");
        assert_eq!(parsed.attempts, 2);
        assert_eq!(parsed.response_bytes, Some(512));
    }

    #[test]
    fn test_unrouted_entry() {
        let log = AccessLog::new();
        let entry = tracker(&log).finish(404, Some(0));
        assert!(entry.endpoint.is_none());
        assert!(entry.origin.is_none());
        assert_eq!(entry.attempts, 0);
    }

    #[test]
    fn test_access_log_total_entries() {
        let log = AccessLog::default();
        assert_eq!(log.total_entries(), 0);
        let entry = tracker(&log).finish(200, None);
        log.record(&entry);
        log.record(&entry);
        assert_eq!(log.total_entries(), 2);
    }

    #[test]
    fn test_request_tracker_elapsed() {
        let log = AccessLog::new();
        let t = tracker(&log);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(t.elapsed_ms() >= 5);
    }
}
