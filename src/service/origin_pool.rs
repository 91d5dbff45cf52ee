//! Origin pool — origin records and their live health state

use crate::config::OriginConfig;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Health state change produced by a probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
}

#[derive(Debug, Default)]
struct HealthCounters {
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_checked: Option<DateTime<Utc>>,
}

/// A single origin server with live health state
#[derive(Debug)]
pub struct OriginServer {
    config: OriginConfig,
    /// Read lock-free by the load balancer
    healthy: AtomicBool,
    /// Serializes the health read-modify-write cycle
    counters: Mutex<HealthCounters>,
    active_requests: AtomicUsize,
    limiter: Option<Arc<Semaphore>>,
    /// Cancelled when the origin is removed from the pool
    removed: CancellationToken,
}

impl OriginServer {
    /// Create an origin. It starts unhealthy until a probe succeeds.
    pub fn new(config: OriginConfig) -> Self {
        let limiter = config
            .max_parallel_requests
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            config,
            healthy: AtomicBool::new(false),
            counters: Mutex::new(HealthCounters::default()),
            active_requests: AtomicUsize::new(0),
            limiter,
            removed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &OriginConfig {
        &self.config
    }

    /// Whether the origin currently accepts traffic
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && !self.removed.is_cancelled()
    }

    /// Force the health flag, resetting the counters
    pub fn set_healthy(&self, healthy: bool) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.consecutive_failures = 0;
        counters.consecutive_successes = 0;
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Apply one probe result to the health state machine
    pub fn record_probe(&self, success: bool) -> Option<HealthTransition> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.last_checked = Some(Utc::now());
        let healthy = self.healthy.load(Ordering::Acquire);

        if success {
            counters.consecutive_successes = counters.consecutive_successes.saturating_add(1);
            counters.consecutive_failures = 0;
            if !healthy && counters.consecutive_successes >= self.config.healthy_threshold {
                self.healthy.store(true, Ordering::Release);
                return Some(HealthTransition::BecameHealthy);
            }
        } else {
            counters.consecutive_failures = counters.consecutive_failures.saturating_add(1);
            counters.consecutive_successes = 0;
            if healthy && counters.consecutive_failures >= self.config.unhealthy_threshold {
                self.healthy.store(false, Ordering::Release);
                return Some(HealthTransition::BecameUnhealthy);
            }
        }
        None
    }

    /// Reserve a request slot; `None` when at `max_parallel_requests`
    pub fn try_acquire(self: &Arc<Self>) -> Option<RequestGuard> {
        let permit = match &self.limiter {
            Some(sem) => Some(sem.clone().try_acquire_owned().ok()?),
            None => None,
        };
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        Some(RequestGuard {
            origin: self.clone(),
            _permit: permit,
        })
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Token cancelled once the origin is removed
    pub fn removed_token(&self) -> &CancellationToken {
        &self.removed
    }

    pub fn is_removed(&self) -> bool {
        self.removed.is_cancelled()
    }

    fn mark_removed(&self) {
        self.removed.cancel();
        self.healthy.store(false, Ordering::Release);
    }

    /// Point-in-time view of the origin
    pub fn status(&self) -> OriginStatus {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        OriginStatus {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            hostname: self.config.hostname.clone(),
            port: self.config.port,
            tls: self.config.tls,
            healthy: self.is_healthy(),
            consecutive_failures: counters.consecutive_failures,
            consecutive_successes: counters.consecutive_successes,
            last_checked: counters.last_checked,
            active_requests: self.active_requests(),
        }
    }
}

/// Holds an origin's request slot until the response is fully relayed
#[derive(Debug)]
pub struct RequestGuard {
    origin: Arc<OriginServer>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RequestGuard {
    pub fn origin(&self) -> &Arc<OriginServer> {
        &self.origin
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.origin.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serializable origin snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginStatus {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub tls: bool,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub active_requests: usize,
}

/// All configured origins keyed by identifier
#[derive(Debug, Default)]
pub struct OriginPool {
    origins: RwLock<HashMap<String, Arc<OriginServer>>>,
}

impl OriginPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool, rejecting invalid or duplicate origins
    pub fn from_config(configs: &[OriginConfig]) -> Result<Self> {
        let pool = Self::new();
        for config in configs {
            pool.insert(config.clone())?;
        }
        Ok(pool)
    }

    pub fn get(&self, id: &str) -> Option<Arc<OriginServer>> {
        self.read().get(id).cloned()
    }

    /// Add a new origin
    pub fn insert(&self, config: OriginConfig) -> Result<Arc<OriginServer>> {
        config.validate()?;
        let mut origins = self.write();
        if origins.contains_key(&config.id) {
            return Err(GatewayError::Config(format!(
                "Origin '{}' already exists",
                config.id
            )));
        }
        let origin = Arc::new(OriginServer::new(config));
        origins.insert(origin.id().to_string(), origin.clone());
        Ok(origin)
    }

    /// Replace an existing origin's settings. The new record starts unhealthy.
    ///
    /// Returns `(old, new)`. In-flight requests keep using the old record.
    pub fn replace(&self, config: OriginConfig) -> Result<(Arc<OriginServer>, Arc<OriginServer>)> {
        config.validate()?;
        let mut origins = self.write();
        let old = origins.get(&config.id).cloned().ok_or_else(|| {
            GatewayError::Config(format!("Origin '{}' does not exist", config.id))
        })?;
        let new = Arc::new(OriginServer::new(config));
        origins.insert(new.id().to_string(), new.clone());
        Ok((old, new))
    }

    /// Remove an origin; it becomes ineligible immediately
    pub fn remove(&self, id: &str) -> Option<Arc<OriginServer>> {
        let removed = self.write().remove(id);
        if let Some(origin) = &removed {
            origin.mark_removed();
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<OriginServer>> {
        self.read().values().cloned().collect()
    }

    /// Snapshot of every origin, sorted by identifier
    pub fn statuses(&self) -> Vec<OriginStatus> {
        let mut statuses: Vec<_> = self.read().values().map(|o| o.status()).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub fn healthy_count(&self) -> usize {
        self.read().values().filter(|o| o.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<OriginServer>>> {
        self.origins.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<OriginServer>>> {
        self.origins.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(id: &str, unhealthy: u32, healthy: u32) -> OriginServer {
        let mut config = OriginConfig::new(id, "127.0.0.1", 8001);
        config.unhealthy_threshold = unhealthy;
        config.healthy_threshold = healthy;
        OriginServer::new(config)
    }

    #[test]
    fn test_origin_starts_unhealthy() {
        let o = origin("a", 1, 1);
        assert!(!o.is_healthy());
        assert!(o.status().last_checked.is_none());
    }

    #[test]
    fn test_threshold_one_is_immediate() {
        let o = origin("a", 1, 1);
        assert_eq!(o.record_probe(true), Some(HealthTransition::BecameHealthy));
        assert!(o.is_healthy());
        assert_eq!(o.record_probe(false), Some(HealthTransition::BecameUnhealthy));
        assert!(!o.is_healthy());
    }

    #[test]
    fn test_unhealthy_threshold_two_needs_two_failures() {
        let o = origin("a", 2, 1);
        o.record_probe(true);
        assert!(o.is_healthy());

        assert_eq!(o.record_probe(false), None);
        assert!(o.is_healthy());
        assert_eq!(o.record_probe(false), Some(HealthTransition::BecameUnhealthy));
        assert!(!o.is_healthy());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let o = origin("a", 2, 1);
        o.record_probe(true);
        o.record_probe(false);
        o.record_probe(true);
        assert_eq!(o.status().consecutive_failures, 0);
        assert_eq!(o.record_probe(false), None);
        assert!(o.is_healthy());
    }

    #[test]
    fn test_healthy_threshold_three() {
        let o = origin("a", 1, 3);
        assert_eq!(o.record_probe(true), None);
        assert_eq!(o.record_probe(true), None);
        assert_eq!(o.record_probe(true), Some(HealthTransition::BecameHealthy));
        let status = o.status();
        assert_eq!(status.consecutive_successes, 3);
        assert!(status.last_checked.is_some());
    }

    #[test]
    fn test_no_repeated_transition() {
        let o = origin("a", 1, 1);
        o.record_probe(true);
        assert_eq!(o.record_probe(true), None);
    }

    #[test]
    fn test_request_guard_limits_parallelism() {
        let mut config = OriginConfig::new("a", "127.0.0.1", 8001);
        config.max_parallel_requests = Some(1);
        let o = Arc::new(OriginServer::new(config));

        let guard = o.try_acquire().unwrap();
        assert_eq!(o.active_requests(), 1);
        assert!(o.try_acquire().is_none());
        drop(guard);
        assert_eq!(o.active_requests(), 0);
        assert!(o.try_acquire().is_some());
    }

    #[test]
    fn test_pool_rejects_duplicates() {
        let pool = OriginPool::new();
        pool.insert(OriginConfig::new("a", "h", 1)).unwrap();
        assert!(pool.insert(OriginConfig::new("a", "h", 2)).is_err());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_pool_remove_marks_origin() {
        let pool = OriginPool::new();
        let o = pool.insert(OriginConfig::new("a", "h", 1)).unwrap();
        o.set_healthy(true);

        let removed = pool.remove("a").unwrap();
        assert!(removed.is_removed());
        assert!(!o.is_healthy());
        assert!(pool.get("a").is_none());
        assert!(pool.remove("a").is_none());
    }

    #[test]
    fn test_pool_replace_resets_health() {
        let pool = OriginPool::new();
        let o = pool.insert(OriginConfig::new("a", "h", 1)).unwrap();
        o.set_healthy(true);

        let (old, new) = pool.replace(OriginConfig::new("a", "h2", 2)).unwrap();
        assert!(Arc::ptr_eq(&old, &o));
        assert!(!new.is_healthy());
        assert_eq!(pool.get("a").unwrap().config().hostname, "h2");
        assert!(pool.replace(OriginConfig::new("missing", "h", 1)).is_err());
    }

    #[test]
    fn test_pool_rejects_invalid_config() {
        let pool = OriginPool::new();
        assert!(pool.insert(OriginConfig::new("a", "h", 0)).is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_statuses_sorted() {
        let pool = OriginPool::from_config(&[
            OriginConfig::new("b", "h", 1),
            OriginConfig::new("a", "h", 2),
        ])
        .unwrap();
        let ids: Vec<_> = pool.statuses().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(pool.healthy_count(), 0);
    }
}
