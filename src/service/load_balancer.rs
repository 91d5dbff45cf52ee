//! Load balancer — selects a healthy origin for an endpoint

use super::origin_pool::{OriginPool, OriginServer};
use crate::config::LoadBalancingMode;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-endpoint origin selector
#[derive(Debug)]
pub struct LoadBalancer {
    /// Endpoint identifier
    pub endpoint: String,
    mode: LoadBalancingMode,
    /// Origin identifiers in rotation order
    origin_ids: Vec<String>,
    /// Round-robin cursor, advanced once per selection
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(endpoint: impl Into<String>, mode: LoadBalancingMode, origin_ids: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            mode,
            origin_ids,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Select the next eligible origin, advancing the round-robin cursor.
    ///
    /// Eligible means present in the pool, healthy, and not in `exclude`.
    /// Returns `None` after one full rotation without an eligible origin.
    pub fn next_origin(&self, pool: &OriginPool, exclude: &[String]) -> Option<Arc<OriginServer>> {
        self.select(pool, exclude, true)
    }

    /// Select a replacement for a failed attempt without moving the cursor,
    /// so a failover does not shift the rotation for later requests
    pub fn failover_origin(
        &self,
        pool: &OriginPool,
        exclude: &[String],
    ) -> Option<Arc<OriginServer>> {
        self.select(pool, exclude, false)
    }

    fn select(&self, pool: &OriginPool, exclude: &[String], advance: bool) -> Option<Arc<OriginServer>> {
        if self.origin_ids.is_empty() {
            return None;
        }

        match self.mode {
            LoadBalancingMode::RoundRobin => {
                let len = self.origin_ids.len();
                let start = if advance {
                    self.cursor.fetch_add(1, Ordering::Relaxed)
                } else {
                    self.cursor.load(Ordering::Relaxed)
                };
                (0..len).find_map(|offset| {
                    let id = &self.origin_ids[start.wrapping_add(offset) % len];
                    eligible(pool, id, exclude)
                })
            }
            LoadBalancingMode::Random => {
                let candidates: Vec<Arc<OriginServer>> = self
                    .origin_ids
                    .iter()
                    .filter_map(|id| eligible(pool, id, exclude))
                    .collect();
                if candidates.is_empty() {
                    return None;
                }
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                Some(candidates[idx].clone())
            }
        }
    }

    /// Upper bound on attempts for one request: distinct configured origins
    pub fn max_attempts(&self) -> usize {
        let mut ids: Vec<&String> = self.origin_ids.iter().collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn origin_ids(&self) -> &[String] {
        &self.origin_ids
    }

    pub fn mode(&self) -> LoadBalancingMode {
        self.mode
    }

    /// Number of configured origins currently healthy
    pub fn healthy_count(&self, pool: &OriginPool) -> usize {
        self.origin_ids
            .iter()
            .filter(|id| pool.get(id).is_some_and(|o| o.is_healthy()))
            .count()
    }
}

fn eligible(pool: &OriginPool, id: &str, exclude: &[String]) -> Option<Arc<OriginServer>> {
    if exclude.iter().any(|e| e == id) {
        return None;
    }
    pool.get(id).filter(|o| o.is_healthy())
}
