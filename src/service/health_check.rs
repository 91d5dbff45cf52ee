//! Health monitor — one active prober task per origin

use super::origin_pool::{HealthTransition, OriginServer};
use crate::config::OriginConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Prober {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the prober tasks for all watched origins
pub struct HealthMonitor {
    client: reqwest::Client,
    /// Parent of every prober token; cancelled on shutdown
    root: CancellationToken,
    probers: Mutex<HashMap<String, Prober>>,
}

impl HealthMonitor {
    /// Create a monitor whose probers stop when `root` is cancelled
    pub fn new(root: CancellationToken) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1)
            .build()
            .unwrap_or_default();
        Self {
            client,
            root,
            probers: Mutex::new(HashMap::new()),
        }
    }

    /// Start probing an origin, replacing any prober already running for its id
    pub fn watch(&self, origin: Arc<OriginServer>) {
        let id = origin.id().to_string();
        let token = self.root.child_token();
        let handle = tokio::spawn(run_prober(self.client.clone(), origin, token.clone()));

        let previous = self
            .probers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Prober { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        tracing::info!(origin = id, "Started health prober");
    }

    /// Stop probing an origin. Returns false when it was not watched.
    pub fn unwatch(&self, id: &str) -> bool {
        let prober = self
            .probers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match prober {
            Some(prober) => {
                prober.token.cancel();
                tracing::info!(origin = id, "Stopped health prober");
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, id: &str) -> bool {
        self.probers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Number of registered probers
    pub fn len(&self) -> usize {
        self.probers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every prober and wait for the tasks to exit
    pub async fn shutdown(&self) {
        self.root.cancel();
        let probers: Vec<Prober> = self
            .probers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, p)| p)
            .collect();
        for prober in probers {
            prober.token.cancel();
            if let Err(e) = prober.handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Health prober task failed");
                }
            }
        }
    }
}

/// Probe loop for one origin: probe immediately, then once per interval
async fn run_prober(client: reqwest::Client, origin: Arc<OriginServer>, token: CancellationToken) {
    let interval = Duration::from_millis(origin.config().health_check_interval_ms);

    loop {
        let success = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            ok = probe(&client, origin.config()) => ok,
        };

        match origin.record_probe(success) {
            Some(HealthTransition::BecameHealthy) => {
                tracing::info!(origin = origin.id(), "Origin marked healthy");
            }
            Some(HealthTransition::BecameUnhealthy) => {
                tracing::warn!(origin = origin.id(), "Origin marked unhealthy");
            }
            None => {}
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(origin = origin.id(), "Health prober exited");
}

/// Issue one liveness probe; success means a 2xx response within the timeout
pub async fn probe(client: &reqwest::Client, config: &OriginConfig) -> bool {
    let url = config.health_check_url();
    let result = client
        .request(config.health_check_method.as_method(), &url)
        .timeout(Duration::from_millis(config.health_check_timeout_ms))
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            tracing::debug!(origin = config.id, status = resp.status().as_u16(), "Probe returned non-success status");
            false
        }
        Err(e) => {
            tracing::debug!(origin = config.id, error = %e, "Probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal origin answering every request with `status`, counting hits
    async fn spawn_origin(status: u16) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 2048];
                    let _ = stream.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status
                    );
                    let _ = stream.write_all(resp.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        (port, hits)
    }

    /// A port with nothing listening on it
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn origin_config(port: u16, interval_ms: u64) -> OriginConfig {
        let mut config = OriginConfig::new("o1", "127.0.0.1", port);
        config.health_check_interval_ms = interval_ms;
        config.health_check_timeout_ms = 500;
        config.unhealthy_threshold = 1;
        config.healthy_threshold = 1;
        config
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_probe_success_and_failure() {
        let client = reqwest::Client::new();
        let (ok_port, _) = spawn_origin(200).await;
        let (bad_port, _) = spawn_origin(503).await;
        let dead_port = closed_port().await;

        assert!(probe(&client, &origin_config(ok_port, 100)).await);
        assert!(!probe(&client, &origin_config(bad_port, 100)).await);
        assert!(!probe(&client, &origin_config(dead_port, 100)).await);
    }

    #[tokio::test]
    async fn test_monitor_marks_origin_healthy() {
        let (port, _) = spawn_origin(200).await;
        let origin = Arc::new(OriginServer::new(origin_config(port, 50)));
        let monitor = HealthMonitor::new(CancellationToken::new());

        assert!(!origin.is_healthy());
        monitor.watch(origin.clone());
        assert!(wait_until(|| origin.is_healthy()).await);
        assert!(monitor.is_watching("o1"));

        monitor.shutdown().await;
        assert!(monitor.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_marks_origin_unhealthy() {
        let port = closed_port().await;
        let origin = Arc::new(OriginServer::new(origin_config(port, 50)));
        origin.set_healthy(true);

        let monitor = HealthMonitor::new(CancellationToken::new());
        monitor.watch(origin.clone());
        assert!(wait_until(|| !origin.is_healthy()).await);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unwatch_stops_probes() {
        let (port, hits) = spawn_origin(200).await;
        let origin = Arc::new(OriginServer::new(origin_config(port, 50)));
        let monitor = HealthMonitor::new(CancellationToken::new());

        monitor.watch(origin.clone());
        assert!(wait_until(|| hits.load(Ordering::SeqCst) >= 2).await);

        assert!(monitor.unwatch("o1"));
        assert!(!monitor.unwatch("o1"));
        // Let any probe already on the wire land
        tokio::time::sleep(Duration::from_millis(60)).await;
        let after_stop = hits.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_root_cancel_stops_all() {
        let root = CancellationToken::new();
        let monitor = HealthMonitor::new(root.clone());
        let (port, _) = spawn_origin(200).await;
        monitor.watch(Arc::new(OriginServer::new(origin_config(port, 50))));

        root.cancel();
        assert!(wait_until(|| !monitor.is_watching("o1")).await);
    }
}
