//! Gateway orchestrator — lifecycle and administrative operations
//!
//! Ties together the origin pool, health monitor, router table, auth gate
//! and HTTP entrypoint into a single manageable unit:
//! construct, start, serve, shutdown, join.

use crate::auth::{AuthGate, Authenticator};
use crate::config::{self, EndpointConfig, GatewayConfig, OriginConfig};
use crate::entrypoint::{self, RequestSettings, SharedState};
use crate::error::{GatewayError, Result};
use crate::observability::{AccessLog, GatewayMetrics};
use crate::proxy::HttpProxy;
use crate::router::RouterTable;
use crate::service::{HealthMonitor, OriginPool};
use crate::{GatewayState, HealthStatus};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The main Gateway, coordinating all components
pub struct Gateway {
    /// Current configuration, kept in sync with admin operations
    config: RwLock<GatewayConfig>,
    /// Gateway runtime state
    state: RwLock<GatewayState>,
    start_time: Instant,
    /// Root of every task's cancellation
    cancel: CancellationToken,
    shared: Arc<SharedState>,
    monitor: HealthMonitor,
    local_addr: RwLock<Option<SocketAddr>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Serializes admin operations so validation and apply are atomic
    admin: tokio::sync::Mutex<()>,
}

impl Gateway {
    /// Create a gateway without an authenticator.
    ///
    /// Requests matching authenticated routes then fail with 500.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a gateway whose authenticated routes use `authenticator`
    pub fn with_authenticator(
        config: GatewayConfig,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        Self::build(config, Some(authenticator))
    }

    fn build(config: GatewayConfig, authenticator: Option<Arc<dyn Authenticator>>) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(OriginPool::from_config(&config.origins)?);
        let router = RouterTable::from_config(&config.endpoints)?;
        let metrics = Arc::new(GatewayMetrics::new());
        let cancel = CancellationToken::new();

        let shared = Arc::new(SharedState {
            pool,
            router: RwLock::new(Arc::new(router)),
            auth: AuthGate::new(authenticator),
            proxy: HttpProxy::new(&config.proxy, metrics.clone()),
            settings: RequestSettings::from_config(&config)?,
            metrics,
            access_log: AccessLog::new(),
        });

        Ok(Self {
            monitor: HealthMonitor::new(cancel.child_token()),
            cancel,
            shared,
            config: RwLock::new(config),
            state: RwLock::new(GatewayState::Created),
            start_time: Instant::now(),
            local_addr: RwLock::new(None),
            listener: Mutex::new(None),
            admin: tokio::sync::Mutex::new(()),
        })
    }

    /// Start the gateway: bind the listener, start health probers and begin
    /// accepting connections
    pub async fn start(&self) -> Result<()> {
        // Admin operations wait until the state is Running so origins added
        // meanwhile are watched
        let _admin = self.admin.lock().await;
        if self.state() != GatewayState::Created {
            return Err(GatewayError::Other(format!(
                "Gateway cannot start from state '{}'",
                self.state()
            )));
        }
        self.set_state(GatewayState::Starting);

        let listen = self.config().listen;
        let listener = match entrypoint::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                self.set_state(GatewayState::Stopped);
                return Err(e);
            }
        };
        let addr = listener.local_addr()?;
        *self.local_addr.write().unwrap_or_else(PoisonError::into_inner) = Some(addr);

        for origin in self.shared.pool.all() {
            self.monitor.watch(origin);
        }
        tracing::info!(
            origins = self.shared.pool.len(),
            endpoints = self.shared.router().len(),
            routes = self.shared.router().route_count(),
            "Routing configured"
        );

        let handle = entrypoint::serve(listener, self.shared.clone(), self.cancel.child_token());
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        self.set_state(GatewayState::Running);
        tracing::info!(address = %addr, "Gateway is running");
        Ok(())
    }

    /// Stop accepting connections, stop every prober and wait for the
    /// listener to exit (bounded by `shutdown_timeout_secs`)
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, GatewayState::Stopping | GatewayState::Stopped) {
                return;
            }
            *state = GatewayState::Stopping;
        }
        tracing::info!("Gateway shutting down");

        self.cancel.cancel();
        self.monitor.shutdown().await;

        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let timeout = Duration::from_secs(self.config().shutdown_timeout_secs);
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Listener task failed"),
                Err(_) => tracing::warn!("Listener did not stop within the shutdown timeout"),
            }
        }

        self.set_state(GatewayState::Stopped);
        tracing::info!("Gateway stopped");
    }

    /// Wait for a shutdown signal (Ctrl+C), then shut down
    pub async fn wait_for_shutdown(&self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        self.shutdown().await;
    }

    /// Add a new origin and start probing it
    pub async fn add_origin(&self, origin: OriginConfig) -> Result<()> {
        let _admin = self.admin.lock().await;
        let server = self.shared.pool.insert(origin.clone())?;
        if self.is_running() {
            self.monitor.watch(server);
        }
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .origins
            .push(origin.clone());
        tracing::info!(origin = origin.id, "Origin added");
        Ok(())
    }

    /// Replace an origin's settings. The origin restarts unhealthy and its
    /// prober restarts; requests already in flight finish on the old record.
    pub async fn update_origin(&self, origin: OriginConfig) -> Result<()> {
        let _admin = self.admin.lock().await;
        let (_old, new) = self.shared.pool.replace(origin.clone())?;
        if self.is_running() {
            self.monitor.watch(new);
        }
        {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = config.origins.iter_mut().find(|o| o.id == origin.id) {
                *slot = origin.clone();
            }
        }
        tracing::info!(origin = origin.id, "Origin updated");
        Ok(())
    }

    /// Remove an origin. It becomes ineligible immediately, its prober stops
    /// and in-flight requests on it fail over or terminate.
    pub async fn remove_origin(&self, id: &str) -> Result<()> {
        let _admin = self.admin.lock().await;
        if self.shared.pool.remove(id).is_none() {
            return Err(GatewayError::Config(format!("Origin '{}' does not exist", id)));
        }
        self.monitor.unwatch(id);

        let referenced_by: Vec<String> = self
            .shared
            .router()
            .endpoints()
            .iter()
            .filter(|e| e.config.origins.iter().any(|o| o == id))
            .map(|e| e.id().to_string())
            .collect();
        if !referenced_by.is_empty() {
            tracing::warn!(
                origin = id,
                endpoints = ?referenced_by,
                "Removed origin is still referenced by endpoints"
            );
        }

        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .origins
            .retain(|o| o.id != id);
        tracing::info!(origin = id, "Origin removed");
        Ok(())
    }

    /// Validate and atomically install a new endpoint set
    pub async fn replace_endpoints(&self, endpoints: Vec<EndpointConfig>) -> Result<()> {
        let _admin = self.admin.lock().await;
        let pool = &self.shared.pool;
        let table = config::validate_endpoints(&endpoints, |id| pool.contains(id))?;
        let (count, routes) = (table.len(), table.route_count());
        self.shared.swap_router(table);
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .endpoints = endpoints;
        tracing::info!(endpoints = count, routes, "Endpoints replaced");
        Ok(())
    }

    /// Get the current gateway state
    pub fn state(&self) -> GatewayState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a health status snapshot
    pub fn health(&self) -> HealthStatus {
        let metrics = self.shared.metrics.snapshot();
        HealthStatus {
            state: self.state(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_requests: metrics.active_requests.max(0) as usize,
            total_requests: metrics.total_requests,
            healthy_origins: self.shared.pool.healthy_count(),
            origins: self.shared.pool.statuses(),
            endpoints: self.shared.router().len(),
            metrics,
        }
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the metrics collector
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.shared.metrics
    }

    /// Get the current configuration
    pub fn config(&self) -> GatewayConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if the gateway is running
    pub fn is_running(&self) -> bool {
        self.state() == GatewayState::Running
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_state(&self, new_state: GatewayState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }
}
