//! Forwarder reconciliation and listener lifecycle.
//!
//! Driven once per health tick, the forwarder converges each service's
//! runtime (listener, active backend, rotation state) to the current
//! configuration and healthy set:
//!
//! - no healthy backends → tear the listener down and emit an outage
//!   event
//! - failover → rotate whenever the selection changes or no listener is
//!   running
//! - round-robin → rotate when no listener is running or the rotation
//!   interval has elapsed; otherwise leave the tick alone
//!
//! Runtime fields are guarded by a per-service mutex so control-plane
//! mutations (port/mode edits, removal) observe a consistent
//! listener/active pair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use steer_events::{Event, EventBus};

use super::listener::{spawn_listener, ListenerHandle};
use super::selector::select_backend;
use crate::stats::StatsRegistry;
use crate::store::{BackendConfig, Mode, ServiceConfig};

/// Minimum time between round-robin rotations.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(60);

/// Forwarder tunables.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Minimum time between round-robin rotations.
    pub rotation_interval: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
        }
    }
}

/// Mutable per-service runtime, guarded by a per-service mutex.
#[derive(Default)]
struct ServiceRuntime {
    last_active: Option<std::net::SocketAddr>,
    rr_cursor: u64,
    listener: Option<ListenerHandle>,
    restart_count: u64,
    last_start: Option<Instant>,
    last_start_time: Option<DateTime<Utc>>,
}

/// Serializable view of a service's runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub restart_count: u64,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_active: Option<String>,
    pub listener_id: Option<u64>,
}

/// The forwarder: owns every service listener and its rotation state.
pub struct Forwarder {
    runtimes: Mutex<HashMap<String, Arc<Mutex<ServiceRuntime>>>>,
    stats: Arc<StatsRegistry>,
    events: EventBus,
    config: ForwarderConfig,
    next_listener_id: AtomicU64,
}

impl Forwarder {
    pub fn new(stats: Arc<StatsRegistry>, events: EventBus, config: ForwarderConfig) -> Self {
        Self {
            runtimes: Mutex::new(HashMap::new()),
            stats,
            events,
            config,
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Reconcile every service against the tick's healthy sets.
    ///
    /// Also sweeps runtime entries whose service no longer exists in the
    /// configuration.
    pub async fn reconcile_all(
        &self,
        services: &[ServiceConfig],
        healthy: &HashMap<String, Vec<BackendConfig>>,
    ) {
        let stale: Vec<Arc<Mutex<ServiceRuntime>>> = {
            let mut runtimes = self.runtimes.lock().await;
            let names: Vec<String> = runtimes
                .keys()
                .filter(|name| !services.iter().any(|s| &s.name == *name))
                .cloned()
                .collect();
            names
                .into_iter()
                .filter_map(|name| runtimes.remove(&name))
                .collect()
        };
        for runtime in stale {
            let mut runtime = runtime.lock().await;
            if let Some(listener) = runtime.listener.take() {
                listener.shutdown().await;
            }
        }

        for service in services {
            let empty = Vec::new();
            let healthy = healthy.get(&service.name).unwrap_or(&empty);
            self.reconcile_service(service, healthy).await;
        }
    }

    /// Reconcile one service against its healthy backend list.
    pub async fn reconcile_service(&self, service: &ServiceConfig, healthy: &[BackendConfig]) {
        let runtime = self.runtime(&service.name).await;
        let mut runtime = runtime.lock().await;

        if healthy.is_empty() {
            if runtime.listener.is_some() || runtime.last_active.is_some() {
                if let Some(listener) = runtime.listener.take() {
                    listener.shutdown().await;
                }
                runtime.last_active = None;
                warn!(
                    service = %service.name,
                    port = service.listen_port,
                    "No healthy backends, listener torn down"
                );
                self.events
                    .publish(Event::no_healthy_servers(service.listen_port, &service.name));
            }
            return;
        }

        let selected = match select_backend(healthy, service.mode, runtime.rr_cursor) {
            Some(backend) => backend.addr(),
            None => return,
        };

        // A listener bound to a stale port counts as not running.
        let listener_current = runtime
            .listener
            .as_ref()
            .is_some_and(|l| l.port() == service.listen_port);

        let rotate = match service.mode {
            Mode::Failover => !listener_current || runtime.last_active != Some(selected),
            Mode::RoundRobin => {
                !listener_current
                    || runtime
                        .last_start
                        .is_none_or(|t| t.elapsed() >= self.config.rotation_interval)
            }
        };

        if !rotate {
            return;
        }

        if let Some(listener) = runtime.listener.take() {
            listener.shutdown().await;
        }

        if service.mode == Mode::RoundRobin {
            runtime.rr_cursor = runtime.rr_cursor.wrapping_add(1);
        }

        let service_counters = self.stats.ensure_service(&service.name).await;
        let backend_counters = self.stats.ensure_backend(&service.name, selected).await;
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed) + 1;

        match spawn_listener(
            service.name.clone(),
            service.listen_port,
            selected,
            service_counters,
            backend_counters,
            id,
        )
        .await
        {
            Ok(handle) => {
                runtime.listener = Some(handle);
                runtime.restart_count += 1;
                runtime.last_start = Some(Instant::now());
                runtime.last_start_time = Some(Utc::now());
                runtime.last_active = Some(selected);

                info!(
                    service = %service.name,
                    port = service.listen_port,
                    backend = %selected,
                    mode = %service.mode,
                    restart_count = runtime.restart_count,
                    "Routing traffic"
                );
                self.events.publish(Event::routing(
                    service.listen_port,
                    &selected.to_string(),
                    &service.name,
                    &service.mode.to_string(),
                ));
            }
            Err(e) => {
                error!(
                    service = %service.name,
                    port = service.listen_port,
                    error = %e,
                    "Failed to bind listener"
                );
                runtime.last_active = None;
            }
        }
    }

    /// Stop a service's listener so the next tick rebinds with fresh
    /// configuration. Rotation counters survive.
    pub async fn invalidate(&self, service: &str) {
        let runtime = {
            let runtimes = self.runtimes.lock().await;
            runtimes.get(service).cloned()
        };

        if let Some(runtime) = runtime {
            let mut runtime = runtime.lock().await;
            if let Some(listener) = runtime.listener.take() {
                listener.shutdown().await;
            }
            runtime.last_active = None;
        }
    }

    /// Tear a removed service down completely.
    pub async fn teardown(&self, service: &str) {
        let runtime = self.runtimes.lock().await.remove(service);

        if let Some(runtime) = runtime {
            let mut runtime = runtime.lock().await;
            if let Some(listener) = runtime.listener.take() {
                listener.shutdown().await;
            }
            runtime.last_active = None;
        }
    }

    /// Follow a service rename, keeping its runtime intact.
    pub async fn rename(&self, old: &str, new: &str) {
        let mut runtimes = self.runtimes.lock().await;
        if let Some(runtime) = runtimes.remove(old) {
            runtimes.insert(new.to_string(), runtime);
        }
    }

    /// Snapshot of every service's runtime state.
    pub async fn runtime_snapshot(&self) -> HashMap<String, RuntimeSnapshot> {
        let runtimes: Vec<(String, Arc<Mutex<ServiceRuntime>>)> = self
            .runtimes
            .lock()
            .await
            .iter()
            .map(|(name, runtime)| (name.clone(), Arc::clone(runtime)))
            .collect();

        let mut snapshot = HashMap::new();
        for (name, runtime) in runtimes {
            let runtime = runtime.lock().await;
            snapshot.insert(
                name,
                RuntimeSnapshot {
                    restart_count: runtime.restart_count,
                    last_start_time: runtime.last_start_time,
                    last_active: runtime.last_active.map(|a| a.to_string()),
                    listener_id: runtime.listener.as_ref().map(|l| l.id),
                },
            );
        }
        snapshot
    }

    async fn runtime(&self, service: &str) -> Arc<Mutex<ServiceRuntime>> {
        let mut runtimes = self.runtimes.lock().await;
        Arc::clone(
            runtimes
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ServiceRuntime::default()))),
        )
    }
}
