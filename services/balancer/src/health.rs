//! Health prober.
//!
//! One periodic loop probes every backend of every service each tick:
//! - tcp / smpp: a raw TCP connect within the probe timeout
//! - http: GET `http://ip:port{http_path}`, UP iff the status is 200
//!
//! Probes for a tick run concurrently up to a configurable cap so a
//! large fleet cannot exhaust file descriptors, and every probe is
//! hard-bounded by the timeout. A failing probe marks its backend DOWN
//! and never affects the other probes or the loop itself.
//!
//! After each tick the prober publishes an immutable status snapshot
//! through an [`ArcSwap`] (readers never block) and drives the
//! forwarder's reconcile pass with the per-service UP lists.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::proxy::Forwarder;
use crate::store::{BackendConfig, CheckType, ConfigStore, ServiceConfig};

/// Interval between health ticks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Per-probe connect/request timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Concurrent probe cap per tick.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 64;

/// Prober tunables.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Interval between ticks.
    pub interval: Duration,
    /// Hard bound for each probe.
    pub timeout: Duration,
    /// Maximum probes in flight at once.
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CHECK_INTERVAL,
            timeout: DEFAULT_PROBE_TIMEOUT,
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }
}

/// Probed state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendHealth {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl std::fmt::Display for BackendHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendHealth::Up => write!(f, "UP"),
            BackendHealth::Down => write!(f, "DOWN"),
        }
    }
}

/// Status snapshot: `service → "ip:port (check_type)" → UP|DOWN`.
pub type StatusMap = HashMap<String, BTreeMap<String, BackendHealth>>;

/// Result of one probe tick.
pub struct ProbeTick {
    /// The configuration snapshot the tick probed.
    pub services: Vec<ServiceConfig>,
    /// Published status view.
    pub status: StatusMap,
    /// Per-service UP backends, preserving configured order.
    pub healthy: HashMap<String, Vec<BackendConfig>>,
}

/// The health prober.
pub struct HealthProber {
    store: Arc<ConfigStore>,
    status: ArcSwap<StatusMap>,
    http: reqwest::Client,
    config: ProbeConfig,
}

impl HealthProber {
    pub fn new(store: Arc<ConfigStore>, config: ProbeConfig) -> anyhow::Result<Self> {
        // Probes must reach the backend directly, never via a proxy.
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .no_proxy()
            .build()?;

        Ok(Self {
            store,
            status: ArcSwap::from_pointee(StatusMap::new()),
            http,
            config,
        })
    }

    /// Latest published status snapshot.
    pub fn status(&self) -> Arc<StatusMap> {
        self.status.load_full()
    }

    /// Probe every backend of every service once and publish the result.
    pub async fn tick(&self) -> ProbeTick {
        let services = self.store.list_services().await;

        // Flatten to (service index, backend index) pairs so results can
        // be reassembled in configured order after the concurrent sweep.
        let probes: Vec<(usize, usize)> = services
            .iter()
            .enumerate()
            .flat_map(|(si, service)| (0..service.servers.len()).map(move |bi| (si, bi)))
            .collect();

        let results: Vec<((usize, usize), BackendHealth)> = stream::iter(probes)
            .map(|(si, bi)| {
                let backend = &services[si].servers[bi];
                async move { ((si, bi), self.probe_backend(backend).await) }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut by_backend: HashMap<(usize, usize), BackendHealth> = results.into_iter().collect();

        let mut status = StatusMap::new();
        let mut healthy: HashMap<String, Vec<BackendConfig>> = HashMap::new();

        for (si, service) in services.iter().enumerate() {
            let entry = status.entry(service.name.clone()).or_default();
            let up_list = healthy.entry(service.name.clone()).or_default();

            for (bi, backend) in service.servers.iter().enumerate() {
                let health = by_backend
                    .remove(&(si, bi))
                    .unwrap_or(BackendHealth::Down);
                entry.insert(backend.status_key(), health);
                if health == BackendHealth::Up {
                    up_list.push(backend.clone());
                }
            }
        }

        self.status.store(Arc::new(status.clone()));

        ProbeTick {
            services,
            status,
            healthy,
        }
    }

    /// Run the prober until shutdown is signaled, driving the forwarder
    /// reconcile pass after every tick.
    pub async fn run(&self, forwarder: Arc<Forwarder>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Starting health prober"
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let tick = self.tick().await;
                    forwarder.reconcile_all(&tick.services, &tick.healthy).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health prober shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Probe one backend according to its check type.
    async fn probe_backend(&self, backend: &BackendConfig) -> BackendHealth {
        let health = match backend.check_type {
            CheckType::Tcp | CheckType::Smpp => self.tcp_probe(backend).await,
            CheckType::Http => self.http_probe(backend).await,
        };

        debug!(
            backend = %backend.addr(),
            check_type = %backend.check_type,
            health = %health,
            "Probe finished"
        );

        health
    }

    async fn tcp_probe(&self, backend: &BackendConfig) -> BackendHealth {
        match timeout(self.config.timeout, TcpStream::connect(backend.addr())).await {
            Ok(Ok(_)) => BackendHealth::Up,
            Ok(Err(e)) => {
                debug!(backend = %backend.addr(), error = %e, "TCP probe failed");
                BackendHealth::Down
            }
            Err(_) => {
                debug!(backend = %backend.addr(), "TCP probe timed out");
                BackendHealth::Down
            }
        }
    }

    async fn http_probe(&self, backend: &BackendConfig) -> BackendHealth {
        let path = if backend.http_path.starts_with('/') {
            backend.http_path.clone()
        } else {
            format!("/{}", backend.http_path)
        };
        let url = format!("http://{}{}", backend.addr(), path);

        match self.http.get(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => BackendHealth::Up,
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "HTTP probe non-200");
                BackendHealth::Down
            }
            Err(e) => {
                warn!(url = %url, error = %e, "HTTP probe failed");
                BackendHealth::Down
            }
        }
    }
}
