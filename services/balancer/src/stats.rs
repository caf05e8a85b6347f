//! Per-service and per-backend byte counters.
//!
//! Counters are plain atomics shared between the connection shuttles
//! (writers) and the control plane (readers). `bytes_total` is computed
//! at snapshot time as `bytes_in + bytes_out`, so the accounting
//! invariant holds by construction. Counters are monotonically
//! non-decreasing for the lifetime of their key and reset to zero when
//! the owning backend or service is removed and re-added.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// Byte counters for one stats key.
#[derive(Debug, Default)]
pub struct ByteCounters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl ByteCounters {
    /// Count bytes flowing upstream→downstream.
    pub fn add_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    /// Count bytes flowing downstream→upstream.
    pub fn add_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time view of the counters.
    pub fn snapshot(&self) -> ByteSnapshot {
        let bytes_in = self.bytes_in.load(Ordering::Relaxed);
        let bytes_out = self.bytes_out.load(Ordering::Relaxed);
        ByteSnapshot {
            bytes_in,
            bytes_out,
            bytes_total: bytes_in + bytes_out,
        }
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ByteSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub bytes_total: u64,
}

/// Backend stats key: `(service_name, backend address)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendKey {
    pub service: String,
    pub addr: SocketAddr,
}

impl std::fmt::Display for BackendKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.addr)
    }
}

/// Registry of byte counters, read-heavy, shared across the data plane
/// and the control plane.
pub struct StatsRegistry {
    services: RwLock<HashMap<String, Arc<ByteCounters>>>,
    backends: RwLock<HashMap<BackendKey, Arc<ByteCounters>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Counters for a service, created zeroed on first use.
    pub async fn ensure_service(&self, service: &str) -> Arc<ByteCounters> {
        {
            let services = self.services.read().await;
            if let Some(counters) = services.get(service) {
                return Arc::clone(counters);
            }
        }

        let mut services = self.services.write().await;
        Arc::clone(
            services
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(ByteCounters::default())),
        )
    }

    /// Counters for a backend, created zeroed on first use.
    pub async fn ensure_backend(&self, service: &str, addr: SocketAddr) -> Arc<ByteCounters> {
        let key = BackendKey {
            service: service.to_string(),
            addr,
        };

        {
            let backends = self.backends.read().await;
            if let Some(counters) = backends.get(&key) {
                return Arc::clone(counters);
            }
        }

        let mut backends = self.backends.write().await;
        Arc::clone(
            backends
                .entry(key)
                .or_insert_with(|| Arc::new(ByteCounters::default())),
        )
    }

    /// Drop a service's counters and all of its backend counters.
    pub async fn remove_service(&self, service: &str) {
        self.services.write().await.remove(service);
        self.backends
            .write()
            .await
            .retain(|key, _| key.service != service);
    }

    /// Drop one backend's counters.
    pub async fn remove_backend(&self, service: &str, addr: SocketAddr) {
        self.backends.write().await.remove(&BackendKey {
            service: service.to_string(),
            addr,
        });
    }

    /// Reset a backend's counters after an identity change: the old key
    /// is deleted and the new key starts from zero.
    pub async fn reset_backend(&self, service: &str, old_addr: SocketAddr, new_addr: SocketAddr) {
        let mut backends = self.backends.write().await;
        backends.remove(&BackendKey {
            service: service.to_string(),
            addr: old_addr,
        });
        backends.insert(
            BackendKey {
                service: service.to_string(),
                addr: new_addr,
            },
            Arc::new(ByteCounters::default()),
        );
    }

    /// Migrate all of a service's keys to a new name, counters intact.
    pub async fn rename_service(&self, old: &str, new: &str) {
        let mut services = self.services.write().await;
        if let Some(counters) = services.remove(old) {
            services.insert(new.to_string(), counters);
        }
        drop(services);

        let mut backends = self.backends.write().await;
        let moved: Vec<(BackendKey, Arc<ByteCounters>)> = backends
            .iter()
            .filter(|(key, _)| key.service == old)
            .map(|(key, counters)| (key.clone(), Arc::clone(counters)))
            .collect();
        for (key, counters) in moved {
            backends.remove(&key);
            backends.insert(
                BackendKey {
                    service: new.to_string(),
                    addr: key.addr,
                },
                counters,
            );
        }
    }

    /// Snapshot of all service-level counters.
    pub async fn service_snapshot(&self) -> HashMap<String, ByteSnapshot> {
        self.services
            .read()
            .await
            .iter()
            .map(|(name, counters)| (name.clone(), counters.snapshot()))
            .collect()
    }

    /// Snapshot of all backend-level counters, keyed `"service:ip:port"`.
    pub async fn backend_snapshot(&self) -> HashMap<String, ByteSnapshot> {
        self.backends
            .read()
            .await
            .iter()
            .map(|(key, counters)| (key.to_string(), counters.snapshot()))
            .collect()
    }

    /// Counters for one backend, if present.
    pub async fn backend_counters(
        &self,
        service: &str,
        addr: SocketAddr,
    ) -> Option<Arc<ByteCounters>> {
        self.backends
            .read()
            .await
            .get(&BackendKey {
                service: service.to_string(),
                addr,
            })
            .map(Arc::clone)
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
