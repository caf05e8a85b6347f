//! steer balancer
//!
//! TCP load balancer with a live control plane.
//!
//! This service:
//! - Probes every configured backend on a periodic tick (tcp/http/smpp)
//! - Selects one healthy backend per service (failover or round-robin)
//! - Forwards TCP connections to the selected backend with per-service
//!   and per-backend byte accounting
//! - Exposes an HTTP/WebSocket control plane for live configuration,
//!   status, stats, and routing events

pub mod api;
pub mod config;
pub mod health;
pub mod proxy;
pub mod state;
pub mod stats;
pub mod store;

pub use health::{BackendHealth, HealthProber, ProbeConfig, StatusMap};
pub use proxy::{Forwarder, ForwarderConfig};
pub use state::AppState;
pub use stats::StatsRegistry;
pub use store::{BackendConfig, CheckType, ConfigStore, Mode, ServiceConfig, StoreError};
