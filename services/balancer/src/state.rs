//! Application state shared across request handlers.

use std::sync::Arc;

use steer_events::EventBus;

use crate::health::HealthProber;
use crate::proxy::Forwarder;
use crate::stats::StatsRegistry;
use crate::store::ConfigStore;

/// Shared application state.
///
/// Holds the owned subsystems; passed to all request handlers via
/// Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<ConfigStore>,
    stats: Arc<StatsRegistry>,
    forwarder: Arc<Forwarder>,
    prober: Arc<HealthProber>,
    events: EventBus,
}

impl AppState {
    pub fn new(
        store: Arc<ConfigStore>,
        stats: Arc<StatsRegistry>,
        forwarder: Arc<Forwarder>,
        prober: Arc<HealthProber>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                stats,
                forwarder,
                prober,
                events,
            }),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.inner.store
    }

    pub fn stats(&self) -> &StatsRegistry {
        &self.inner.stats
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.inner.forwarder
    }

    pub fn prober(&self) -> &HealthProber {
        &self.inner.prober
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}
