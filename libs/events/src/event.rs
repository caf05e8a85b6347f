//! Event record - a timestamped text message describing a transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single routing or health event.
///
/// The `message` is the operator-facing text pushed over the real-time
/// channel; `occurred_at` is recorded for logs and future consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// Human-readable event text.
    pub message: String,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            occurred_at: Utc::now(),
            message: message.into(),
        }
    }

    /// Event emitted when a service starts routing to a backend.
    pub fn routing(port: u16, backend: &str, service: &str, mode: &str) -> Self {
        Self::new(format!(
            "Routing traffic on port {} to {} for service '{}' (mode: {})",
            port, backend, service, mode
        ))
    }

    /// Event emitted when a service has no healthy backends left.
    pub fn no_healthy_servers(port: u16, service: &str) -> Self {
        Self::new(format!(
            "No healthy servers available on port {} for service '{}'",
            port, service
        ))
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
