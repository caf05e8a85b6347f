//! TCP forwarding data path.
//!
//! `selector` picks a backend from the healthy list, `listener` owns a
//! bound port and shuttles bytes for accepted connections, and
//! `forwarder` reconciles the per-service listener lifecycle against
//! each health tick.

mod forwarder;
mod listener;
mod selector;

pub use forwarder::{Forwarder, ForwarderConfig, RuntimeSnapshot, DEFAULT_ROTATION_INTERVAL};
pub use listener::{ListenerHandle, DEFAULT_CONNECT_TIMEOUT};
pub use selector::select_backend;
