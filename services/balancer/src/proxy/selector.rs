//! Backend selection.

use crate::store::{BackendConfig, Mode};

/// Pick a backend from the currently UP list.
///
/// - failover: the first UP backend in configured order
/// - round-robin: `healthy[cursor % len]`; the caller advances the
///   cursor when it applies a rotation, and never resets it on health
///   flaps
///
/// Returns `None` when the healthy list is empty. Deterministic and
/// side-effect free.
pub fn select_backend(healthy: &[BackendConfig], mode: Mode, rr_cursor: u64) -> Option<&BackendConfig> {
    if healthy.is_empty() {
        return None;
    }

    match mode {
        Mode::Failover => healthy.first(),
        Mode::RoundRobin => healthy.get((rr_cursor % healthy.len() as u64) as usize),
    }
}
