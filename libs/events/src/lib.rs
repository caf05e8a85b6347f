//! # steer-events
//!
//! Routing event records and the broadcast bus that fans them out to
//! subscribers (the control plane's real-time channel, log sinks, tests).
//!
//! ## Design Principles
//!
//! - Events are immutable, timestamped text records of routing and health
//!   transitions
//! - Broadcasting is best-effort: a slow or dead subscriber never blocks
//!   the publisher or the other subscribers
//! - Delivery is FIFO per subscriber; no ordering is guaranteed across
//!   subscribers

mod bus;
mod event;

pub use bus::{EventBus, EventSubscriber, DEFAULT_BUS_CAPACITY};
pub use event::Event;
