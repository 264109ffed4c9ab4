//! Warden Events - process-wide event bus.
//!
//! Components publish [`WardenEvent`]s (inter-agent messages, alerts,
//! loop status, skill reloads) onto a broadcast bus; interested parties
//! subscribe. Delivery is best-effort by design: publishing with no
//! subscribers is normal, and the absence of a bus is never fatal to
//! the publisher.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;

pub use bus::{EventBus, EventReceiver, DEFAULT_CHANNEL_CAPACITY};
pub use event::{AlertSeverity, WardenEvent};
