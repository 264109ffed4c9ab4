//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_events::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use warden_events::prelude::*;
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(WardenEvent::LoopStatusUpdate {
//!     status: "running".to_string(),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "loop.status_update");
//! # }
//! ```

// Event bus
pub use crate::{EventBus, EventReceiver, DEFAULT_CHANNEL_CAPACITY};

// Events
pub use crate::{AlertSeverity, WardenEvent};
