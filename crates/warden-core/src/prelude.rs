//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_core::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use warden_core::prelude::*;
//!
//! let ctx = CallContext::new(AgentId::from("coder"), SessionId::new());
//! assert_eq!(ctx.hop, 0);
//! assert!(is_known_capability("tools.exec"));
//! ```

// Identifiers
pub use crate::{AgentId, DelegationId, SessionId, TaskId};

// Ambient context
pub use crate::CallContext;

// Capability vocabulary
pub use crate::{is_known_capability, normalize_capability, CAPABILITY_VOCABULARY};

// Canonicalization
pub use crate::canonical_json;
