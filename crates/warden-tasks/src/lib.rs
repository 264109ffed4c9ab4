//! Warden Tasks - the scheduler-facing tool surface.
//!
//! Agents act on the world through tools; this crate implements the
//! scheduling and inter-agent tools:
//!
//! - `spawn_task`: queue a subtask under the current task
//! - `delegate_task`: synchronous delegation with polling, timeout
//!   clamping, and abort-on-cancel
//! - `delegate_task_async`: fire-and-collect delegation with hop
//!   limits; results are injected into the parent's next turn by the
//!   [`DelegationCollector`]
//! - `send_message` / `read_messages`: durable inter-agent messaging
//!   with mark-on-read
//! - `send_alert`: operator alerts on the event bus
//!
//! Every tool execution goes through the [`ToolExecutor`]: capability
//! check (audited by the policy engine), tool-call dedup for
//! side-effecting tools with a task context, execution, and dedup
//! registration on success.
//!
//! [`TaskWorker`] is the claim-and-run loop that drains an agent's
//! queue through a [`TaskRunner`] (the brain seam), finishing any
//! delegation backed by the task it ran.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod collector;
mod delegate;
mod error;
mod executor;
mod messaging;
mod spawn;
mod worker;

pub use collector::{CollectedMessage, DelegationCollector};
pub use delegate::{DelegateTaskAsyncTool, DelegateTaskTool, DelegationOutcome, DEFAULT_MAX_HOPS};
pub use error::{ToolError, ToolResult};
pub use executor::{dedup_key, request_hash, ToolExecutor, ToolHandler};
pub use messaging::{ReadMessagesTool, SendAlertTool, SendMessageTool};
pub use spawn::SpawnTaskTool;
pub use worker::{TaskRunner, TaskWorker};
