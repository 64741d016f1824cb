//! Agora Runtime
//!
//! Actor core for Agora agents.
//!
//! # Overview
//!
//! The runtime provides:
//! - One bounded mailbox and one message pump per agent
//! - Typed handler tables for events and RPC methods
//! - Topic subscriptions (direct `type:key`, broadcast `type`, table topics)
//! - RPC correlation with cleanup on cancellation
//! - The worker transport contract and an in-process worker
//!
//! # Guarantees
//! - Strict FIFO processing per agent
//! - Single activation per agent
//! - Per-message failures never stop the pump
//!
//! A handler must not await an RPC answered by its own agent: the pump is
//! busy running that handler. Spawn such calls instead.

pub mod agent;
pub mod correlation;
pub mod handler;
pub mod local;
pub mod mailbox;
pub mod registry;
pub mod runtime;
pub mod worker;

pub use agent::{Agent, AgentContext, AgentStats, LifecycleState};
pub use correlation::{PendingRequests, PendingResponse};
pub use handler::{EventInfo, Handle, HandlerTable, Respond};
pub use local::LocalWorker;
pub use mailbox::{Mailbox, MailboxStats, PushError, PushOutcome};
pub use registry::{AgentTypeInfo, EventRegistry};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder};
pub use worker::{AgentInbox, AgentWorker, EnqueueOutcome};

pub use tokio_util::sync::CancellationToken;
