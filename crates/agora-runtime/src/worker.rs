//! Worker transport contract
//!
//! The worker moves envelopes between agents (possibly across processes)
//! and persists agent state snapshots. Every failure it reports surfaces
//! to the caller of the outbound operation; the runtime never retries.

use agora_core::error::Result;
use agora_core::{AgentId, AgentState, CloudEvent, ControlMessage, Envelope, RpcRequest, RpcResponse};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Transport collaborator used by agents for all outbound traffic
#[async_trait]
pub trait AgentWorker: Send + Sync + 'static {
    /// Send a control message (e.g. add-subscription)
    async fn send_message(&self, message: ControlMessage) -> Result<()>;

    /// Route `request` to its target; the response comes back to `from`
    async fn send_request(
        &self,
        from: &AgentId,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Route a response back to the agent that issued the request
    async fn send_response(&self, response: RpcResponse, cancel: &CancellationToken)
        -> Result<()>;

    /// Publish an event to the topic in its `topic` attribute
    async fn publish_event(&self, event: CloudEvent, cancel: &CancellationToken) -> Result<()>;

    /// Persist a state snapshot
    async fn store_state(&self, state: AgentState, cancel: &CancellationToken) -> Result<()>;

    /// Load the last stored snapshot, if any
    async fn read_state(
        &self,
        agent_id: &AgentId,
        cancel: &CancellationToken,
    ) -> Result<Option<AgentState>>;
}

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Accepted after evicting the oldest queued message
    EvictedOldest,
    /// Refused: the mailbox is full
    Full,
    /// Refused: the agent is shutting down
    Closed,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted | Self::EvictedOldest)
    }
}

/// Inbound side of an agent, as seen by a transport
#[async_trait]
pub trait AgentInbox: Send + Sync {
    fn agent_id(&self) -> &AgentId;

    /// Append without waiting; never fails
    fn enqueue(&self, envelope: Envelope) -> EnqueueOutcome;

    /// Append, waiting for space if the mailbox policy blocks
    async fn deliver(&self, envelope: Envelope) -> Result<()>;
}
