//! In-process worker
//!
//! Implements the worker contract for agents living in one process:
//! topic fan-out, request/response routing and an in-memory state store.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use agora_core::error::{Error, Result};
use agora_core::{
    AgentId, AgentState, CloudEvent, ControlMessage, Envelope, RpcRequest, RpcResponse,
    Subscription,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::worker::{AgentInbox, AgentWorker};

/// Worker routing envelopes between agents of the same process
///
/// Agents are held weakly; a dropped agent simply stops receiving.
#[derive(Default)]
pub struct LocalWorker {
    agents: RwLock<HashMap<AgentId, Weak<dyn AgentInbox>>>,
    /// Authoritative subscription table
    subscriptions: RwLock<BTreeSet<Subscription>>,
    /// "{type}:{key}" -> agent, for every agent ever registered
    direct_topics: RwLock<HashMap<String, AgentId>>,
    /// request id -> requester, until the response is routed
    routes: Mutex<HashMap<Uuid, AgentId>>,
    states: RwLock<HashMap<AgentId, AgentState>>,
}

impl LocalWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an agent reachable
    ///
    /// Fails if a live agent already uses the same id.
    pub fn register(&self, inbox: Weak<dyn AgentInbox>) -> Result<()> {
        let agent = inbox
            .upgrade()
            .ok_or_else(|| Error::internal("cannot register a dropped agent"))?;
        let id = agent.agent_id().clone();

        let mut agents = self.agents.write();
        if let Some(existing) = agents.get(&id) {
            if existing.strong_count() > 0 {
                return Err(Error::InvalidAgentId {
                    id: id.to_string(),
                    reason: "an agent with this id is already registered".into(),
                });
            }
        }
        agents.insert(id.clone(), inbox);
        self.direct_topics
            .write()
            .insert(id.direct_topic(), id.clone());

        info!(agent_id = %id, "Agent registered");
        Ok(())
    }

    /// Remove an agent
    pub fn unregister(&self, agent_id: &AgentId) -> bool {
        self.agents.write().remove(agent_id).is_some()
    }

    /// Snapshot of the subscription table
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.read().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, agent_type: &str, topic: &str) -> bool {
        self.subscriptions
            .read()
            .contains(&Subscription::new(agent_type, topic))
    }

    /// Number of routed requests still waiting for a response
    pub fn routes_in_flight(&self) -> usize {
        self.routes.lock().len()
    }

    fn lookup(&self, agent_id: &AgentId) -> Option<Arc<dyn AgentInbox>> {
        self.agents.read().get(agent_id).and_then(Weak::upgrade)
    }

    /// Agents that should receive an event published to `topic`
    ///
    /// A direct topic reaches only its agent, even after that agent is
    /// gone. Any other topic reaches every live agent of a subscribed type.
    fn recipients(&self, topic: &str) -> Vec<Arc<dyn AgentInbox>> {
        let types: BTreeSet<String> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.topic_type == topic)
            .map(|s| s.agent_type.clone())
            .collect();
        if types.is_empty() {
            return Vec::new();
        }

        let direct = self.direct_topics.read().get(topic).cloned();
        if let Some(agent_id) = direct {
            if !types.contains(agent_id.agent_type()) {
                return Vec::new();
            }
            return self.lookup(&agent_id).into_iter().collect();
        }

        self.agents
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|agent| types.contains(agent.agent_id().agent_type()))
            .collect()
    }
}

#[async_trait]
impl AgentWorker for LocalWorker {
    async fn send_message(&self, message: ControlMessage) -> Result<()> {
        match message {
            ControlMessage::AddSubscription(request) => {
                let added = self
                    .subscriptions
                    .write()
                    .insert(request.subscription.clone());
                debug!(
                    request_id = %request.request_id,
                    agent_type = %request.subscription.agent_type,
                    topic = %request.subscription.topic_type,
                    added,
                    "Add subscription"
                );
            }
        }
        Ok(())
    }

    #[instrument(skip(self, request, cancel), fields(from = %from, target = %request.target, request_id = %request.request_id), level = "debug")]
    async fn send_request(
        &self,
        from: &AgentId,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("send_request"));
        }

        let target = self.lookup(&request.target).ok_or_else(|| {
            Error::transport_fault("send_request", format!("no agent {}", request.target))
        })?;

        let request_id = request.request_id;
        self.routes.lock().insert(request_id, from.clone());

        if let Err(e) = target.deliver(Envelope::Request(request)).await {
            self.routes.lock().remove(&request_id);
            return Err(Error::transport_fault("send_request", e.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, response, cancel), fields(request_id = %response.request_id), level = "debug")]
    async fn send_response(
        &self,
        response: RpcResponse,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("send_response"));
        }

        let requester = self
            .routes
            .lock()
            .remove(&response.request_id)
            .ok_or_else(|| {
                Error::transport_fault(
                    "send_response",
                    format!("no route for request id {}", response.request_id),
                )
            })?;

        let inbox = self.lookup(&requester).ok_or_else(|| {
            Error::transport_fault("send_response", format!("requester {} is gone", requester))
        })?;

        inbox
            .deliver(Envelope::Response(response))
            .await
            .map_err(|e| Error::transport_fault("send_response", e.to_string()))
    }

    #[instrument(skip(self, event, cancel), fields(event_type = %event.type_name), level = "debug")]
    async fn publish_event(&self, event: CloudEvent, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("publish_event"));
        }

        let topic = event
            .topic()
            .ok_or_else(|| Error::transport_fault("publish_event", "event has no topic attribute"))?
            .to_string();

        let recipients = self.recipients(&topic);
        if recipients.is_empty() {
            debug!(topic = %topic, "No subscribers");
            return Ok(());
        }

        let total = recipients.len();
        let mut refused = Vec::new();
        for agent in recipients {
            if let Err(e) = agent.deliver(Envelope::Event(event.clone())).await {
                warn!(agent_id = %agent.agent_id(), error = %e, "Event delivery refused");
                refused.push(agent.agent_id().to_string());
            }
        }

        if refused.is_empty() {
            Ok(())
        } else {
            Err(Error::transport_fault(
                "publish_event",
                format!(
                    "{} of {} deliveries on '{}' refused: {}",
                    refused.len(),
                    total,
                    topic,
                    refused.join(", ")
                ),
            ))
        }
    }

    async fn store_state(&self, state: AgentState, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("store_state"));
        }
        self.states.write().insert(state.agent_id.clone(), state);
        Ok(())
    }

    async fn read_state(
        &self,
        agent_id: &AgentId,
        cancel: &CancellationToken,
    ) -> Result<Option<AgentState>> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("read_state"));
        }
        Ok(self.states.read().get(agent_id).cloned())
    }
}

impl std::fmt::Debug for LocalWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWorker")
            .field("agents", &self.agents.read().len())
            .field("subscriptions", &self.subscriptions.read().len())
            .field("routes", &self.routes.lock().len())
            .finish()
    }
}
