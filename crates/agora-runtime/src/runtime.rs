//! Runtime glue
//!
//! Single entry point: builds the shared registry and in-process worker,
//! spawns agents, and stops them all on shutdown.

use std::sync::Arc;

use agora_core::config::AgoraConfig;
use agora_core::error::Result;
use agora_core::{AgentId, CloudEvent, Event};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::agent::Agent;
use crate::handler::HandlerTable;
use crate::local::LocalWorker;
use crate::registry::EventRegistry;
use crate::worker::AgentWorker;

/// Builder for creating a runtime
#[derive(Debug, Default)]
pub struct AgentRuntimeBuilder {
    config: AgoraConfig,
}

impl AgentRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: AgoraConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime
    pub fn build(self) -> Result<AgentRuntime> {
        self.config.validate()?;
        Ok(AgentRuntime {
            config: self.config,
            worker: Arc::new(LocalWorker::new()),
            registry: Arc::new(EventRegistry::new()),
            agents: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
trait Spawned: Send + Sync {
    fn id(&self) -> &AgentId;
    async fn stop(&self) -> Result<()>;
}

#[async_trait]
impl<A: Send + Sync + 'static> Spawned for Agent<A> {
    fn id(&self) -> &AgentId {
        Agent::id(self)
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown().await
    }
}

/// The main Agora runtime
///
/// Owns every agent it spawns until `shutdown`.
pub struct AgentRuntime {
    config: AgoraConfig,
    worker: Arc<LocalWorker>,
    registry: Arc<EventRegistry>,
    agents: Mutex<Vec<Box<dyn Spawned>>>,
}

impl AgentRuntime {
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new()
    }

    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    pub fn worker(&self) -> &Arc<LocalWorker> {
        &self.worker
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Make the wire type-name of `E` resolvable
    pub fn register_event<E: Event>(&self) {
        self.registry.register_event::<E>();
    }

    /// Construct, register and activate an agent
    #[instrument(skip(self, key, behavior, table), fields(agent_type = %table.agent_type()))]
    pub async fn spawn<A: Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        behavior: A,
        table: Arc<HandlerTable<A>>,
    ) -> Result<Agent<A>> {
        let worker: Arc<dyn AgentWorker> = self.worker.clone();
        let agent = Agent::new(
            key,
            behavior,
            table,
            self.registry.clone(),
            worker,
            &self.config,
        )?;
        self.worker.register(agent.inbox())?;

        if let Err(e) = agent.activate().await {
            warn!(agent_id = %agent.id(), error = %e, "Activation failed");
            self.worker.unregister(agent.id());
            agent.shutdown().await?;
            return Err(e);
        }

        self.agents.lock().push(Box::new(agent.clone()));
        Ok(agent)
    }

    /// Publish an event from outside any agent
    pub async fn publish_event(&self, event: CloudEvent) -> Result<()> {
        self.worker
            .publish_event(event, &CancellationToken::new())
            .await
    }

    /// Ids of agents spawned and not yet stopped
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.lock().iter().map(|a| a.id().clone()).collect()
    }

    /// Stop every spawned agent
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let agents: Vec<_> = std::mem::take(&mut *self.agents.lock());
        info!(count = agents.len(), "Stopping Agora runtime");

        for agent in agents {
            agent.stop().await?;
            self.worker.unregister(agent.id());
        }
        Ok(())
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("config", &self.config)
            .field("worker", &self.worker)
            .field("agents", &self.agents.lock().len())
            .finish()
    }
}
