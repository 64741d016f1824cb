//! Event and agent-type registry
//!
//! Shared catalog mapping wire type-names to their nominal topics, and
//! agent types to the capability set declared by their handler table.
//! Agent types are recorded once; the first table registered wins.

use std::collections::{BTreeSet, HashMap};

use agora_core::Event;
use parking_lot::RwLock;
use tracing::debug;

use crate::handler::{EventInfo, HandlerTable};

/// Capability set of one agent type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentTypeInfo {
    pub events: BTreeSet<String>,
    pub methods: BTreeSet<String>,
    pub topics: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    events: HashMap<String, EventInfo>,
    agent_types: HashMap<String, AgentTypeInfo>,
}

/// Registry of known event types and agent types
#[derive(Debug, Default)]
pub struct EventRegistry {
    inner: RwLock<RegistryInner>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the wire type-name of `E` resolvable
    pub fn register_event<E: Event>(&self) {
        self.insert_event(EventInfo::of::<E>());
    }

    fn insert_event(&self, info: EventInfo) {
        self.inner
            .write()
            .events
            .entry(info.type_name.to_string())
            .or_insert(info);
    }

    /// Record the capability set of `table`'s agent type
    ///
    /// Returns false if the agent type was already registered. Event types
    /// handled by the table become resolvable.
    pub fn register_agent_type<A>(&self, table: &HandlerTable<A>) -> bool {
        let mut inner = self.inner.write();
        if inner.agent_types.contains_key(table.agent_type()) {
            return false;
        }

        let mut info = AgentTypeInfo {
            topics: table.topics().clone(),
            methods: table.methods().map(str::to_string).collect(),
            ..Default::default()
        };
        for event in table.events() {
            info.events.insert(event.type_name.to_string());
            inner
                .events
                .entry(event.type_name.to_string())
                .or_insert(event);
        }

        debug!(
            agent_type = %table.agent_type(),
            events = info.events.len(),
            methods = info.methods.len(),
            topics = info.topics.len(),
            "Registered agent type"
        );
        inner
            .agent_types
            .insert(table.agent_type().to_string(), info);
        true
    }

    /// Look up a wire type-name
    pub fn resolve(&self, type_name: &str) -> Option<EventInfo> {
        self.inner.read().events.get(type_name).copied()
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.inner.read().events.contains_key(type_name)
    }

    /// Check whether `agent_type` declared a handler for `type_name`
    pub fn handles(&self, agent_type: &str, type_name: &str) -> bool {
        self.inner
            .read()
            .agent_types
            .get(agent_type)
            .map(|info| info.events.contains(type_name))
            .unwrap_or(false)
    }

    /// Table-derived topics of `agent_type` (empty when unknown)
    pub fn topics_for(&self, agent_type: &str) -> BTreeSet<String> {
        self.inner
            .read()
            .agent_types
            .get(agent_type)
            .map(|info| info.topics.clone())
            .unwrap_or_default()
    }

    /// Full capability set of `agent_type`
    pub fn agent_type(&self, agent_type: &str) -> Option<AgentTypeInfo> {
        self.inner.read().agent_types.get(agent_type).cloned()
    }
}
