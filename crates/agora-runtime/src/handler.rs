//! Typed handler tables
//!
//! An agent type declares, once, which events it handles and which RPC
//! methods it serves. Each registration stores a monomorphised function
//! pointer keyed by the wire name, so dispatch is a map lookup.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use agora_core::error::Result;
use agora_core::{CloudEvent, Event, Method, Payload};
use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::agent::AgentContext;

/// Handles events of type `E`
#[async_trait]
pub trait Handle<E: Event>: Send + Sync + 'static {
    async fn handle(&self, ctx: &AgentContext, event: E) -> Result<()>;
}

/// Serves RPC method `M`
#[async_trait]
pub trait Respond<M: Method>: Send + Sync + 'static {
    async fn respond(&self, ctx: &AgentContext, params: M::Params) -> Result<M::Output>;
}

pub(crate) type EventFn<A> =
    for<'a> fn(&'a A, &'a AgentContext, &'a CloudEvent) -> BoxFuture<'a, Result<()>>;

pub(crate) type MethodFn<A> =
    for<'a> fn(&'a A, &'a AgentContext, &'a Payload) -> BoxFuture<'a, Result<Payload>>;

fn dispatch_event<'a, A, E>(
    agent: &'a A,
    ctx: &'a AgentContext,
    event: &'a CloudEvent,
) -> BoxFuture<'a, Result<()>>
where
    A: Handle<E>,
    E: Event,
{
    Box::pin(async move {
        let decoded = event.decode::<E>()?;
        agent.handle(ctx, decoded).await
    })
}

fn dispatch_method<'a, A, M>(
    agent: &'a A,
    ctx: &'a AgentContext,
    params: &'a Payload,
) -> BoxFuture<'a, Result<Payload>>
where
    A: Respond<M>,
    M: Method,
{
    Box::pin(async move {
        let decoded: M::Params = params.decode_json()?;
        let output = agent.respond(ctx, decoded).await?;
        Payload::json(&output)
    })
}

/// Wire-level description of a handled event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventInfo {
    pub type_name: &'static str,
    pub topics: &'static [&'static str],
}

impl EventInfo {
    pub fn of<E: Event>() -> Self {
        Self {
            type_name: E::TYPE_NAME,
            topics: E::TOPICS,
        }
    }
}

struct EventEntry<A> {
    info: EventInfo,
    handler: EventFn<A>,
}

/// Fixed dispatch table for one agent type
///
/// ```rust,ignore
/// let table = HandlerTable::<Echo>::new("Echo")
///     .on_event::<Greeting>()
///     .on_method::<Ping>()
///     .subscribe("lobby");
/// ```
pub struct HandlerTable<A> {
    agent_type: String,
    events: HashMap<&'static str, EventEntry<A>>,
    methods: HashMap<&'static str, MethodFn<A>>,
    topics: BTreeSet<String>,
}

impl<A: Send + Sync + 'static> HandlerTable<A> {
    /// Start an empty table for `agent_type`
    pub fn new(agent_type: impl Into<String>) -> Self {
        let agent_type = agent_type.into();
        debug_assert!(!agent_type.is_empty(), "agent type must not be empty");

        Self {
            agent_type,
            events: HashMap::new(),
            methods: HashMap::new(),
            topics: BTreeSet::new(),
        }
    }

    /// Handle events of type `E`; `E::TOPICS` join the table's topic set
    pub fn on_event<E: Event>(mut self) -> Self
    where
        A: Handle<E>,
    {
        debug_assert!(
            !self.events.contains_key(E::TYPE_NAME),
            "event type registered twice"
        );
        self.topics
            .extend(E::TOPICS.iter().map(|topic| topic.to_string()));
        self.events.insert(
            E::TYPE_NAME,
            EventEntry {
                info: EventInfo::of::<E>(),
                handler: dispatch_event::<A, E>,
            },
        );
        self
    }

    /// Serve RPC method `M`
    pub fn on_method<M: Method>(mut self) -> Self
    where
        A: Respond<M>,
    {
        debug_assert!(
            !self.methods.contains_key(M::NAME),
            "method registered twice"
        );
        self.methods.insert(M::NAME, dispatch_method::<A, M>);
        self
    }

    /// Subscribe every agent of this type to `topic` on activation
    pub fn subscribe(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }
}

impl<A> HandlerTable<A> {
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Topics implied by the table (explicit subscriptions and event topics)
    pub fn topics(&self) -> &BTreeSet<String> {
        &self.topics
    }

    pub fn handles_event(&self, type_name: &str) -> bool {
        self.events.contains_key(type_name)
    }

    pub fn handles_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Event types the table handles
    pub fn events(&self) -> impl Iterator<Item = EventInfo> + '_ {
        self.events.values().map(|entry| entry.info)
    }

    /// Method names the table serves
    pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.keys().copied()
    }

    pub(crate) fn event_handler(&self, type_name: &str) -> Option<EventFn<A>> {
        self.events.get(type_name).map(|entry| entry.handler)
    }

    pub(crate) fn method_handler(&self, method: &str) -> Option<MethodFn<A>> {
        self.methods.get(method).copied()
    }
}

impl<A> fmt::Debug for HandlerTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self.events.keys().collect();
        events.sort();
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();

        f.debug_struct("HandlerTable")
            .field("agent_type", &self.agent_type)
            .field("events", &events)
            .field("methods", &methods)
            .field("topics", &self.topics)
            .finish()
    }
}
