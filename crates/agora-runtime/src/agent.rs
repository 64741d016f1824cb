//! Agent actor and message pump
//!
//! One agent = one mailbox drained by one pump task. The pump processes
//! envelopes strictly in arrival order and contains every per-message
//! failure; it ends only when the mailbox is closed.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use agora_core::config::AgoraConfig;
use agora_core::error::{Error, Result};
use agora_core::{
    validate_topic, AgentId, AgentState, CloudEvent, ControlMessage, Envelope, Event, Method,
    Payload, RpcRequest, RpcResponse, Subscription, TraceContext,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::correlation::PendingRequests;
use crate::handler::HandlerTable;
use crate::mailbox::{Mailbox, MailboxStats, PushOutcome};
use crate::registry::EventRegistry;
use crate::worker::{AgentInbox, AgentWorker, EnqueueOutcome};

// =============================================================================
// Lifecycle
// =============================================================================

/// Agent lifecycle state
///
/// ```text
///   Created --activate--> Running --shutdown--> Stopping --> Stopped
///      |                                                       ^
///      +--------------------------shutdown---------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Constructed; messages queue up but nothing is processed
    #[default]
    Created,
    /// Pump running
    Running,
    /// Mailbox closed, pump draining
    Stopping,
    /// Pump finished
    Stopped,
}

impl LifecycleState {
    /// Check if the agent processes messages in this state
    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running)
    }

    /// Check if valid transition
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        match (self, next) {
            (LifecycleState::Created, LifecycleState::Running) => true,
            (LifecycleState::Created, LifecycleState::Stopped) => true,
            (LifecycleState::Running, LifecycleState::Stopping) => true,
            (LifecycleState::Stopping, LifecycleState::Stopped) => true,
            _ if *self == next => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Statistics for an agent
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub state: LifecycleState,
    pub mailbox: MailboxStats,
    /// Envelopes dispatched by the pump
    pub processed: u64,
    /// Dispatches that failed (logged and skipped), including failed
    /// request handlers answered with an error response
    pub faulted: u64,
    /// Outstanding outbound RPCs
    pub pending_requests: usize,
}

// =============================================================================
// Shared core (identity and outbound plumbing)
// =============================================================================

struct AgentCore {
    id: AgentId,
    worker: Arc<dyn AgentWorker>,
    registry: Arc<EventRegistry>,
    pending: Arc<PendingRequests>,
    /// Topics this agent already registered through the worker
    subscribed: tokio::sync::Mutex<BTreeSet<String>>,
}

impl AgentCore {
    async fn subscribe(&self, topic: &str) -> Result<bool> {
        validate_topic(topic)?;

        let mut subscribed = self.subscribed.lock().await;
        if subscribed.contains(topic) {
            return Ok(false);
        }

        let subscription = Subscription::new(self.id.agent_type(), topic);
        self.worker
            .send_message(ControlMessage::add_subscription(subscription))
            .await?;
        subscribed.insert(topic.to_string());

        debug!(agent_id = %self.id, topic = %topic, "Subscribed");
        Ok(true)
    }
}

// =============================================================================
// AgentContext
// =============================================================================

/// Handle given to handlers for outbound operations
///
/// Carries the trace context of the message being handled; every outbound
/// publish or request made through it is a child of that context.
#[derive(Clone)]
pub struct AgentContext {
    core: Arc<AgentCore>,
    trace: TraceContext,
}

impl AgentContext {
    fn new(core: Arc<AgentCore>, trace: TraceContext) -> Self {
        let trace = if trace.is_empty() {
            TraceContext::new_root()
        } else {
            trace
        };
        Self { core, trace }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.core.id
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Shared event registry
    pub fn registry(&self) -> &EventRegistry {
        &self.core.registry
    }

    /// Publish a prepared event
    #[instrument(skip(self, event, cancel), fields(agent_id = %self.core.id, event_type = %event.type_name), level = "debug")]
    pub async fn publish_event(&self, event: CloudEvent, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("publish_event"));
        }

        let mut event = event;
        self.trace.child().inject(&mut event.attributes);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled("publish_event")),
            result = self.core.worker.publish_event(event, cancel) => result,
        }
    }

    /// Publish a typed event to `topic`
    ///
    /// `source` defaults to this agent's key.
    pub async fn publish_message<E: Event>(
        &self,
        event: &E,
        topic: &str,
        source: Option<&str>,
    ) -> Result<()> {
        let source = source.unwrap_or(self.core.id.key());
        let event = CloudEvent::from_event(event, source, topic)?;
        self.publish_event(event, &CancellationToken::new()).await
    }

    /// Send a JSON request and wait for the response
    ///
    /// Transport failures are errors; a remote handler failure arrives as a
    /// response carrying an error.
    pub async fn request<P: Serialize + ?Sized>(
        &self,
        target: &AgentId,
        method: &str,
        params: &P,
    ) -> Result<RpcResponse> {
        let payload = Payload::json(params)?;
        self.request_payload(target, method, payload, &CancellationToken::new())
            .await
    }

    /// Call a typed method and decode its output
    ///
    /// An error response becomes `RemoteFault`.
    pub async fn call<M: Method>(&self, target: &AgentId, params: &M::Params) -> Result<M::Output> {
        self.request(target, M::NAME, params).await?.decode()
    }

    /// Send a request with a raw payload
    pub async fn request_payload(
        &self,
        target: &AgentId,
        method: &str,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<RpcResponse> {
        let request = RpcRequest::new(target.clone(), method, payload);
        self.send_request(request, cancel).await
    }

    /// Send a prepared request and wait for its response
    ///
    /// Cancelling `cancel` returns `RequestCancelled` and removes the
    /// outstanding entry; a response arriving later is rejected.
    #[instrument(skip(self, request, cancel), fields(agent_id = %self.core.id, target = %request.target, request_id = %request.request_id), level = "debug")]
    pub async fn send_request(
        &self,
        request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<RpcResponse> {
        let mut request = request;
        request.source = Some(self.core.id.clone());
        self.trace.child().inject(&mut request.metadata);

        let request_id = request.request_id;
        let cancelled = || Error::RequestCancelled {
            request_id: request_id.to_string(),
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let pending = self.core.pending.register(request_id)?;
        debug!(method = %request.method, "Sending request");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            sent = self.core.worker.send_request(&self.core.id, request, cancel) => sent?,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            response = pending.recv() => response,
        }
    }

    /// Subscribe this agent's type to `topic` (idempotent)
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.core.subscribe(topic).await.map(|_| ())
    }

    /// Persist a state snapshot through the worker
    pub async fn store_state(&self, state: AgentState) -> Result<()> {
        self.core
            .worker
            .store_state(state, &CancellationToken::new())
            .await
    }

    /// Read a state snapshot through the worker
    pub async fn read_state(&self, agent_id: &AgentId) -> Result<Option<AgentState>> {
        self.core
            .worker
            .read_state(agent_id, &CancellationToken::new())
            .await
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.core.id)
            .field("trace", &self.trace)
            .finish()
    }
}

// =============================================================================
// Agent
// =============================================================================

struct AgentInner<A> {
    core: Arc<AgentCore>,
    behavior: A,
    table: Arc<HandlerTable<A>>,
    mailbox: Arc<Mailbox>,
    state: parking_lot::Mutex<LifecycleState>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    processed: AtomicU64,
    faulted: AtomicU64,
    shutdown_timeout: Duration,
}

/// An addressable agent
///
/// Cheap to clone; all clones refer to the same agent. When the last
/// clone is dropped the mailbox closes and outstanding callers see
/// `RequestAbandoned`.
pub struct Agent<A> {
    inner: Arc<AgentInner<A>>,
}

impl<A> Clone for Agent<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Send + Sync + 'static> Agent<A> {
    /// Construct an agent; its type is the table's agent type
    ///
    /// The table's capability set is recorded in `registry`.
    pub fn new(
        key: impl Into<String>,
        behavior: A,
        table: Arc<HandlerTable<A>>,
        registry: Arc<EventRegistry>,
        worker: Arc<dyn AgentWorker>,
        config: &AgoraConfig,
    ) -> Result<Self> {
        config.validate()?;
        let id = AgentId::new(table.agent_type(), key)?;
        registry.register_agent_type(&table);

        let core = Arc::new(AgentCore {
            pending: PendingRequests::new(id.to_string()),
            id,
            worker,
            registry,
            subscribed: tokio::sync::Mutex::new(BTreeSet::new()),
        });

        let inner = Arc::new(AgentInner {
            core,
            behavior,
            table,
            mailbox: Arc::new(Mailbox::new(&config.mailbox)),
            state: parking_lot::Mutex::new(LifecycleState::Created),
            pump: parking_lot::Mutex::new(None),
            processed: AtomicU64::new(0),
            faulted: AtomicU64::new(0),
            shutdown_timeout: Duration::from_millis(config.runtime.shutdown_timeout_ms),
        });

        Ok(Self { inner })
    }

    pub fn id(&self) -> &AgentId {
        &self.inner.core.id
    }

    pub fn behavior(&self) -> &A {
        &self.inner.behavior
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    /// Start the pump and register implicit subscriptions
    ///
    /// Idempotent: the pump is started once, and topics already registered
    /// are skipped, so a call that failed on a transport fault can be
    /// repeated.
    #[instrument(skip(self), fields(agent_id = %self.id()))]
    pub async fn activate(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                LifecycleState::Created => {
                    debug_assert!(state.can_transition_to(LifecycleState::Running));
                    let pump = tokio::spawn(run_pump(
                        self.inner.mailbox.clone(),
                        Arc::downgrade(&self.inner),
                    ));
                    *self.inner.pump.lock() = Some(pump);
                    *state = LifecycleState::Running;
                    info!("Agent activated");
                }
                LifecycleState::Running => {}
                other => {
                    return Err(Error::AgentNotRunning {
                        agent_id: self.id().to_string(),
                        state: other.to_string(),
                    })
                }
            }
        }

        for topic in self.implicit_topics() {
            self.inner.core.subscribe(&topic).await?;
        }
        Ok(())
    }

    /// Direct, broadcast, and table-derived topics
    pub fn implicit_topics(&self) -> BTreeSet<String> {
        self.inner.implicit_topics()
    }

    /// Topics registered through the worker so far
    pub async fn subscriptions(&self) -> BTreeSet<String> {
        self.inner.core.subscribed.lock().await.clone()
    }

    /// Subscribe this agent's type to `topic` (idempotent)
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.inner.core.subscribe(topic).await.map(|_| ())
    }

    /// Append without waiting; never fails
    pub fn enqueue(&self, envelope: Envelope) -> EnqueueOutcome {
        self.inner.enqueue(envelope)
    }

    /// Append, honouring the mailbox overflow policy
    pub async fn deliver(&self, envelope: Envelope) -> Result<()> {
        self.inner.deliver(envelope).await
    }

    /// Context for outbound operations outside any handler (new trace)
    pub fn context(&self) -> AgentContext {
        AgentContext::new(self.inner.core.clone(), TraceContext::new_root())
    }

    /// Transport view of this agent, held weakly by workers
    pub fn inbox(&self) -> Weak<dyn AgentInbox> {
        let weak: Weak<AgentInner<A>> = Arc::downgrade(&self.inner);
        weak
    }

    /// Close the mailbox, drain queued messages, and stop the pump
    ///
    /// Must not be awaited from inside this agent's own handler.
    #[instrument(skip(self), fields(agent_id = %self.id()))]
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                LifecycleState::Running => *state = LifecycleState::Stopping,
                LifecycleState::Created => {
                    *state = LifecycleState::Stopped;
                    drop(state);
                    self.inner.mailbox.close();
                    self.inner.core.pending.abandon_all();
                    return Ok(());
                }
                LifecycleState::Stopping | LifecycleState::Stopped => return Ok(()),
            }
        }

        self.inner.mailbox.close();
        let pump = self.inner.pump.lock().take();
        if let Some(mut pump) = pump {
            match tokio::time::timeout(self.inner.shutdown_timeout, &mut pump).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Pump task failed"),
                Err(_) => {
                    warn!(
                        timeout_ms = self.inner.shutdown_timeout.as_millis() as u64,
                        remaining = self.inner.mailbox.len(),
                        "Pump did not drain in time, aborting"
                    );
                    pump.abort();
                }
            }
        }

        let abandoned = self.inner.core.pending.abandon_all();
        *self.inner.state.lock() = LifecycleState::Stopped;
        info!(abandoned_requests = abandoned, "Agent stopped");
        Ok(())
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            state: self.state(),
            mailbox: self.inner.mailbox.stats(),
            processed: self.inner.processed.load(Ordering::Relaxed),
            faulted: self.inner.faulted.load(Ordering::Relaxed),
            pending_requests: self.inner.core.pending.len(),
        }
    }
}

impl<A> std::fmt::Debug for Agent<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.inner.core.id)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

// =============================================================================
// Message pump
// =============================================================================

async fn run_pump<A: Send + Sync + 'static>(mailbox: Arc<Mailbox>, agent: Weak<AgentInner<A>>) {
    while let Some(envelope) = mailbox.recv().await {
        let Some(inner) = agent.upgrade() else {
            break;
        };
        inner.dispatch(envelope).await;
    }
    debug!("Pump finished");
}

impl<A: Send + Sync + 'static> AgentInner<A> {
    fn implicit_topics(&self) -> BTreeSet<String> {
        let mut topics = self.table.topics().clone();
        topics.insert(self.core.id.direct_topic());
        topics.insert(self.core.id.broadcast_topic());
        topics
    }

    async fn dispatch(&self, envelope: Envelope) {
        let kind = envelope.kind();
        let span = info_span!(
            "agent.dispatch",
            agent_id = %self.core.id,
            kind = kind,
            name = %envelope.name()
        );

        let result = async {
            match envelope {
                Envelope::Event(event) => self.handle_event(event).await,
                Envelope::Request(request) => {
                    let response = self.handle_request(request).await;
                    self.core
                        .worker
                        .send_response(response, &CancellationToken::new())
                        .await
                }
                Envelope::Response(response) => self.core.pending.resolve(response),
            }
        }
        .instrument(span.clone())
        .await;

        self.processed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = result {
            self.faulted.fetch_add(1, Ordering::Relaxed);
            let _entered = span.enter();
            if e.is_per_message() {
                warn!(error = %e, "Message failed");
            } else {
                error!(error = %e, "Dispatch failed");
            }
        }
    }

    async fn handle_event(&self, event: CloudEvent) -> Result<()> {
        let type_name = event.type_name.as_str();

        let Some(handler) = self.table.event_handler(type_name) else {
            return self.unhandled_event(&event);
        };

        let ctx = AgentContext::new(self.core.clone(), TraceContext::extract(&event.attributes));
        guarded(&self.core.id, type_name, handler(&self.behavior, &ctx, &event))
            .await
            .map_err(|e| match e {
                Error::HandlerFault { .. } => e,
                other => Error::handler_fault(self.core.id.to_string(), type_name, other.to_string()),
            })
    }

    fn unhandled_event(&self, event: &CloudEvent) -> Result<()> {
        let type_name = event.type_name.as_str();
        let Some(info) = self.core.registry.resolve(type_name) else {
            debug!(event_type = %type_name, "Dropping event of unregistered type");
            return Ok(());
        };

        let interest = self.implicit_topics();
        let expected_on = info.topics.iter().find(|topic| interest.contains(**topic));
        let declared = self
            .core
            .registry
            .handles(self.core.id.agent_type(), type_name);

        match (expected_on, declared) {
            (Some(topic), _) => Err(Error::unroutable_event(
                type_name,
                format!(
                    "agent type '{}' is subscribed to '{}' but has no handler",
                    self.core.id.agent_type(),
                    topic
                ),
            )),
            (None, true) => Err(Error::unroutable_event(
                type_name,
                format!(
                    "agent type '{}' declares the event but this instance has no handler",
                    self.core.id.agent_type()
                ),
            )),
            (None, false) => {
                debug!(event_type = %type_name, "Event not handled by this agent type");
                Ok(())
            }
        }
    }

    async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        let request_id = request.request_id;

        let Some(handler) = self.table.method_handler(&request.method) else {
            warn!(method = %request.method, "Unknown method");
            return RpcResponse::error(
                request_id,
                format!(
                    "method '{}' not implemented by agent type '{}'",
                    request.method,
                    self.core.id.agent_type()
                ),
            );
        };

        let ctx = AgentContext::new(self.core.clone(), TraceContext::extract(&request.metadata));
        let result = guarded(
            &self.core.id,
            &request.method,
            handler(&self.behavior, &ctx, &request.payload),
        )
        .await;

        let mut response = match result {
            Ok(payload) => RpcResponse::success(request_id, payload),
            Err(e) => {
                warn!(method = %request.method, error = %e, "Request handler failed");
                self.faulted.fetch_add(1, Ordering::Relaxed);
                RpcResponse::error(request_id, e.to_string())
            }
        };
        ctx.trace().inject(&mut response.metadata);
        response
    }

    fn enqueue(&self, envelope: Envelope) -> EnqueueOutcome {
        match self.mailbox.try_push(envelope) {
            Ok(PushOutcome::Accepted) => EnqueueOutcome::Accepted,
            Ok(PushOutcome::EvictedOldest(evicted)) => {
                self.on_evicted(evicted);
                EnqueueOutcome::EvictedOldest
            }
            Err(e) => {
                let outcome = if e.is_full() {
                    EnqueueOutcome::Full
                } else {
                    EnqueueOutcome::Closed
                };
                let (envelope, error) = e.into_parts(&self.core.id);
                warn!(
                    agent_id = %self.core.id,
                    kind = envelope.kind(),
                    name = %envelope.name(),
                    outcome = ?outcome,
                    "Envelope refused"
                );
                // Nobody hears about a refused enqueue
                self.terminate(envelope, error.to_string());
                outcome
            }
        }
    }

    async fn deliver(&self, envelope: Envelope) -> Result<()> {
        match self.mailbox.push(envelope).await {
            Ok(PushOutcome::Accepted) => Ok(()),
            Ok(PushOutcome::EvictedOldest(evicted)) => {
                self.on_evicted(evicted);
                Ok(())
            }
            Err(e) => {
                let (envelope, error) = e.into_parts(&self.core.id);
                // The sender of a request or event sees the error; the
                // caller waiting on a response does not
                if let Envelope::Response(response) = &envelope {
                    warn!(
                        agent_id = %self.core.id,
                        request_id = %response.request_id,
                        error = %error,
                        "Response refused"
                    );
                    self.fail_response(response, error.to_string());
                }
                Err(error)
            }
        }
    }

    fn on_evicted(&self, evicted: Envelope) {
        warn!(
            agent_id = %self.core.id,
            kind = evicted.kind(),
            name = %evicted.name(),
            "Evicted oldest envelope from full mailbox"
        );
        let reason = format!("evicted from full mailbox of agent {}", self.core.id);
        self.terminate(evicted, reason);
    }

    /// Answer whatever waits on an envelope that will never be dispatched
    fn terminate(&self, envelope: Envelope, reason: String) {
        match envelope {
            Envelope::Event(_) => {}
            Envelope::Response(response) => self.fail_response(&response, reason),
            Envelope::Request(request) => {
                let worker = self.core.worker.clone();
                let response = RpcResponse::error(request.request_id, reason);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if let Err(e) = worker
                                .send_response(response, &CancellationToken::new())
                                .await
                            {
                                warn!(error = %e, "Failed to answer dropped request");
                            }
                        });
                    }
                    Err(_) => warn!("No runtime to answer dropped request"),
                }
            }
        }
    }

    /// Complete the local caller of `response` with an error instead
    fn fail_response(&self, response: &RpcResponse, reason: String) {
        let failed = RpcResponse::error(response.request_id, reason);
        if let Err(e) = self.core.pending.resolve(failed) {
            debug!(error = %e, "Dropped response had no waiting caller");
        }
    }
}

impl<A> Drop for AgentInner<A> {
    fn drop(&mut self) {
        self.mailbox.close();
        self.core.pending.abandon_all();
    }
}

#[async_trait]
impl<A: Send + Sync + 'static> AgentInbox for AgentInner<A> {
    fn agent_id(&self) -> &AgentId {
        &self.core.id
    }

    fn enqueue(&self, envelope: Envelope) -> EnqueueOutcome {
        AgentInner::enqueue(self, envelope)
    }

    async fn deliver(&self, envelope: Envelope) -> Result<()> {
        AgentInner::deliver(self, envelope).await
    }
}

// =============================================================================
// Panic containment
// =============================================================================

async fn guarded<T>(
    agent_id: &AgentId,
    handler: &str,
    future: BoxFuture<'_, Result<T>>,
) -> Result<T> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::handler_fault(
            agent_id.to_string(),
            handler,
            panic_message(panic.as_ref()),
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
