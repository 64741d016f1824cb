//! Shared test agents and a scripted worker

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_core::error::{Error, Result};
use agora_core::{
    AgentId, AgentState, AgoraConfig, CloudEvent, ControlMessage, Envelope, Event, MailboxConfig,
    Method, OverflowPolicy, RpcRequest, RpcResponse, Subscription,
};
use agora_runtime::{
    Agent, AgentContext, AgentWorker, CancellationToken, EventRegistry, Handle, HandlerTable,
    Respond,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// =============================================================================
// Events and methods
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub seq: u32,
}

impl Event for Note {
    const TYPE_NAME: &'static str = "Note";
}

/// Handled by `Echo`, but the handler always fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poison;

impl Event for Poison {
    const TYPE_NAME: &'static str = "Poison";
}

/// Handled by `Echo` by publishing a `Note` to topic "out"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    pub seq: u32,
}

impl Event for Relay {
    const TYPE_NAME: &'static str = "Relay";
}

/// Never handled by `Echo`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Greeting {
    pub text: String,
}

impl Event for Greeting {
    const TYPE_NAME: &'static str = "Greeting";
}

/// Never handled by `Echo`, but nominally published on `Echo`'s broadcast topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Farewell;

impl Event for Farewell {
    const TYPE_NAME: &'static str = "Farewell";
    const TOPICS: &'static [&'static str] = &["Echo"];
}

/// Handled by `Echo`; implies the "announcements" topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement;

impl Event for Announcement {
    const TYPE_NAME: &'static str = "Announcement";
    const TOPICS: &'static [&'static str] = &["announcements"];
}

pub struct Ping;

impl Method for Ping {
    const NAME: &'static str = "ping";
    type Params = ();
    type Output = String;
}

pub struct Explode;

impl Method for Explode {
    const NAME: &'static str = "explode";
    type Params = ();
    type Output = String;
}

pub struct Crash;

impl Method for Crash {
    const NAME: &'static str = "crash";
    type Params = ();
    type Output = String;
}

pub struct Add;

impl Method for Add {
    const NAME: &'static str = "add";
    type Params = (i64, i64);
    type Output = i64;
}

// =============================================================================
// Echo agent
// =============================================================================

#[derive(Default)]
pub struct Echo {
    pub notes: Mutex<Vec<u32>>,
    pub announcements: AtomicUsize,
}

impl Echo {
    pub fn notes(&self) -> Vec<u32> {
        self.notes.lock().clone()
    }
}

#[async_trait]
impl Handle<Note> for Echo {
    async fn handle(&self, _ctx: &AgentContext, event: Note) -> Result<()> {
        self.notes.lock().push(event.seq);
        Ok(())
    }
}

#[async_trait]
impl Handle<Poison> for Echo {
    async fn handle(&self, _ctx: &AgentContext, _event: Poison) -> Result<()> {
        Err(Error::internal("poisoned"))
    }
}

#[async_trait]
impl Handle<Relay> for Echo {
    async fn handle(&self, ctx: &AgentContext, event: Relay) -> Result<()> {
        ctx.publish_message(&Note { seq: event.seq }, "out", None)
            .await
    }
}

#[async_trait]
impl Handle<Announcement> for Echo {
    async fn handle(&self, _ctx: &AgentContext, _event: Announcement) -> Result<()> {
        self.announcements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Respond<Ping> for Echo {
    async fn respond(&self, _ctx: &AgentContext, _params: ()) -> Result<String> {
        Ok("pong".to_string())
    }
}

#[async_trait]
impl Respond<Explode> for Echo {
    async fn respond(&self, _ctx: &AgentContext, _params: ()) -> Result<String> {
        Err(Error::internal("boom"))
    }
}

#[async_trait]
impl Respond<Crash> for Echo {
    async fn respond(&self, _ctx: &AgentContext, _params: ()) -> Result<String> {
        panic!("crash in handler")
    }
}

#[async_trait]
impl Respond<Add> for Echo {
    async fn respond(&self, _ctx: &AgentContext, params: (i64, i64)) -> Result<i64> {
        let (a, b) = params;
        Ok(a + b)
    }
}

pub fn echo_table() -> Arc<HandlerTable<Echo>> {
    Arc::new(
        HandlerTable::new("Echo")
            .on_event::<Note>()
            .on_event::<Poison>()
            .on_event::<Relay>()
            .on_event::<Announcement>()
            .on_method::<Ping>()
            .on_method::<Explode>()
            .on_method::<Crash>()
            .on_method::<Add>(),
    )
}

// =============================================================================
// Scripted worker
// =============================================================================

/// Worker that records outbound traffic instead of routing it
#[derive(Default)]
pub struct ScriptedWorker {
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub published: Mutex<Vec<CloudEvent>>,
    pub responses: Mutex<Vec<RpcResponse>>,
    pub fail_subscriptions: AtomicBool,
    requests: Mutex<Option<mpsc::UnboundedSender<RpcRequest>>>,
}

impl ScriptedWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Receive every request sent through this worker
    pub fn capture_requests(&self) -> mpsc::UnboundedReceiver<RpcRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.requests.lock() = Some(tx);
        rx
    }

    pub fn topics(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|s| s.topic_type.clone())
            .collect()
    }
}

#[async_trait]
impl AgentWorker for ScriptedWorker {
    async fn send_message(&self, message: ControlMessage) -> Result<()> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(Error::transport_fault("send_message", "broker unavailable"));
        }
        let ControlMessage::AddSubscription(request) = message;
        self.subscriptions.lock().push(request.subscription);
        Ok(())
    }

    async fn send_request(
        &self,
        _from: &AgentId,
        request: RpcRequest,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(tx) = self.requests.lock().as_ref() {
            let _ = tx.send(request);
        }
        Ok(())
    }

    async fn send_response(
        &self,
        response: RpcResponse,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.responses.lock().push(response);
        Ok(())
    }

    async fn publish_event(&self, event: CloudEvent, _cancel: &CancellationToken) -> Result<()> {
        self.published.lock().push(event);
        Ok(())
    }

    async fn store_state(&self, _state: AgentState, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn read_state(
        &self,
        _agent_id: &AgentId,
        _cancel: &CancellationToken,
    ) -> Result<Option<AgentState>> {
        Ok(None)
    }
}

/// Build an `Echo` agent wired to a scripted worker (not activated)
pub fn scripted_echo(key: &str, config: &AgoraConfig) -> (Agent<Echo>, Arc<ScriptedWorker>) {
    let worker = ScriptedWorker::new();
    let agent = Agent::new(
        key,
        Echo::default(),
        echo_table(),
        Arc::new(EventRegistry::new()),
        worker.clone(),
        config,
    )
    .unwrap();
    (agent, worker)
}

/// A `Note` on `Echo`'s broadcast topic
pub fn note(seq: u32) -> Envelope {
    Envelope::Event(CloudEvent::from_event(&Note { seq }, "test", "Echo").unwrap())
}

pub fn config_with_mailbox(capacity: usize, policy: OverflowPolicy) -> AgoraConfig {
    AgoraConfig {
        mailbox: MailboxConfig::new(capacity, policy),
        ..Default::default()
    }
}

/// Poll `condition` until it holds, failing after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
