//! Wire shapes exchanged between agents and the worker transport
//!
//! `Envelope` is the data plane (event / request / response). Control
//! traffic such as subscription registration travels as `ControlMessage`.

use crate::agent_id::AgentId;
use crate::constants::*;
use crate::contract::Event;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// =============================================================================
// Payload
// =============================================================================

/// Opaque bytes tagged with a content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub content_type: String,
    pub data: Bytes,
}

impl Payload {
    /// Create a payload from raw bytes
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// An empty JSON payload
    pub fn empty() -> Self {
        Self::new(CONTENT_TYPE_JSON, Bytes::new())
    }

    /// Serialize `value` as JSON
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value).map_err(|e| Error::SerializationFailed {
            reason: e.to_string(),
        })?;
        if data.len() > MESSAGE_SIZE_BYTES_MAX {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                limit: MESSAGE_SIZE_BYTES_MAX,
            });
        }
        Ok(Self::new(CONTENT_TYPE_JSON, data))
    }

    /// Decode a JSON payload
    ///
    /// An empty body decodes as JSON `null`, so unit and `Option` types
    /// accept an empty payload.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.content_type != CONTENT_TYPE_JSON {
            return Err(Error::DeserializationFailed {
                reason: format!(
                    "unsupported content type '{}', expected '{}'",
                    self.content_type, CONTENT_TYPE_JSON
                ),
            });
        }
        let body: &[u8] = if self.data.is_empty() { b"null" } else { &self.data };
        serde_json::from_slice(body).map_err(|e| Error::DeserializationFailed {
            reason: e.to_string(),
        })
    }

    /// Size of the body in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the body is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// =============================================================================
// CloudEvent
// =============================================================================

/// Typed, attributed pub/sub envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub source: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub payload: Bytes,
}

impl CloudEvent {
    /// Create an event published to `topic`
    pub fn new(
        type_name: impl Into<String>,
        source: impl Into<String>,
        topic: impl Into<String>,
        payload: Payload,
    ) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(ATTRIBUTE_TOPIC.to_string(), topic.into());
        attributes.insert(ATTRIBUTE_DATA_CONTENT_TYPE.to_string(), payload.content_type);

        Self {
            id: Uuid::new_v4().to_string(),
            type_name: type_name.into(),
            source: source.into(),
            attributes,
            payload: payload.data,
        }
    }

    /// Build an event from a typed payload
    pub fn from_event<E: Event>(
        event: &E,
        source: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(E::TYPE_NAME, source, topic, Payload::json(event)?))
    }

    /// Topic the event was published to
    pub fn topic(&self) -> Option<&str> {
        self.attributes.get(ATTRIBUTE_TOPIC).map(String::as_str)
    }

    /// Payload content type (JSON when unspecified)
    pub fn content_type(&self) -> &str {
        self.attributes
            .get(ATTRIBUTE_DATA_CONTENT_TYPE)
            .map(String::as_str)
            .unwrap_or(CONTENT_TYPE_JSON)
    }

    /// Payload with its content type
    pub fn payload(&self) -> Payload {
        Payload::new(self.content_type(), self.payload.clone())
    }

    /// Decode the payload as `E`
    pub fn decode<E: Event>(&self) -> Result<E> {
        if self.type_name != E::TYPE_NAME {
            return Err(Error::DeserializationFailed {
                reason: format!(
                    "event type '{}' does not match '{}'",
                    self.type_name,
                    E::TYPE_NAME
                ),
            });
        }
        self.payload().decode_json()
    }
}

// =============================================================================
// RPC
// =============================================================================

/// Point-to-point request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub target: AgentId,
    #[serde(default)]
    pub source: Option<AgentId>,
    pub request_id: Uuid,
    pub method: String,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RpcRequest {
    /// Create a request with a fresh request id
    pub fn new(target: AgentId, method: impl Into<String>, payload: Payload) -> Self {
        Self {
            target,
            source: None,
            request_id: Uuid::new_v4(),
            method: method.into(),
            payload,
            metadata: HashMap::new(),
        }
    }
}

/// Outcome carried by a response: exactly one of payload or error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResult {
    Payload(Payload),
    Error(String),
}

/// Response correlated to a request by `request_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: Uuid,
    pub result: RpcResult,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RpcResponse {
    /// Successful response
    pub fn success(request_id: Uuid, payload: Payload) -> Self {
        Self {
            request_id,
            result: RpcResult::Payload(payload),
            metadata: HashMap::new(),
        }
    }

    /// Error-bearing response
    pub fn error(request_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            request_id,
            result: RpcResult::Error(message.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, RpcResult::Payload(_))
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.result {
            RpcResult::Payload(p) => Some(p),
            RpcResult::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            RpcResult::Payload(_) => None,
            RpcResult::Error(e) => Some(e),
        }
    }

    /// Decode a successful payload, or surface the error field as `RemoteFault`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.result {
            RpcResult::Payload(p) => p.decode_json(),
            RpcResult::Error(e) => Err(Error::RemoteFault { reason: e.clone() }),
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Data-plane message moved by the transport into an agent's mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Envelope {
    Event(CloudEvent),
    Request(RpcRequest),
    Response(RpcResponse),
}

impl Envelope {
    /// Message kind, used as a span field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Request(_) => "request",
            Self::Response(_) => "response",
        }
    }

    /// Type-name for events, method for requests, request id for responses
    pub fn name(&self) -> String {
        match self {
            Self::Event(e) => e.type_name.clone(),
            Self::Request(r) => r.method.clone(),
            Self::Response(r) => r.request_id.to_string(),
        }
    }
}

// =============================================================================
// Subscriptions (control plane)
// =============================================================================

/// Interest of an agent type in a topic
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub agent_type: String,
    pub topic_type: String,
}

impl Subscription {
    pub fn new(agent_type: impl Into<String>, topic_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            topic_type: topic_type.into(),
        }
    }
}

/// Request to add a subscription to the authoritative table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSubscriptionRequest {
    pub request_id: Uuid,
    pub subscription: Subscription,
}

/// Control traffic sent through `SendMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    AddSubscription(AddSubscriptionRequest),
}

impl ControlMessage {
    /// Build an add-subscription request with a fresh id
    pub fn add_subscription(subscription: Subscription) -> Self {
        Self::AddSubscription(AddSubscriptionRequest {
            request_id: Uuid::new_v4(),
            subscription,
        })
    }
}

// =============================================================================
// Agent state snapshots
// =============================================================================

/// Snapshot of an agent's state handed to the worker for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    #[serde(default)]
    pub etag: Option<String>,
    pub payload: Payload,
}

impl AgentState {
    /// Snapshot a serializable value
    pub fn from_json<T: Serialize>(agent_id: AgentId, value: &T) -> Result<Self> {
        Ok(Self {
            agent_id,
            etag: None,
            payload: Payload::json(value)?,
        })
    }

    /// Decode the snapshot
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T> {
        self.payload.decode_json()
    }
}
