//! Error types for Agora
//!
//! One enum for the whole runtime. The first four groups mirror the failure
//! taxonomy of the message pump: transport faults bubble to the caller of the
//! outbound operation, the per-message kinds never leave a pump iteration.

use thiserror::Error;

/// Result type alias for Agora operations
pub type Result<T> = std::result::Result<T, Error>;

/// Agora error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Transport
    // =========================================================================
    #[error("Transport fault during {operation}: {reason}")]
    TransportFault { operation: String, reason: String },

    // =========================================================================
    // Per-message (contained inside one pump iteration)
    // =========================================================================
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("Handler fault: agent {agent_id}, handler {handler}, reason: {reason}")]
    HandlerFault {
        agent_id: String,
        handler: String,
        reason: String,
    },

    #[error("Unroutable event: {event_type}, reason: {reason}")]
    UnroutableEvent { event_type: String, reason: String },

    // =========================================================================
    // Identity
    // =========================================================================
    #[error("Invalid agent ID: {id}, reason: {reason}")]
    InvalidAgentId { id: String, reason: String },

    #[error("Agent ID part too long: {length} bytes exceeds limit of {limit} bytes")]
    AgentIdTooLong { length: usize, limit: usize },

    #[error("Invalid topic: {topic}, reason: {reason}")]
    InvalidTopic { topic: String, reason: String },

    // =========================================================================
    // Mailbox / lifecycle
    // =========================================================================
    #[error("Mailbox full: agent {agent_id}, depth: {depth}, capacity: {capacity}")]
    MailboxFull {
        agent_id: String,
        depth: usize,
        capacity: usize,
    },

    #[error("Mailbox closed: agent {agent_id}")]
    MailboxClosed { agent_id: String },

    #[error("Agent not running: {agent_id}, state: {state}")]
    AgentNotRunning { agent_id: String, state: String },

    // =========================================================================
    // RPC
    // =========================================================================
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Request cancelled: {request_id}")]
    RequestCancelled { request_id: String },

    #[error("Request abandoned before a response arrived: {request_id}")]
    RequestAbandoned { request_id: String },

    #[error("Duplicate request id: {request_id}")]
    DuplicateRequestId { request_id: String },

    #[error("Too many pending requests: agent {agent_id}, limit: {limit}")]
    TooManyPendingRequests { agent_id: String, limit: usize },

    #[error("Remote request failed: {reason}")]
    RemoteFault { reason: String },

    #[error("Message too large: {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    // =========================================================================
    // Serialization
    // =========================================================================
    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    // =========================================================================
    // Configuration
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal
    // =========================================================================
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a transport fault
    pub fn transport_fault(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransportFault {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol violation
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Create a handler fault
    pub fn handler_fault(
        agent_id: impl Into<String>,
        handler: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::HandlerFault {
            agent_id: agent_id.into(),
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Create an unroutable event error
    pub fn unroutable_event(event_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnroutableEvent {
            event_type: event_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error came from a transport collaborator
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::TransportFault { .. })
    }

    /// Check if this error is scoped to a single message
    ///
    /// These are logged by the pump and never stop it.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. }
                | Self::HandlerFault { .. }
                | Self::UnroutableEvent { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::DeserializationFailed {
                reason: err.to_string(),
            }
        } else {
            Self::SerializationFailed {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::transport_fault("publish_event", "broker unavailable");
        assert!(err.to_string().contains("publish_event"));
        assert!(err.to_string().contains("broker unavailable"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::transport_fault("send_request", "down").is_transport_fault());
        assert!(!Error::transport_fault("send_request", "down").is_per_message());

        assert!(Error::protocol_violation("unknown request id").is_per_message());
        assert!(Error::handler_fault("Echo/1", "Greeting", "boom").is_per_message());
        assert!(Error::unroutable_event("Greeting", "unregistered").is_per_message());
        assert!(!Error::internal("bug").is_per_message());
    }

    #[test]
    fn test_serde_json_error_maps_to_deserialization() {
        let err: Error = serde_json::from_slice::<u32>(b"not json").unwrap_err().into();
        assert!(matches!(err, Error::DeserializationFailed { .. }));
    }
}
