//! Explicit limits and well-known names for Agora
//!
//! All limits use big-endian naming (most significant first) and include
//! units in the name.

// =============================================================================
// Agent Identity Limits
// =============================================================================

/// Maximum length of an agent type in bytes
pub const AGENT_TYPE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an agent key in bytes
pub const AGENT_KEY_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a topic in bytes (`type:key` plus separator)
pub const TOPIC_LENGTH_BYTES_MAX: usize = AGENT_TYPE_LENGTH_BYTES_MAX + AGENT_KEY_LENGTH_BYTES_MAX + 1;

// =============================================================================
// Mailbox Limits
// =============================================================================

/// Default mailbox capacity per agent
pub const MAILBOX_CAPACITY_DEFAULT: usize = 10_000;

/// Maximum mailbox capacity per agent
pub const MAILBOX_CAPACITY_MAX: usize = 1_000_000;

// =============================================================================
// Message Limits
// =============================================================================

/// Maximum size of an event or RPC payload in bytes (4 MB)
pub const MESSAGE_SIZE_BYTES_MAX: usize = 4 * 1024 * 1024;

/// Maximum number of outstanding RPCs issued by one agent
pub const PENDING_REQUEST_COUNT_MAX: usize = 10_000;

// =============================================================================
// Lifecycle
// =============================================================================

/// Default time allowed for an agent pump to drain on shutdown (10 sec)
pub const SHUTDOWN_TIMEOUT_MS_DEFAULT: u64 = 10 * 1000;

/// Maximum time allowed for an agent pump to drain on shutdown (5 min)
pub const SHUTDOWN_TIMEOUT_MS_MAX: u64 = 5 * 60 * 1000;

// =============================================================================
// Wire Names
// =============================================================================

/// Content type used for serde_json payloads
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// CloudEvent attribute carrying the topic an event was published to
pub const ATTRIBUTE_TOPIC: &str = "topic";

/// CloudEvent attribute carrying the payload content type
pub const ATTRIBUTE_DATA_CONTENT_TYPE: &str = "datacontenttype";

/// W3C trace context parent header
pub const ATTRIBUTE_TRACEPARENT: &str = "traceparent";

/// W3C trace context vendor state header
pub const ATTRIBUTE_TRACESTATE: &str = "tracestate";

// Compile-time assertions for constant validity
const _: () = {
    assert!(AGENT_TYPE_LENGTH_BYTES_MAX >= 32);
    assert!(AGENT_KEY_LENGTH_BYTES_MAX >= 36); // fits a hyphenated UUID
    assert!(MAILBOX_CAPACITY_DEFAULT <= MAILBOX_CAPACITY_MAX);
    assert!(SHUTDOWN_TIMEOUT_MS_DEFAULT <= SHUTDOWN_TIMEOUT_MS_MAX);
};
