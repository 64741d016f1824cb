//! Agora Core
//!
//! Core types, wire shapes, errors, and constants for the Agora agent runtime.
//!
//! # Overview
//!
//! Agora hosts long-lived agents addressed by `AgentId`. Each agent owns a
//! mailbox drained by one message pump, subscribes to topics, publishes
//! `CloudEvent`s, and exchanges correlated RPCs with other agents through
//! a pluggable worker transport.
//!
//! This crate holds everything the runtime and a transport need to agree on:
//! - Explicit limits with big-endian naming (e.g., `AGENT_KEY_LENGTH_BYTES_MAX`)
//! - The wire shapes (`Envelope`, `CloudEvent`, `RpcRequest`, `RpcResponse`)
//! - The `Event` / `Method` contracts used to build typed handler tables

pub mod agent_id;
pub mod config;
pub mod constants;
pub mod contract;
pub mod error;
pub mod message;
pub mod telemetry;
pub mod trace;

pub use agent_id::{validate_topic, AgentId};
pub use config::{AgoraConfig, MailboxConfig, OverflowPolicy, RuntimeConfig};
pub use constants::*;
pub use contract::{Event, Method};
pub use error::{Error, Result};
pub use message::{
    AddSubscriptionRequest, AgentState, CloudEvent, ControlMessage, Envelope, Payload,
    RpcRequest, RpcResponse, RpcResult, Subscription,
};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use trace::TraceContext;
