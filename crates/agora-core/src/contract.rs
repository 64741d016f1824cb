//! Typed contracts for events and RPC methods
//!
//! Handler tables are keyed by these compile-time names instead of
//! runtime type introspection.

use serde::{de::DeserializeOwned, Serialize};

/// A pub/sub event payload
///
/// `TYPE_NAME` is the wire-level type name carried in `CloudEvent.type`.
/// `TOPICS` lists the topics the event is nominally published on; an agent
/// subscribed to one of them is expected to handle the event.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
    const TOPICS: &'static [&'static str] = &[];
}

/// An RPC method served by an agent
pub trait Method: Send + Sync + 'static {
    const NAME: &'static str;
    type Params: Serialize + DeserializeOwned + Send + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;
}
