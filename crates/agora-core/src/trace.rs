//! Explicit trace context
//!
//! Carried as W3C `traceparent` / `tracestate` entries in event attributes
//! and request metadata, and passed to handlers through their context.

use crate::constants::{ATTRIBUTE_TRACEPARENT, ATTRIBUTE_TRACESTATE};
use std::collections::HashMap;
use uuid::Uuid;

const TRACEPARENT_VERSION: &str = "00";
const TRACEPARENT_FLAGS_SAMPLED: &str = "01";
const TRACE_ID_HEX_LENGTH: usize = 32;
const SPAN_ID_HEX_LENGTH: usize = 16;

/// Trace context threaded through every operation of an agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    traceparent: Option<String>,
    tracestate: Option<String>,
}

impl TraceContext {
    /// An empty context (no parent)
    pub fn none() -> Self {
        Self::default()
    }

    /// Start a new trace
    pub fn new_root() -> Self {
        Self {
            traceparent: Some(format_traceparent(&new_trace_id(), &new_span_id())),
            tracestate: None,
        }
    }

    /// Read the context from attributes or metadata
    ///
    /// A malformed `traceparent` is ignored.
    pub fn extract(carrier: &HashMap<String, String>) -> Self {
        let traceparent = carrier
            .get(ATTRIBUTE_TRACEPARENT)
            .filter(|tp| parse_trace_id(tp).is_some())
            .cloned();
        let tracestate = traceparent
            .as_ref()
            .and_then(|_| carrier.get(ATTRIBUTE_TRACESTATE).cloned());

        Self {
            traceparent,
            tracestate,
        }
    }

    /// Derive a child span in the same trace, or start a new trace
    pub fn child(&self) -> Self {
        match self.trace_id() {
            Some(trace_id) => Self {
                traceparent: Some(format_traceparent(trace_id, &new_span_id())),
                tracestate: self.tracestate.clone(),
            },
            None => Self::new_root(),
        }
    }

    /// Write the context into attributes or metadata
    pub fn inject(&self, carrier: &mut HashMap<String, String>) {
        if let Some(tp) = &self.traceparent {
            carrier.insert(ATTRIBUTE_TRACEPARENT.to_string(), tp.clone());
        }
        if let Some(ts) = &self.tracestate {
            carrier.insert(ATTRIBUTE_TRACESTATE.to_string(), ts.clone());
        }
    }

    pub fn traceparent(&self) -> Option<&str> {
        self.traceparent.as_deref()
    }

    /// The 32-hex trace id, if any
    pub fn trace_id(&self) -> Option<&str> {
        self.traceparent.as_deref().and_then(parse_trace_id)
    }

    pub fn is_empty(&self) -> bool {
        self.traceparent.is_none()
    }
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SPAN_ID_HEX_LENGTH);
    id
}

fn format_traceparent(trace_id: &str, span_id: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        TRACEPARENT_VERSION, trace_id, span_id, TRACEPARENT_FLAGS_SAMPLED
    )
}

fn parse_trace_id(traceparent: &str) -> Option<&str> {
    let mut parts = traceparent.split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let is_hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());
    let well_formed = version.len() == 2
        && trace_id.len() == TRACE_ID_HEX_LENGTH
        && span_id.len() == SPAN_ID_HEX_LENGTH
        && flags.len() == 2
        && is_hex(version)
        && is_hex(trace_id)
        && is_hex(span_id)
        && is_hex(flags);

    well_formed.then_some(trace_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_well_formed() {
        let ctx = TraceContext::new_root();
        let tp = ctx.traceparent().unwrap();
        assert_eq!(tp.len(), 2 + 1 + 32 + 1 + 16 + 1 + 2);
        assert!(ctx.trace_id().is_some());
    }

    #[test]
    fn test_child_keeps_trace_id() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(root.trace_id(), child.trace_id());
        assert_ne!(root.traceparent(), child.traceparent());
    }

    #[test]
    fn test_inject_extract() {
        let mut carrier = HashMap::new();
        let ctx = TraceContext::new_root();
        ctx.inject(&mut carrier);

        let extracted = TraceContext::extract(&carrier);
        assert_eq!(extracted, ctx);
    }

    #[test]
    fn test_malformed_traceparent_is_ignored() {
        let mut carrier = HashMap::new();
        carrier.insert(ATTRIBUTE_TRACEPARENT.to_string(), "garbage".to_string());
        carrier.insert(ATTRIBUTE_TRACESTATE.to_string(), "k=v".to_string());

        let ctx = TraceContext::extract(&carrier);
        assert!(ctx.is_empty());
        assert!(ctx.child().trace_id().is_some());
    }
}
