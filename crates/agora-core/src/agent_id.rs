//! Agent identity and topic addressing

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique address of an agent within a deployment
///
/// An `AgentId` is a `(type, key)` pair. The type names the agent's
/// capabilities (its handler table), the key distinguishes instances.
///
/// Textual forms:
/// - `"{type}/{key}"` is the agent address (`Display` / `FromStr`)
/// - `"{type}:{key}"` is the agent's direct topic
/// - `"{type}"` is the broadcast topic shared by every agent of the type
///
/// Immutable after creation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AgentId {
    #[serde(rename = "type")]
    agent_type: String,
    key: String,
}

impl AgentId {
    /// Create a new AgentId with validation
    ///
    /// # Errors
    /// Returns error if either part is empty, too long, or contains a
    /// separator (`/` or `:`) or control character.
    pub fn new(agent_type: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let agent_type = agent_type.into();
        let key = key.into();

        validate_type(&agent_type)?;
        validate_key(&agent_type, &key)?;

        debug_assert!(agent_type.len() <= AGENT_TYPE_LENGTH_BYTES_MAX);
        debug_assert!(key.len() <= AGENT_KEY_LENGTH_BYTES_MAX);
        Ok(Self { agent_type, key })
    }

    /// Get the agent type
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Get the agent key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Topic addressing exactly this agent (`type:key`)
    pub fn direct_topic(&self) -> String {
        format!("{}:{}", self.agent_type, self.key)
    }

    /// Topic addressing every agent of this type (`type`)
    pub fn broadcast_topic(&self) -> String {
        self.agent_type.clone()
    }

    /// Check whether `topic` is this agent's direct topic
    pub fn is_direct_topic(&self, topic: &str) -> bool {
        topic
            .split_once(':')
            .map(|(t, k)| t == self.agent_type && k == self.key)
            .unwrap_or(false)
    }
}

/// Check that `topic` can be subscribed to or published on
///
/// # Errors
/// Returns `InvalidTopic` if the topic is empty, longer than
/// `TOPIC_LENGTH_BYTES_MAX`, or contains control characters.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic {
            topic: String::new(),
            reason: "topic must not be empty".into(),
        });
    }
    if topic.len() > TOPIC_LENGTH_BYTES_MAX {
        return Err(Error::InvalidTopic {
            topic: topic.chars().take(32).collect::<String>() + "...",
            reason: format!(
                "{} bytes exceeds limit of {} bytes",
                topic.len(),
                TOPIC_LENGTH_BYTES_MAX
            ),
        });
    }
    if topic.chars().any(char::is_control) {
        return Err(Error::InvalidTopic {
            topic: topic.escape_default().to_string(),
            reason: "topic must not contain control characters".into(),
        });
    }
    Ok(())
}

fn validate_type(agent_type: &str) -> Result<()> {
    if agent_type.is_empty() {
        return Err(Error::InvalidAgentId {
            id: format!("/{}", agent_type),
            reason: "agent type must not be empty".into(),
        });
    }
    if agent_type.len() > AGENT_TYPE_LENGTH_BYTES_MAX {
        return Err(Error::AgentIdTooLong {
            length: agent_type.len(),
            limit: AGENT_TYPE_LENGTH_BYTES_MAX,
        });
    }
    let valid = agent_type
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(Error::InvalidAgentId {
            id: agent_type.to_string(),
            reason: "agent type contains invalid characters".into(),
        });
    }
    Ok(())
}

fn validate_key(agent_type: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidAgentId {
            id: format!("{}/", agent_type),
            reason: "agent key must not be empty".into(),
        });
    }
    if key.len() > AGENT_KEY_LENGTH_BYTES_MAX {
        return Err(Error::AgentIdTooLong {
            length: key.len(),
            limit: AGENT_KEY_LENGTH_BYTES_MAX,
        });
    }
    if key.chars().any(|c| c == '/' || c == ':' || c.is_control()) {
        return Err(Error::InvalidAgentId {
            id: format!("{}/{}", agent_type, key),
            reason: "agent key must not contain '/', ':' or control characters".into(),
        });
    }
    Ok(())
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

impl FromStr for AgentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (agent_type, key) = s.split_once('/').ok_or_else(|| Error::InvalidAgentId {
            id: s.to_string(),
            reason: "expected '{type}/{key}'".into(),
        })?;
        Self::new(agent_type, key)
    }
}
