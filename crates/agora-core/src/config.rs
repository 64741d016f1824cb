//! Configuration for Agora
//!
//! Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for Agora
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgoraConfig {
    /// Runtime lifecycle configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Per-agent mailbox configuration
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

impl AgoraConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::InvalidConfiguration {
            field: "<document>".into(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        self.mailbox.validate()?;
        Ok(())
    }
}

/// Runtime lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Time allowed for an agent pump to drain on shutdown (milliseconds)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    SHUTDOWN_TIMEOUT_MS_DEFAULT
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.shutdown_timeout_ms == 0 {
            return Err(Error::InvalidConfiguration {
                field: "runtime.shutdown_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if self.shutdown_timeout_ms > SHUTDOWN_TIMEOUT_MS_MAX {
            return Err(Error::InvalidConfiguration {
                field: "runtime.shutdown_timeout_ms".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.shutdown_timeout_ms, SHUTDOWN_TIMEOUT_MS_MAX
                ),
            });
        }
        Ok(())
    }
}

/// What a full mailbox does with a new message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new message; the sender sees an error
    #[default]
    Reject,

    /// Wait for space (only for senders that can await)
    Block,

    /// Evict the oldest queued message to make room
    DropOldest,
}

/// Per-agent mailbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Maximum queued messages per agent
    #[serde(default = "default_mailbox_capacity")]
    pub capacity: usize,

    /// Behavior when the mailbox is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_mailbox_capacity() -> usize {
    MAILBOX_CAPACITY_DEFAULT
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: default_mailbox_capacity(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl MailboxConfig {
    /// Create a mailbox configuration
    pub fn new(capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            capacity,
            overflow_policy,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfiguration {
                field: "mailbox.capacity".into(),
                reason: "must be positive".into(),
            });
        }
        if self.capacity > MAILBOX_CAPACITY_MAX {
            return Err(Error::InvalidConfiguration {
                field: "mailbox.capacity".into(),
                reason: format!("{} exceeds limit {}", self.capacity, MAILBOX_CAPACITY_MAX),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgoraConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mailbox.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(config.mailbox.capacity, MAILBOX_CAPACITY_DEFAULT);
    }

    #[test]
    fn test_from_toml_str() {
        let config = AgoraConfig::from_toml_str(
            r#"
            [runtime]
            shutdown_timeout_ms = 2000

            [mailbox]
            capacity = 64
            overflow_policy = "drop_oldest"
            "#,
        )
        .unwrap();

        assert_eq!(config.runtime.shutdown_timeout_ms, 2000);
        assert_eq!(config.mailbox.capacity, 64);
        assert_eq!(config.mailbox.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_from_toml_str_partial_uses_defaults() {
        let config = AgoraConfig::from_toml_str("[mailbox]\ncapacity = 8\n").unwrap();
        assert_eq!(config.mailbox.capacity, 8);
        assert_eq!(config.mailbox.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(config.runtime.shutdown_timeout_ms, SHUTDOWN_TIMEOUT_MS_DEFAULT);
    }

    #[test]
    fn test_invalid_mailbox_capacity() {
        let mut config = AgoraConfig::default();
        config.mailbox.capacity = 0;
        assert!(config.validate().is_err());

        config.mailbox.capacity = MAILBOX_CAPACITY_MAX + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let result = AgoraConfig::from_toml_str("[mailbox]\noverflow_policy = \"explode\"\n");
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }
}
