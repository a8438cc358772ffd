//! Producer and buffer configuration types.

use std::time::Duration;

use serde::Deserialize;

use super::{ConfigError, Result, SourceConfig};

/// Default backoff before re-checking an empty buffer.
pub const DEFAULT_RECEIVE_INTERVAL_MS: u64 = 5000;

/// Producer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerConfig {
    /// Wait before re-checking a buffer that was found empty.
    pub receive_interval_ms: u64,
    /// Buffer the push source fills and the producer drains.
    pub buffer: BufferConfig,
    /// Push source feeding the buffer.
    pub source: SourceConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            receive_interval_ms: DEFAULT_RECEIVE_INTERVAL_MS,
            buffer: BufferConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl ProducerConfig {
    /// Retry interval as a duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.receive_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        self.source.validate()
    }
}

/// Buffer implementation discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferType {
    /// In-process FIFO queue.
    #[default]
    Memory,
}

/// What a bounded buffer does with a message that arrives when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered message to make room.
    #[default]
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
}

/// Buffer configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// Buffer type discriminator.
    #[serde(rename = "type")]
    pub buffer_type: BufferType,
    /// Buffer identifier. Generated when absent.
    pub name: Option<String>,
    /// Maximum buffered messages. Unbounded when absent.
    pub capacity: Option<usize>,
    /// Overflow handling, only consulted when `capacity` is set.
    pub overflow: OverflowPolicy,
}

impl BufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == Some(0) {
            return Err(ConfigError::invalid(
                "producer.buffer.capacity",
                "must be greater than zero",
            ));
        }
        if matches!(self.name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "producer.buffer.name",
                "must not be blank",
            ));
        }
        Ok(())
    }
}
