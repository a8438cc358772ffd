//! Items delivered to the consumer.
//!
//! A `Message` is one publish received from the push source, stamped with the
//! time it entered the buffer.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// MQTT delivery quality level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum QualityOfService {
    /// QoS 0: fire and forget.
    #[default]
    AtMostOnce,
    /// QoS 1: acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// QoS 2: exactly-once handshake.
    ExactlyOnce,
}

impl QualityOfService {
    /// Numeric level as used on the wire.
    pub fn level(self) -> u8 {
        match self {
            QualityOfService::AtMostOnce => 0,
            QualityOfService::AtLeastOnce => 1,
            QualityOfService::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QualityOfService {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QualityOfService::AtMostOnce),
            1 => Ok(QualityOfService::AtLeastOnce),
            2 => Ok(QualityOfService::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl fmt::Display for QualityOfService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// A message received from the push source.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Delivery level the broker used for this message.
    pub qos: QualityOfService,
    /// Whether the broker flagged this as a retained message.
    pub retain: bool,
    /// When the push source handed the message to the buffer.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Create an at-most-once, non-retained message stamped now.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QualityOfService::AtMostOnce,
            retain: false,
            received_at: Utc::now(),
        }
    }

    pub fn with_qos(mut self, qos: QualityOfService) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
