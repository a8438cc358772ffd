//! Push source configuration types.

use serde::Deserialize;

use super::{ConfigError, Result};
use crate::message::QualityOfService;

/// Source client discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// MQTT broker subscription.
    #[default]
    Mqtt,
}

/// Push source configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Source type discriminator.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Topic filter to subscribe to.
    pub topic: String,
    /// Requested delivery level (0, 1 or 2).
    pub qos: QualityOfService,
    /// Broker connection parameters.
    pub connection: ConnectionConfig,
    /// Client-specific options.
    pub client: ClientOptions,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        validate_topic_filter(&self.topic)
            .map_err(|reason| ConfigError::invalid("producer.source.topic", reason))?;
        self.connection.validate()?;
        self.client.validate()
    }
}

/// Broker connection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Keep-alive interval; 0 disables keep-alive.
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Startup deadline for CONNACK and SUBACK.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 30,
            clean_session: true,
            connect_timeout_ms: 5000,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid(
                "producer.source.connection.host",
                "must not be empty",
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid(
                "producer.source.connection.port",
                "must not be zero",
            ));
        }
        if (1..5).contains(&self.keep_alive_secs) {
            return Err(ConfigError::invalid(
                "producer.source.connection.keep_alive_secs",
                "must be 0 (disabled) or at least 5",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "producer.source.connection.connect_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Client-specific options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    /// MQTT client identifier. Generated when absent.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Capacity of the client's request channel.
    pub channel_capacity: usize,
    /// Largest packet accepted from or sent to the broker, in bytes.
    pub max_packet_size: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            username: None,
            password: None,
            channel_capacity: 10,
            max_packet_size: None,
        }
    }
}

impl ClientOptions {
    pub fn validate(&self) -> Result<()> {
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::invalid(
                "producer.source.client",
                "username and password must be set together",
            ));
        }
        if matches!(self.client_id.as_deref(), Some(id) if id.is_empty()) {
            return Err(ConfigError::invalid(
                "producer.source.client.client_id",
                "must not be empty",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid(
                "producer.source.client.channel_capacity",
                "must be greater than zero",
            ));
        }
        if self.max_packet_size == Some(0) {
            return Err(ConfigError::invalid(
                "producer.source.client.max_packet_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Check that `filter` is a well-formed MQTT topic filter.
///
/// Rules:
/// - Must not be empty or contain NUL
/// - `#` must occupy a whole level and be the last level
/// - `+` must occupy a whole level
pub fn validate_topic_filter(filter: &str) -> std::result::Result<(), String> {
    if filter.is_empty() {
        return Err("must not be empty".to_string());
    }
    if filter.contains('\0') {
        return Err("must not contain NUL".to_string());
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != last) {
            return Err(format!(
                "'#' must be a whole level at the end of the filter: {}",
                filter
            ));
        }
        if level.contains('+') && *level != "+" {
            return Err(format!("'+' must be a whole level: {}", filter));
        }
    }
    Ok(())
}
