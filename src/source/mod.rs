//! Push sources that feed buffers.
//!
//! This module contains:
//! - `SourceClient` trait: establishes a push source bound to a buffer
//! - `SourceHandle`: owns the background task delivering into the buffer
//! - Implementations: MQTT (`rumqttc`), Mock

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::Buffer;
use crate::config::{ClientOptions, ConnectionConfig, SourceConfig, SourceType};
use crate::message::QualityOfService;

pub mod mock;
pub mod mqtt;

pub use mock::MockSourceClient;
pub use mqtt::MqttSourceClient;

// ============================================================================
// Traits
// ============================================================================

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors that can occur while establishing a push source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Timed out after {0:?} waiting for the broker")]
    Timeout(Duration),

    #[error("Invalid client options: {0}")]
    InvalidOptions(String),
}

/// What the push source subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Topic filter.
    pub topic: String,
    /// Requested delivery level.
    pub qos: QualityOfService,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QualityOfService) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

impl From<&SourceConfig> for Subscription {
    fn from(config: &SourceConfig) -> Self {
        Self::new(config.topic.clone(), config.qos)
    }
}

/// Longest wait for the broker DISCONNECT to go out before the task is aborted.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Running push source.
///
/// Dropping the handle leaves the source running; call `stop()` to end it.
pub struct SourceHandle {
    task: JoinHandle<()>,
    client: Option<AsyncClient>,
}

impl SourceHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task, client: None }
    }

    /// Handle for a task driving an MQTT connection owned by `client`.
    ///
    /// `stop()` sends DISCONNECT through the client before aborting, so the
    /// broker ends a persistent session instead of queueing for it.
    pub fn with_client(task: JoinHandle<()>, client: AsyncClient) -> Self {
        Self {
            task,
            client: Some(client),
        }
    }

    /// Whether the background task is still alive.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering into the buffer.
    ///
    /// Requests a broker disconnect when there is a connection, waits up to
    /// `DISCONNECT_TIMEOUT` for the task to end on its own, then aborts it.
    pub async fn stop(mut self) {
        if let Some(client) = &self.client {
            match client.try_disconnect() {
                Ok(()) => {
                    if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.task)
                        .await
                        .is_ok()
                    {
                        return;
                    }
                    warn!("Broker disconnect timed out, aborting source");
                }
                Err(e) => debug!(error = %e, "Could not request broker disconnect"),
            }
        }
        self.task.abort();
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("running", &self.is_running())
            .field("connected", &self.client.is_some())
            .finish()
    }
}

/// Establishes a push source that delivers into a buffer.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Connect, subscribe, and start delivering into `buffer`.
    ///
    /// Returns once the source is ready. Failures are final; callers must
    /// not retry with the same configuration.
    async fn start(
        &self,
        buffer: Arc<dyn Buffer>,
        subscription: &Subscription,
        connection: &ConnectionConfig,
        options: &ClientOptions,
    ) -> Result<SourceHandle>;
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize a source client based on configuration.
pub fn init_source_client(config: &SourceConfig) -> Arc<dyn SourceClient> {
    match config.source_type {
        SourceType::Mqtt => {
            info!(
                source_type = "mqtt",
                host = %config.connection.host,
                port = config.connection.port,
                "Source client initialized"
            );
            Arc::new(MqttSourceClient::new())
        }
    }
}
