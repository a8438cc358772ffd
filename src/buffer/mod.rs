//! Buffers decoupling push arrival from pull consumption.
//!
//! This module contains:
//! - `Buffer` trait: FIFO store filled by a push source, drained by the producer
//! - `BufferProvider` trait: idempotent creation and removal of buffers by identifier
//! - Implementations: in-memory queue (`MemoryBuffer`)

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::config::{BufferConfig, BufferType};
use crate::message::Message;

pub mod memory;

pub use memory::{MemoryBuffer, MemoryBufferProvider};

// ============================================================================
// Traits
// ============================================================================

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;

/// Errors that can occur while starting a buffer.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Buffer provider has been shut down")]
    AlreadyStopped,

    #[error("Buffer '{id}' unavailable: {reason}")]
    Unavailable { id: BufferId, reason: String },
}

/// Identifier of a buffer instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferId(String);

impl BufferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique identifier.
    pub fn generate() -> Self {
        Self(format!("buffer-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// FIFO message store.
///
/// Implementations must tolerate `enqueue` from the push source concurrently
/// with `dequeue_up_to` from the producer. Neither call may block waiting for
/// messages.
pub trait Buffer: Send + Sync {
    /// Identifier this buffer was started under.
    fn id(&self) -> &BufferId;

    /// Append a message at the tail.
    fn enqueue(&self, message: Message);

    /// Remove and return up to `max` messages from the head, oldest first.
    ///
    /// Returns fewer than `max` (possibly none) when fewer are buffered.
    fn dequeue_up_to(&self, max: usize) -> Vec<Message>;

    /// Number of messages currently buffered.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates and registers buffers.
#[async_trait]
pub trait BufferProvider: Send + Sync {
    /// Start the buffer registered under `id`.
    ///
    /// Idempotent: starting an id that is already running returns the
    /// existing buffer.
    async fn start(&self, id: &BufferId) -> Result<Arc<dyn Buffer>>;

    /// Whether a buffer is registered under `id`.
    fn is_running(&self, id: &BufferId) -> bool;

    /// Unregister the buffer under `id`, discarding anything still queued.
    ///
    /// Returns false if no buffer was running under `id`.
    fn stop(&self, id: &BufferId) -> bool;
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize a buffer provider based on configuration.
pub fn init_buffer_provider(config: &BufferConfig) -> Arc<dyn BufferProvider> {
    match config.buffer_type {
        BufferType::Memory => {
            info!(
                buffer_type = "memory",
                capacity = ?config.capacity,
                overflow = ?config.overflow,
                "Buffer provider initialized"
            );
            Arc::new(MemoryBufferProvider::new(config.capacity, config.overflow))
        }
    }
}
