//! Demand-driven producer.
//!
//! Bridges a push source into a pull-based consumer. The consumer asks for
//! messages with `ProducerHandle::demand`; the producer answers from the
//! buffer, never delivering more than has been asked for.
//!
//! ## Architecture
//! ```text
//! [broker] --push--> [SourceClient] --enqueue--> [Buffer]
//!                                                   |
//!                                        dequeue_up_to(demand)
//!                                                   |
//! [consumer] --demand--> [producer task: DemandCoordinator] --batches--> [Deliveries]
//!                              ^              |
//!                              +--TimerFired--+ (retry timer)
//! ```
//!
//! All signals for one producer are processed by a single task in arrival
//! order, so drains never overlap.

use tokio::sync::oneshot;

use crate::buffer::{BufferError, BufferId};
use crate::config::ConfigError;
use crate::source::SourceError;

mod coordinator;
mod runtime;
mod timer;

pub use coordinator::{
    CoordinatorSnapshot, DemandCoordinator, Rearm, RetryTimer, TimerId, TimerScheduler,
};
pub use runtime::{Deliveries, Producer, ProducerHandle};

/// Errors that abort producer startup. Never retried here.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Buffer '{id}' failed to start: {source}")]
    Buffer {
        id: BufferId,
        #[source]
        source: BufferError,
    },

    #[error("Source client for buffer '{id}' failed to start: {source}")]
    Source {
        id: BufferId,
        #[source]
        source: SourceError,
    },
}

/// Messages processed by the producer task.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Consumer asks for this many more messages.
    Demand(u64),
    /// Retry timer with this id elapsed.
    TimerFired(TimerId),
    /// Report current state.
    Snapshot(oneshot::Sender<CoordinatorSnapshot>),
    /// Stop processing and cancel the outstanding timer.
    Shutdown,
}
