//! Producer task and its handles.
//!
//! `Producer::start` brings up the buffer and the push source, then spawns a
//! task that owns the `DemandCoordinator` exclusively and processes signals
//! from an unbounded mailbox one at a time.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::coordinator::{CoordinatorSnapshot, DemandCoordinator};
use super::timer::TokioScheduler;
use super::{Signal, StartupError};
use crate::buffer::{Buffer, BufferId, BufferProvider};
use crate::config::ProducerConfig;
use crate::message::Message;
use crate::source::{SourceClient, SourceHandle, Subscription};

/// Entry point for starting producers.
pub struct Producer;

impl Producer {
    /// Start a producer from configuration.
    ///
    /// Validates the configuration, starts the buffer, then starts the push
    /// source bound to it. Any failure aborts startup with its cause and no
    /// producer task is spawned. A buffer created by this call is removed
    /// again if the source fails to start.
    #[tracing::instrument(name = "producer.start", skip_all, fields(topic = %config.source.topic))]
    pub async fn start(
        config: &ProducerConfig,
        buffers: &dyn BufferProvider,
        source: &dyn SourceClient,
    ) -> Result<(ProducerHandle, Deliveries), StartupError> {
        config.validate()?;

        let buffer_id = config
            .buffer
            .name
            .as_deref()
            .map(BufferId::new)
            .unwrap_or_else(BufferId::generate);

        let reused = buffers.is_running(&buffer_id);
        let buffer = buffers
            .start(&buffer_id)
            .await
            .map_err(|source| StartupError::Buffer {
                id: buffer_id.clone(),
                source,
            })?;

        let started = source
            .start(
                buffer.clone(),
                &Subscription::from(&config.source),
                &config.source.connection,
                &config.source.client,
            )
            .await;
        let source_handle = match started {
            Ok(handle) => handle,
            Err(source) => {
                // Only release a buffer this call created; a running one may hold a backlog.
                if !reused && buffers.stop(&buffer_id) {
                    debug!(buffer_id = %buffer_id, "Released buffer after failed startup");
                }
                return Err(StartupError::Source {
                    id: buffer_id,
                    source,
                });
            }
        };

        Ok(spawn(buffer, config.retry_interval(), Some(source_handle)))
    }

    /// Run a producer over a buffer that something else fills.
    pub fn from_buffer(buffer: Arc<dyn Buffer>, retry_interval: Duration) -> (ProducerHandle, Deliveries) {
        spawn(buffer, retry_interval, None)
    }
}

fn spawn(
    buffer: Arc<dyn Buffer>,
    retry_interval: Duration,
    source: Option<SourceHandle>,
) -> (ProducerHandle, Deliveries) {
    let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let buffer_id = buffer.id().clone();
    let coordinator = DemandCoordinator::new(buffer, retry_interval);
    let scheduler = TokioScheduler::new(mailbox_tx.downgrade());
    let task = tokio::spawn(run(coordinator, scheduler, mailbox_rx, outbox_tx, source));

    info!(
        buffer_id = %buffer_id,
        retry_interval_ms = %retry_interval.as_millis(),
        "Producer started"
    );

    let handle = ProducerHandle {
        mailbox: mailbox_tx,
        buffer_id,
        task,
    };
    (handle, Deliveries { receiver: outbox_rx })
}

async fn run(
    mut coordinator: DemandCoordinator,
    mut scheduler: TokioScheduler,
    mut mailbox: mpsc::UnboundedReceiver<Signal>,
    outbox: mpsc::UnboundedSender<Vec<Message>>,
    source: Option<SourceHandle>,
) {
    while let Some(signal) = mailbox.recv().await {
        let batch = match signal {
            Signal::Demand(amount) => coordinator.on_demand(amount, &mut scheduler),
            Signal::TimerFired(id) => coordinator.on_timer_fired(id, &mut scheduler),
            Signal::Snapshot(reply) => {
                let _ = reply.send(coordinator.snapshot());
                continue;
            }
            Signal::Shutdown => break,
        };

        if batch.is_empty() {
            continue;
        }

        let count = batch.len();
        if outbox.send(batch).is_err() {
            warn!(
                buffer_id = %coordinator.buffer_id(),
                lost = count,
                "Consumer dropped deliveries, stopping producer"
            );
            break;
        }
    }

    coordinator.shutdown();
    if let Some(source) = source {
        source.stop().await;
    }
    info!(
        buffer_id = %coordinator.buffer_id(),
        pending_demand = coordinator.pending_demand(),
        "Producer stopped"
    );
}

/// Control side of a running producer.
///
/// Dropping the handle stops the producer task, which stops the push source.
pub struct ProducerHandle {
    mailbox: mpsc::UnboundedSender<Signal>,
    buffer_id: BufferId,
    task: JoinHandle<()>,
}

impl ProducerHandle {
    /// Ask for `amount` more messages.
    ///
    /// Returns false if the producer has stopped. Zero is accepted and ignored.
    pub fn demand(&self, amount: u64) -> bool {
        let accepted = self.mailbox.send(Signal::Demand(amount)).is_ok();
        if !accepted {
            debug!(buffer_id = %self.buffer_id, amount, "Demand after producer stopped");
        }
        accepted
    }

    /// Current coordinator state, or `None` if the producer has stopped.
    ///
    /// Reflects every signal sent before this call.
    pub async fn snapshot(&self) -> Option<CoordinatorSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mailbox.send(Signal::Snapshot(reply_tx)).ok()?;
        reply_rx.await.ok()
    }

    /// Identifier of the buffer this producer drains.
    pub fn buffer_id(&self) -> &BufferId {
        &self.buffer_id
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the producer and wait for its task to finish.
    ///
    /// Cancels the outstanding retry timer and stops the push source.
    /// Messages still in the buffer stay there.
    pub async fn shutdown(self) {
        let _ = self.mailbox.send(Signal::Shutdown);
        if let Err(e) = self.task.await {
            warn!(buffer_id = %self.buffer_id, error = %e, "Producer task ended abnormally");
        }
    }
}

/// Consumer side of a running producer: batches in FIFO order.
///
/// Dropping it stops the producer and its push source at the next delivery.
/// That batch has already left the buffer and is discarded; messages still
/// buffered stay there.
pub struct Deliveries {
    receiver: mpsc::UnboundedReceiver<Vec<Message>>,
}

impl Deliveries {
    /// Wait for the next batch. `None` once the producer has stopped.
    pub async fn recv(&mut self) -> Option<Vec<Message>> {
        self.receiver.recv().await
    }

    /// Take a batch that has already been delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<Message>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Deliveries {
    type Item = Vec<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests;
