//! Demand coordinator: the producer's state machine.
//!
//! Tracks how many messages the consumer is owed and drains the buffer
//! against that demand. After every drain it decides whether to re-check
//! the buffer, and when:
//!
//! | Drain result                 | Next check                 |
//! |------------------------------|----------------------------|
//! | nothing dequeued             | after the retry interval   |
//! | demand fully satisfied       | none until new demand      |
//! | some dequeued, demand left   | immediately (zero delay)   |
//!
//! At most one retry timer is outstanding. While it is, neither demand nor
//! anything else triggers a drain; the timer fire does.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::buffer::{Buffer, BufferId};
use crate::message::Message;

/// Identifies one armed retry timer.
pub type TimerId = u64;

/// Handle to an armed retry timer.
#[derive(Debug)]
pub struct RetryTimer {
    id: TimerId,
    delay: Duration,
    task: Option<AbortHandle>,
}

impl RetryTimer {
    pub fn new(id: TimerId, delay: Duration, task: Option<AbortHandle>) -> Self {
        Self { id, delay, task }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Delay the timer was armed with.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Stop the timer from firing, if the host allows it.
    pub fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Arms retry timers.
///
/// A timer armed with id `n` must eventually call back into
/// `DemandCoordinator::on_timer_fired(n, ..)`, unless cancelled.
pub trait TimerScheduler {
    fn schedule(&mut self, delay: Duration) -> RetryTimer;
}

/// What the coordinator does after a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Buffer had nothing; check again after the retry interval.
    Backoff,
    /// Partial delivery; check again with zero delay.
    Immediate,
    /// Demand satisfied; wait for more demand.
    Idle,
}

impl Rearm {
    /// Pick the next step from a drain outcome. First matching rule wins.
    pub fn decide(dequeued: usize, remaining_demand: u64) -> Self {
        if dequeued == 0 {
            Rearm::Backoff
        } else if remaining_demand == 0 {
            Rearm::Idle
        } else {
            Rearm::Immediate
        }
    }
}

/// Point-in-time view of coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub pending_demand: u64,
    /// Delay of the outstanding retry timer, if one is armed.
    pub retry_delay: Option<Duration>,
}

impl CoordinatorSnapshot {
    pub fn timer_armed(&self) -> bool {
        self.retry_delay.is_some()
    }
}

/// Converts consumer demand plus buffer availability into deliveries.
pub struct DemandCoordinator {
    pending_demand: u64,
    retry_timer: Option<RetryTimer>,
    retry_interval: Duration,
    buffer: Arc<dyn Buffer>,
}

impl DemandCoordinator {
    pub fn new(buffer: Arc<dyn Buffer>, retry_interval: Duration) -> Self {
        Self {
            pending_demand: 0,
            retry_timer: None,
            retry_interval,
            buffer,
        }
    }

    pub fn pending_demand(&self) -> u64 {
        self.pending_demand
    }

    pub fn retry_timer(&self) -> Option<&RetryTimer> {
        self.retry_timer.as_ref()
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn buffer_id(&self) -> &BufferId {
        self.buffer.id()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            pending_demand: self.pending_demand,
            retry_delay: self.retry_timer.as_ref().map(RetryTimer::delay),
        }
    }

    /// Add `amount` to the outstanding demand and try to satisfy it.
    ///
    /// Returns the messages to deliver, oldest first. A zero amount changes
    /// nothing.
    pub fn on_demand(&mut self, amount: u64, scheduler: &mut impl TimerScheduler) -> Vec<Message> {
        if amount == 0 {
            debug!(buffer_id = %self.buffer.id(), "Ignoring zero demand");
            return Vec::new();
        }

        self.pending_demand = self.pending_demand.saturating_add(amount);
        trace!(
            buffer_id = %self.buffer.id(),
            amount,
            pending_demand = self.pending_demand,
            "Demand received"
        );
        self.drain(scheduler)
    }

    /// Handle the fire of retry timer `id`.
    ///
    /// A fire with no timer outstanding is treated as a fresh drain attempt.
    /// A fire from some other timer while one is outstanding is not ours and
    /// is ignored.
    pub fn on_timer_fired(&mut self, id: TimerId, scheduler: &mut impl TimerScheduler) -> Vec<Message> {
        if let Some(current) = &self.retry_timer {
            if current.id() != id {
                debug!(
                    buffer_id = %self.buffer.id(),
                    fired = id,
                    outstanding = current.id(),
                    "Ignoring unrecognized timer"
                );
                return Vec::new();
            }
        }

        self.retry_timer = None;
        self.drain(scheduler)
    }

    /// Cancel the outstanding timer, if any.
    pub fn shutdown(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
    }

    fn drain(&mut self, scheduler: &mut impl TimerScheduler) -> Vec<Message> {
        if self.retry_timer.is_some() || self.pending_demand == 0 {
            return Vec::new();
        }

        let requested = usize::try_from(self.pending_demand).unwrap_or(usize::MAX);
        let dequeued = self.buffer.dequeue_up_to(requested);
        debug_assert!(dequeued.len() <= requested, "buffer returned more than requested");

        let remaining_demand = self.pending_demand.saturating_sub(dequeued.len() as u64);
        let rearm = Rearm::decide(dequeued.len(), remaining_demand);

        self.retry_timer = match rearm {
            Rearm::Backoff => Some(scheduler.schedule(self.retry_interval)),
            Rearm::Immediate => Some(scheduler.schedule(Duration::ZERO)),
            Rearm::Idle => None,
        };
        self.pending_demand = remaining_demand;

        debug!(
            buffer_id = %self.buffer.id(),
            delivered = dequeued.len(),
            pending_demand = remaining_demand,
            rearm = ?rearm,
            "Drained buffer"
        );
        dequeued
    }
}
