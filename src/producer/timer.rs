//! Retry timers on the tokio runtime.
//!
//! Each armed timer is a spawned task that sleeps, then posts
//! `Signal::TimerFired` to the producer's mailbox. Timers hold only a weak
//! reference to the mailbox, so a fire after the producer has stopped is
//! dropped silently.

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::trace;

use super::coordinator::{RetryTimer, TimerId, TimerScheduler};
use super::Signal;

/// Schedules retry timers as tokio tasks.
pub(crate) struct TokioScheduler {
    mailbox: WeakUnboundedSender<Signal>,
    next_id: TimerId,
}

impl TokioScheduler {
    pub(crate) fn new(mailbox: WeakUnboundedSender<Signal>) -> Self {
        Self {
            mailbox,
            next_id: 0,
        }
    }
}

impl TimerScheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> RetryTimer {
        self.next_id += 1;
        let id = self.next_id;
        let mailbox = self.mailbox.clone();

        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match mailbox.upgrade() {
                Some(sender) => {
                    let _ = sender.send(Signal::TimerFired(id));
                }
                None => trace!(timer_id = id, "Producer gone, dropping timer fire"),
            }
        });

        RetryTimer::new(id, delay, Some(task.abort_handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx.downgrade());

        let started = tokio::time::Instant::now();
        let timer = scheduler.schedule(Duration::from_secs(5));

        match rx.recv().await {
            Some(Signal::TimerFired(id)) => assert_eq!(id, timer.id()),
            _ => panic!("expected timer fire"),
        }
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_without_waiting() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx.downgrade());

        let started = tokio::time::Instant::now();
        scheduler.schedule(Duration::ZERO);

        assert!(matches!(rx.recv().await, Some(Signal::TimerFired(1))));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx.downgrade());

        scheduler.schedule(Duration::from_secs(1)).cancel();
        let second = scheduler.schedule(Duration::from_secs(2));

        match rx.recv().await {
            Some(Signal::TimerFired(id)) => assert_eq!(id, second.id()),
            _ => panic!("expected timer fire"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_after_mailbox_dropped_is_noop() {
        let (tx, rx) = mpsc::unbounded_channel::<Signal>();
        let mut scheduler = TokioScheduler::new(tx.downgrade());
        drop(rx);
        drop(tx);

        let timer = scheduler.schedule(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Reaching here without a panic is the assertion.
        timer.cancel();
    }
}
