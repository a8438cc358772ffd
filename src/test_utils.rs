//! Test utilities and mock implementations.
//!
//! Deterministic stand-ins for the timer and buffer seams so the coordinator
//! can be driven step by step without a runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buffer::{Buffer, BufferId, MemoryBuffer};
use crate::message::Message;
use crate::producer::{RetryTimer, TimerId, TimerScheduler};

/// Scheduler that only records what it was asked to arm.
#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Vec<(TimerId, Duration)>,
    next_id: TimerId,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every timer armed so far, in order.
    pub fn scheduled(&self) -> &[(TimerId, Duration)] {
        &self.scheduled
    }

    pub fn last(&self) -> Option<(TimerId, Duration)> {
        self.scheduled.last().copied()
    }
}

impl TimerScheduler for RecordingScheduler {
    fn schedule(&mut self, delay: Duration) -> RetryTimer {
        self.next_id += 1;
        self.scheduled.push((self.next_id, delay));
        RetryTimer::new(self.next_id, delay, None)
    }
}

/// Memory buffer that records every dequeue request.
pub struct RecordingBuffer {
    inner: MemoryBuffer,
    requests: Mutex<Vec<usize>>,
}

impl RecordingBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBuffer::unbounded(BufferId::new("recording")),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// `max` arguments of every `dequeue_up_to` call, in order.
    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fill(&self, topics: &[&str]) {
        for topic in topics {
            self.inner.enqueue(make_message(topic));
        }
    }
}

impl Buffer for RecordingBuffer {
    fn id(&self) -> &BufferId {
        self.inner.id()
    }

    fn enqueue(&self, message: Message) {
        self.inner.enqueue(message);
    }

    fn dequeue_up_to(&self, max: usize) -> Vec<Message> {
        self.requests.lock().unwrap().push(max);
        self.inner.dequeue_up_to(max)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

pub fn make_message(topic: &str) -> Message {
    Message::new(topic, format!("payload-{}", topic))
}

pub fn topics(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.topic.clone()).collect()
}
