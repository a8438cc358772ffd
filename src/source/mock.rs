//! Mock source client for testing.
//!
//! Records each start call and exposes the bound buffer, so tests can push
//! messages exactly where a broker would.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task::AbortHandle;

use super::{Result, SourceClient, SourceError, SourceHandle, Subscription};
use crate::buffer::Buffer;
use crate::config::{ClientOptions, ConnectionConfig};
use crate::message::Message;

#[derive(Default)]
struct MockState {
    started: Vec<Subscription>,
    buffer: Option<Arc<dyn Buffer>>,
    task: Option<AbortHandle>,
    fail_with: Option<String>,
}

/// Mock source client for testing.
#[derive(Default, Clone)]
pub struct MockSourceClient {
    state: Arc<Mutex<MockState>>,
}

impl MockSourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next start calls fail with a connection error.
    pub fn set_fail_on_start(&self, reason: impl Into<String>) {
        self.state().fail_with = Some(reason.into());
    }

    /// Subscriptions passed to successful start calls, in order.
    pub fn started(&self) -> Vec<Subscription> {
        self.state().started.clone()
    }

    /// Whether the most recently started source is still running.
    pub fn is_running(&self) -> bool {
        self.state()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Push a message into the bound buffer, as the broker would.
    ///
    /// Returns false unless a started source is still running.
    pub fn push(&self, message: Message) -> bool {
        if !self.is_running() {
            return false;
        }
        match &self.state().buffer {
            Some(buffer) => {
                buffer.enqueue(message);
                true
            }
            None => false,
        }
    }

    /// Buffer bound by the most recent successful start.
    pub fn buffer(&self) -> Option<Arc<dyn Buffer>> {
        self.state().buffer.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SourceClient for MockSourceClient {
    async fn start(
        &self,
        buffer: Arc<dyn Buffer>,
        subscription: &Subscription,
        _connection: &ConnectionConfig,
        _options: &ClientOptions,
    ) -> Result<SourceHandle> {
        let mut state = self.state();
        if let Some(reason) = &state.fail_with {
            return Err(SourceError::Connection(reason.clone()));
        }
        let task = tokio::spawn(futures::future::pending::<()>());
        state.started.push(subscription.clone());
        state.buffer = Some(buffer);
        state.task = Some(task.abort_handle());
        Ok(SourceHandle::new(task))
    }
}
