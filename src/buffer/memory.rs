//! In-memory buffer.
//!
//! A mutex-guarded `VecDeque`. Enqueue and dequeue each hold the lock for a
//! single queue operation, so the push source and the producer never wait on
//! each other for long.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Buffer, BufferError, BufferId, BufferProvider, Result};
use crate::config::OverflowPolicy;
use crate::message::Message;

/// In-memory FIFO buffer with optional capacity.
pub struct MemoryBuffer {
    id: BufferId,
    queue: Mutex<VecDeque<Message>>,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
    dropped: AtomicU64,
}

impl MemoryBuffer {
    /// Create an unbounded buffer.
    pub fn unbounded(id: BufferId) -> Self {
        Self::new(id, None, OverflowPolicy::default())
    }

    /// Create a buffer holding at most `capacity` messages.
    pub fn bounded(id: BufferId, capacity: usize, overflow: OverflowPolicy) -> Self {
        Self::new(id, Some(capacity), overflow)
    }

    fn new(id: BufferId, capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            capacity,
            overflow,
            dropped: AtomicU64::new(0),
        }
    }

    /// Messages discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_drop(&self, topic: &str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            buffer_id = %self.id,
            topic = %topic,
            policy = ?self.overflow,
            dropped_total = total,
            "Buffer full, dropped message"
        );
    }
}

impl Buffer for MemoryBuffer {
    fn id(&self) -> &BufferId {
        &self.id
    }

    fn enqueue(&self, message: Message) {
        let mut queue = self.queue();
        match self.capacity {
            Some(capacity) if queue.len() >= capacity => match self.overflow {
                OverflowPolicy::DropOldest => {
                    if let Some(evicted) = queue.pop_front() {
                        self.record_drop(&evicted.topic);
                    }
                    queue.push_back(message);
                }
                OverflowPolicy::DropNewest => self.record_drop(&message.topic),
            },
            _ => queue.push_back(message),
        }
    }

    fn dequeue_up_to(&self, max: usize) -> Vec<Message> {
        let mut queue = self.queue();
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    fn len(&self) -> usize {
        self.queue().len()
    }
}

/// Registry of named in-memory buffers.
///
/// All buffers started through one provider share its capacity and overflow
/// settings.
pub struct MemoryBufferProvider {
    capacity: Option<usize>,
    overflow: OverflowPolicy,
    buffers: Mutex<HashMap<BufferId, Arc<MemoryBuffer>>>,
    closed: AtomicBool,
}

impl MemoryBufferProvider {
    pub fn new(capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            capacity,
            overflow,
            buffers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, OverflowPolicy::default())
    }

    /// Find a running buffer by identifier.
    pub fn lookup(&self, id: &BufferId) -> Option<Arc<MemoryBuffer>> {
        self.buffers().get(id).cloned()
    }

    /// Refuse further starts and drop every registered buffer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.buffers().clear();
        info!("Buffer provider closed");
    }

    /// Number of running buffers (for testing/debugging)
    pub fn buffer_count(&self) -> usize {
        self.buffers().len()
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<BufferId, Arc<MemoryBuffer>>> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryBufferProvider {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl BufferProvider for MemoryBufferProvider {
    async fn start(&self, id: &BufferId) -> Result<Arc<dyn Buffer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BufferError::AlreadyStopped);
        }

        let mut buffers = self.buffers();
        if let Some(existing) = buffers.get(id) {
            debug!(buffer_id = %id, "Reusing running buffer");
            let buffer: Arc<dyn Buffer> = existing.clone();
            return Ok(buffer);
        }

        let buffer = Arc::new(MemoryBuffer::new(id.clone(), self.capacity, self.overflow));
        buffers.insert(id.clone(), buffer.clone());
        info!(buffer_id = %id, capacity = ?self.capacity, "Buffer started");
        Ok(buffer)
    }

    fn is_running(&self, id: &BufferId) -> bool {
        self.buffers().contains_key(id)
    }

    fn stop(&self, id: &BufferId) -> bool {
        let Some(buffer) = self.buffers().remove(id) else {
            return false;
        };
        info!(buffer_id = %id, discarded = buffer.len(), "Buffer stopped");
        true
    }
}
