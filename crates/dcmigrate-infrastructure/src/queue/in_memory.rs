//! Process-local queue backend.

use async_trait::async_trait;
use dcmigrate_core::queue::{QueueError, QueueLengthPoller, validate_queue_name};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Queues held in memory.
///
/// Answers length lookups the way the managed service does: unknown queues
/// report `None`. Scripted failures are returned, in order, before any
/// further lookup succeeds.
#[derive(Default)]
pub struct InMemoryQueueBackend {
    queues: Mutex<HashMap<String, u64>>,
    scripted_failures: Mutex<VecDeque<QueueError>>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue. Existing queues are left as they are.
    pub fn provision(&self, queue_name: &str) {
        self.lock_queues().entry(queue_name.to_string()).or_insert(0);
    }

    pub fn enqueue(&self, queue_name: &str, messages: u64) {
        *self.lock_queues().entry(queue_name.to_string()).or_insert(0) += messages;
    }

    /// Removes up to `messages` from the queue and returns how many were
    /// actually removed.
    pub fn acknowledge(&self, queue_name: &str, messages: u64) -> u64 {
        let mut queues = self.lock_queues();
        match queues.get_mut(queue_name) {
            Some(length) => {
                let removed = messages.min(*length);
                *length -= removed;
                removed
            }
            None => 0,
        }
    }

    pub fn set_length(&self, queue_name: &str, length: u64) {
        self.lock_queues().insert(queue_name.to_string(), length);
    }

    /// Makes the next lookup fail with `error`.
    pub fn fail_next(&self, error: QueueError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueLengthPoller for InMemoryQueueBackend {
    async fn queue_length(&self, queue_name: &str) -> Result<Option<u64>, QueueError> {
        validate_queue_name(queue_name)?;
        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }
        Ok(self.lock_queues().get(queue_name).copied())
    }
}
