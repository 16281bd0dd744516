//! Queue backend trait and the in-process implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::QueueError;
use crate::task::TaskEnvelope;

/// Trait for named-queue backends.
///
/// Implementations handle the specifics of storing and handing out tasks for
/// a particular provider. Queues are created on first use.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append a task to the named queue.
    async fn push(&self, queue: &str, task: TaskEnvelope) -> Result<(), QueueError>;

    /// Take the next task, waiting until one is available.
    ///
    /// Returns `None` once the backend is closed and the queue is drained.
    /// Must be cancel-safe: dropping the future never loses a task.
    async fn pop(&self, queue: &str) -> Result<Option<TaskEnvelope>, QueueError>;

    /// Number of tasks waiting in the named queue.
    async fn depth(&self, queue: &str) -> Result<usize, QueueError>;

    /// Stop accepting tasks and wake all waiting consumers.
    async fn close(&self);
}

#[derive(Default)]
struct Slot {
    items: Mutex<VecDeque<TaskEnvelope>>,
    notify: Notify,
}

/// In-process FIFO queues.
#[derive(Default)]
pub struct MemoryQueue {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, queue: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(queue.to_string()).or_default().clone()
    }

    fn take(slot: &Slot) -> Option<TaskEnvelope> {
        slot.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(&self, queue: &str, task: TaskEnvelope) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(queue.to_string()));
        }
        let slot = self.slot(queue);
        slot.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
        slot.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<TaskEnvelope>, QueueError> {
        let slot = self.slot(queue);
        loop {
            let notified = slot.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent push cannot be missed.
            notified.as_mut().enable();

            if let Some(task) = Self::take(&slot) {
                return Ok(Some(task));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let slot = self.slot(queue);
        let len = slot.items.lock().unwrap_or_else(PoisonError::into_inner).len();
        Ok(len)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.values() {
            slot.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(name: &str) -> TaskEnvelope {
        TaskEnvelope::new(name, serde_json::json!({}))
    }

    #[tokio::test]
    async fn fifo_per_queue() {
        let q = MemoryQueue::new();
        q.push("a", task("first")).await.unwrap();
        q.push("b", task("other")).await.unwrap();
        q.push("a", task("second")).await.unwrap();

        assert_eq!(q.depth("a").await.unwrap(), 2);
        assert_eq!(q.pop("a").await.unwrap().unwrap().name, "first");
        assert_eq!(q.pop("a").await.unwrap().unwrap().name, "second");
        assert_eq!(q.pop("b").await.unwrap().unwrap().name, "other");
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let q = Arc::new(MemoryQueue::new());
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop("a").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push("a", task("late")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().name, "late");
    }

    #[tokio::test]
    async fn close_wakes_waiters_and_rejects_pushes() {
        let q = Arc::new(MemoryQueue::new());
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop("a").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close().await;

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(got.is_none());
        assert!(matches!(q.push("a", task("x")).await, Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn closed_queue_drains_before_ending() {
        let q = MemoryQueue::new();
        q.push("a", task("pending")).await.unwrap();
        q.close().await;
        assert_eq!(q.pop("a").await.unwrap().unwrap().name, "pending");
        assert!(q.pop("a").await.unwrap().is_none());
    }
}
