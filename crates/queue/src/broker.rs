//! Routes tasks onto named queues.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::QueueBackend;
use crate::error::QueueError;
use crate::routing::RoutingTable;
use crate::task::TaskEnvelope;

/// Front door for producers: resolves the queue for a task name and pushes.
#[derive(Clone)]
pub struct TaskBroker {
    backend: Arc<dyn QueueBackend>,
    routing: Arc<RoutingTable>,
}

impl TaskBroker {
    pub fn new(backend: Arc<dyn QueueBackend>, routing: RoutingTable) -> Self {
        Self {
            backend,
            routing: Arc::new(routing),
        }
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Create and enqueue a first attempt of `name`.
    pub async fn enqueue(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<TaskEnvelope, QueueError> {
        let task = TaskEnvelope::new(name, args);
        self.submit(task.clone()).await?;
        Ok(task)
    }

    /// Push an existing envelope onto its routed queue.
    pub async fn submit(&self, task: TaskEnvelope) -> Result<(), QueueError> {
        let queue = self.routing.resolve(&task.name).to_string();
        debug!(
            task = %task.name,
            task_id = %task.id,
            attempt = task.attempt,
            queue = %queue,
            "task enqueued"
        );
        self.backend.push(&queue, task).await
    }

    /// Submit `task` after `delay` without holding up the caller.
    pub fn submit_after(&self, task: TaskEnvelope, delay: Duration) -> tokio::task::JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let name = task.name.clone();
            let task_id = task.id;
            if let Err(e) = broker.submit(task).await {
                warn!(task = %name, %task_id, error = %e, "failed to enqueue retry");
            }
        })
    }
}
