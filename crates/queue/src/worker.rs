//! Task handlers and the worker pool that runs them.
//!
//! Provides the [`TaskHandler`] trait for task implementations,
//! [`TaskRegistry`] mapping task names to handlers, and [`WorkerPool`]
//! which consumes every routed queue with bounded concurrency and applies
//! the retry policy to failed attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::TaskBroker;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::task::{TaskEnvelope, TaskError};

/// Pause after a backend error before polling the queue again.
const BACKEND_ERROR_PAUSE: Duration = Duration::from_millis(500);

// ── Handler trait ────────────────────────────────────────────────────

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one attempt of the task.
    async fn handle(&self, task: &TaskEnvelope) -> Result<(), TaskError>;
}

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ── Reports ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    RetryScheduled { next_attempt: u32, delay: Duration },
    /// No further attempts. `exhausted` is set when the retry budget ran out.
    Failed { reason: String, exhausted: bool },
}

/// Result of one attempt, published to the optional report channel.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub name: String,
    pub queue: String,
    pub attempt: u32,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn is_final(&self) -> bool {
        !matches!(self.outcome, TaskOutcome::RetryScheduled { .. })
    }
}

// ── Executor ─────────────────────────────────────────────────────────

struct Executor {
    broker: TaskBroker,
    registry: TaskRegistry,
    policy: RetryPolicy,
    reports: Option<mpsc::UnboundedSender<TaskReport>>,
}

impl Executor {
    async fn execute(&self, queue: &str, task: TaskEnvelope) {
        let start = Instant::now();
        let outcome = match self.registry.get(&task.name) {
            Some(handler) => {
                let result = handler.handle(&task).await;
                self.settle(queue, &task, result, start.elapsed())
            }
            None => {
                error!(task = %task.name, queue, "no handler registered for task");
                TaskOutcome::Failed {
                    reason: format!("unregistered task '{}'", task.name),
                    exhausted: false,
                }
            }
        };

        if let Some(ref tx) = self.reports {
            let _ = tx.send(TaskReport {
                task_id: task.id,
                name: task.name,
                queue: queue.to_string(),
                attempt: task.attempt,
                outcome,
            });
        }
    }

    fn settle(
        &self,
        queue: &str,
        task: &TaskEnvelope,
        result: Result<(), TaskError>,
        elapsed: Duration,
    ) -> TaskOutcome {
        let duration_ms = elapsed.as_millis() as u64;
        match result {
            Ok(()) => {
                info!(task = %task.name, task_id = %task.id, queue, attempt = task.attempt, duration_ms, "task succeeded");
                TaskOutcome::Succeeded
            }
            Err(TaskError::Terminal(reason)) => {
                warn!(
                    task = %task.name,
                    task_id = %task.id,
                    queue,
                    attempt = task.attempt,
                    reason = %reason,
                    "task failed terminally, not retrying"
                );
                TaskOutcome::Failed {
                    reason,
                    exhausted: false,
                }
            }
            Err(TaskError::Retryable(reason)) => match self.policy.after_failure(task.attempt) {
                RetryDecision::Retry { next_attempt, delay } => {
                    warn!(
                        task = %task.name,
                        task_id = %task.id,
                        queue,
                        attempt = task.attempt,
                        next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "task failed, retry scheduled"
                    );
                    self.broker.submit_after(task.next_attempt(), delay);
                    TaskOutcome::RetryScheduled { next_attempt, delay }
                }
                RetryDecision::GiveUp => {
                    error!(
                        task = %task.name,
                        task_id = %task.id,
                        queue,
                        attempts = task.attempt,
                        reason = %reason,
                        "task failed after exhausting retries"
                    );
                    TaskOutcome::Failed {
                        reason,
                        exhausted: true,
                    }
                }
            },
        }
    }
}

// ── WorkerPool ───────────────────────────────────────────────────────

/// Consumes named queues and runs their tasks.
///
/// Each queue gets its own consumer loop and its own concurrency limit, so a
/// queue stuck on a slow vendor never takes capacity from another queue.
pub struct WorkerPool {
    broker: TaskBroker,
    registry: TaskRegistry,
    policy: RetryPolicy,
    concurrency: usize,
    queues: Vec<String>,
    reports: Option<mpsc::UnboundedSender<TaskReport>>,
}

impl WorkerPool {
    /// Pool over every queue of the broker's routing table.
    pub fn new(broker: TaskBroker, registry: TaskRegistry) -> Self {
        let queues = broker.routing().queues();
        Self {
            broker,
            registry,
            policy: RetryPolicy::default(),
            concurrency: 4,
            queues,
            reports: None,
        }
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Concurrent executions per queue (default: 4).
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Restrict the pool to these queues.
    pub fn queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    /// Publish a [`TaskReport`] for every finished attempt.
    pub fn reports(mut self, tx: mpsc::UnboundedSender<TaskReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped), then wait
    /// for in-flight tasks to finish.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let executor = Arc::new(Executor {
            broker: self.broker,
            registry: self.registry,
            policy: self.policy,
            reports: self.reports,
        });

        info!(
            queues = ?self.queues,
            concurrency = self.concurrency,
            max_attempts = executor.policy.max_attempts,
            "worker pool starting"
        );

        let handles: Vec<_> = self
            .queues
            .into_iter()
            .map(|queue| {
                tokio::spawn(consume(
                    executor.clone(),
                    queue,
                    self.concurrency,
                    shutdown.clone(),
                ))
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "queue consumer panicked");
            }
        }
        info!("worker pool stopped");
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn consume(
    executor: Arc<Executor>,
    queue: String,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let limiter = Arc::new(Semaphore::new(concurrency));
    let backend = executor.broker.backend().clone();
    info!(queue = %queue, "queue consumer started");

    loop {
        let permit = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            permit = limiter.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let popped = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            popped = backend.pop(&queue) => popped,
        };

        match popped {
            Ok(Some(task)) => {
                let executor = executor.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    executor.execute(&queue, task).await;
                    drop(permit);
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!(queue = %queue, error = %e, "queue pop failed");
                tokio::time::sleep(BACKEND_ERROR_PAUSE).await;
            }
        }
    }

    // Wait for in-flight executions.
    let _ = limiter.acquire_many(concurrency as u32).await;
    info!(queue = %queue, "queue consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryQueue;
    use crate::routing::RoutingTable;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        calls: Arc<AtomicU32>,
        fail_first: u32,
        terminal: bool,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn handle(&self, _task: &TaskEnvelope) -> Result<(), TaskError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                if self.terminal {
                    return Err(TaskError::Terminal("no target".into()));
                }
                return Err(TaskError::Retryable("vendor down".into()));
            }
            Ok(())
        }
    }

    async fn run_single(
        handler: FlakyHandler,
    ) -> (Vec<TaskReport>, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let broker = TaskBroker::new(Arc::new(MemoryQueue::new()), RoutingTable::default());
        let mut registry = TaskRegistry::new();
        registry.register("cards.sync", Arc::new(handler));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let pool = WorkerPool::new(broker.clone(), registry)
            .retry_policy(RetryPolicy::new(5, Duration::from_millis(5)))
            .reports(tx);
        let pool_handle = tokio::spawn(pool.run(stop_rx));

        broker.enqueue("cards.sync", serde_json::json!({})).await.unwrap();

        let mut reports = Vec::new();
        loop {
            let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("report in time")
                .expect("channel open");
            let done = report.is_final();
            reports.push(report);
            if done {
                break;
            }
        }
        (reports, stop_tx, pool_handle)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let (reports, stop, handle) = run_single(FlakyHandler {
            calls: calls.clone(),
            fail_first: 2,
            terminal: false,
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].outcome, TaskOutcome::Succeeded);
        assert_eq!(reports[2].attempt, 3);
        assert_eq!(reports[0].queue, "cards");
        assert!(reports.iter().all(|r| r.task_id == reports[0].task_id));

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let (reports, stop, handle) = run_single(FlakyHandler {
            calls: calls.clone(),
            fail_first: 6,
            terminal: false,
        })
        .await;

        let last = reports.last().unwrap();
        assert_eq!(last.attempt, 5);
        assert!(matches!(last.outcome, TaskOutcome::Failed { exhausted: true, .. }));

        // No sixth attempt shows up later.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let (reports, stop, handle) = run_single(FlakyHandler {
            calls: calls.clone(),
            fail_first: 10,
            terminal: true,
        })
        .await;

        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0].outcome, TaskOutcome::Failed { exhausted: false, .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_task_fails_terminally() {
        let broker = TaskBroker::new(Arc::new(MemoryQueue::new()), RoutingTable::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(WorkerPool::new(broker.clone(), TaskRegistry::new()).reports(tx).run(stop_rx));

        broker.enqueue("tracker.unknown", serde_json::json!({})).await.unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.queue, "tracker");
        assert!(matches!(report.outcome, TaskOutcome::Failed { exhausted: false, .. }));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn registry_names_sorted() {
        let mut registry = TaskRegistry::new();
        let handler = Arc::new(FlakyHandler {
            calls: Arc::new(AtomicU32::new(0)),
            fail_first: 0,
            terminal: false,
        });
        registry.register("b", handler.clone()).register("a", handler);
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
