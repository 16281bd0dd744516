//! Named task queues with static routing, bounded retries and a worker pool.

pub mod backend;
pub mod broker;
pub mod error;
pub mod retry;
pub mod routing;
pub mod task;
pub mod worker;

pub use backend::{MemoryQueue, QueueBackend};
pub use broker::TaskBroker;
pub use error::QueueError;
pub use retry::{RetryDecision, RetryPolicy};
pub use routing::{glob_match, RouteRule, RoutingTable, DEFAULT_QUEUE};
pub use task::{TaskEnvelope, TaskError};
pub use worker::{TaskHandler, TaskOutcome, TaskRegistry, TaskReport, WorkerPool};
