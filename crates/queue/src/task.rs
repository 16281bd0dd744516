//! Task envelope and handler outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// One unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Stable across retries of the same task instance.
    pub id: Uuid,
    /// Registered task name, e.g. `notifications.send_chat`.
    pub name: String,
    pub args: serde_json::Value,
    /// 1-based attempt number.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            args,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// The same task instance, one attempt later.
    pub fn next_attempt(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            args: self.args.clone(),
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }

    /// Read a required integer argument.
    pub fn arg_i64(&self, key: &str) -> Result<i64, QueueError> {
        self.args
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| QueueError::Args(format!("{}: missing integer '{key}'", self.name)))
    }
}

/// Why a task attempt did not succeed.
///
/// The runner retries `Retryable` failures under its retry policy and never
/// retries `Terminal` ones.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("terminal: {0}")]
    Terminal(String),
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_))
    }
}
