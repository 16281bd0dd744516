//! Delivery error classification.

use adcrm_core::{DeliveryState, FailureKind};
use adcrm_notify::NotifyError;
use adcrm_queue::TaskError;
use adcrm_store::StoreError;
use thiserror::Error;

/// Outcome of a failed delivery attempt, as seen by the task runner.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("terminal: {0}")]
    Terminal(String),
}

impl DeliveryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeliveryError::Retryable(_) => FailureKind::Retryable,
            DeliveryError::Terminal(_) => FailureKind::Terminal,
        }
    }

    pub fn state(&self) -> DeliveryState {
        DeliveryState::Failed(self.kind())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryError::Terminal(_))
    }
}

impl From<NotifyError> for DeliveryError {
    fn from(e: NotifyError) -> Self {
        if e.is_terminal() {
            DeliveryError::Terminal(e.to_string())
        } else {
            DeliveryError::Retryable(e.to_string())
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            DeliveryError::Retryable(e.to_string())
        } else {
            DeliveryError::Terminal(e.to_string())
        }
    }
}

impl From<DeliveryError> for TaskError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::Retryable(reason) => TaskError::Retryable(reason),
            DeliveryError::Terminal(reason) => TaskError::Terminal(reason),
        }
    }
}
