//! Store error types.

use adcrm_core::{Channel, ModelError, NotificationId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("notification not found: {0}")]
    NotFound(NotificationId),

    #[error("recipient not found: {0}")]
    RecipientNotFound(UserId),

    #[error("conflict on notification {id}: {channel} delivery already recorded")]
    AlreadyDelivered { id: NotificationId, channel: Channel },

    #[error("conflict on notification {id}: concurrent write detected")]
    VersionConflict { id: NotificationId },

    #[error("invalid notification: {0}")]
    Invalid(#[from] ModelError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: NotificationId, reason: String },
}

impl StoreError {
    /// Whether the error reports a write conflict on the row.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyDelivered { .. } | StoreError::VersionConflict { .. }
        )
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::VersionConflict { .. })
    }
}
