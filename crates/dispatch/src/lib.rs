//! Notification dispatch: per-channel delivery tasks, the trigger service
//! and the worker's HTTP surface.

pub mod api;
pub mod error;
pub mod live;
pub mod runtime;
pub mod senders;
pub mod service;
pub mod tasks;

pub use api::{build_router, AppState};
pub use error::DeliveryError;
pub use runtime::{assemble, open_store, size_pg_pool, Worker};
pub use senders::build_senders;
pub use service::{ChannelSet, NotificationService};
pub use tasks::{
    channel_for_task, delivery_registry, task_args, task_name, DeliveryOutcome, DeliveryTask,
    NOTIFICATION_ID_ARG, SEND_CHAT, SEND_EMAIL, SEND_SOCKET,
};
