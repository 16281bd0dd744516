//! Notification persistence for the dispatch layer.
//!
//! This crate provides:
//! - `NotificationStore` trait with create/get/stamp operations
//! - `DeliveryLease`, a scoped exclusive lease on one channel of one notification
//! - In-memory and PostgreSQL implementations
//! - `RecipientDirectory` lookups for delivery targets

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use memory::{MemoryDirectory, MemoryStore};
pub use postgres::{PgDirectory, PgStore};
pub use traits::{DeliveryLease, NotificationStore, RecipientDirectory};
