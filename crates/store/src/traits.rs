//! Store and directory traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use adcrm_core::{Channel, NewNotification, Notification, NotificationId, Recipient, UserId};

use crate::error::StoreError;

/// Durable home of notification records.
///
/// Implementations must guarantee that a channel timestamp is written at
/// most once, whether it goes through [`NotificationStore::mark_delivered`]
/// or through a [`DeliveryLease`].
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Validate and persist a new notification.
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError>;

    async fn get(&self, id: NotificationId) -> Result<Notification, StoreError>;

    /// Stamp `channel` on the notification without holding a lease.
    ///
    /// Uses an optimistic version check and retries once on a lost race.
    /// Fails with [`StoreError::AlreadyDelivered`] when the channel is
    /// already stamped.
    async fn mark_delivered(
        &self,
        id: NotificationId,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> Result<Notification, StoreError>;

    /// Acquire the exclusive lease on one channel of one notification.
    ///
    /// Waits while another holder has the lease. Leases on different
    /// channels of the same notification never block each other.
    async fn lease(
        &self,
        id: NotificationId,
        channel: Channel,
    ) -> Result<Box<dyn DeliveryLease>, StoreError>;

    /// Most recent notifications of a recipient, newest first.
    async fn list_for_recipient(
        &self,
        recipient: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError>;
}

/// Scoped exclusive right to stamp one channel of one notification.
///
/// The snapshot returned by [`DeliveryLease::notification`] is read after
/// the lease was acquired, so a set timestamp there is authoritative.
/// Dropping the lease without calling [`DeliveryLease::mark_delivered`]
/// leaves the record unchanged.
#[async_trait]
pub trait DeliveryLease: Send {
    fn notification(&self) -> &Notification;

    fn channel(&self) -> Channel;

    /// Write the timestamp and release the lease.
    async fn mark_delivered(self: Box<Self>, at: DateTime<Utc>) -> Result<Notification, StoreError>;

    /// Release without writing.
    async fn release(self: Box<Self>) -> Result<(), StoreError>;
}

/// Read access to the user directory owned by the CRM data layer.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn lookup(&self, id: UserId) -> Result<Option<Recipient>, StoreError>;
}
