//! In-process notification store.
//!
//! Rows live in a mutex-guarded map. Leases are per-(notification, channel)
//! async mutexes handed out as owned guards, so a lease holder can await
//! the channel send without blocking unrelated rows or channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use adcrm_core::{Channel, NewNotification, Notification, NotificationId, Recipient, UserId};

use crate::error::StoreError;
use crate::traits::{DeliveryLease, NotificationStore, RecipientDirectory};

type Rows = Arc<Mutex<HashMap<NotificationId, Notification>>>;
type LeaseKey = (NotificationId, Channel);

#[derive(Default)]
pub struct MemoryStore {
    rows: Rows,
    next_id: AtomicI64,
    leases: Mutex<HashMap<LeaseKey, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    async fn lease_mutex(&self, key: LeaseKey) -> Arc<Mutex<()>> {
        let mut leases = self.leases.lock().await;
        // Drop entries nobody holds or waits on.
        leases.retain(|_, m| Arc::strong_count(m) > 1);
        leases.entry(key).or_default().clone()
    }

    async fn compare_and_stamp(
        &self,
        id: NotificationId,
        channel: Channel,
        at: DateTime<Utc>,
        expected_version: i64,
    ) -> Result<Notification, StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict { id });
        }
        if !row.stamp(channel, at) {
            return Err(StoreError::AlreadyDelivered { id, channel });
        }
        Ok(row.clone())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError> {
        new.payload.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let notification = Notification::from_new(id, new, Utc::now());
        self.rows.lock().await.insert(id, notification.clone());
        tracing::debug!(notification_id = id, "notification created");
        Ok(notification)
    }

    async fn get(&self, id: NotificationId) -> Result<Notification, StoreError> {
        self.rows
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn mark_delivered(
        &self,
        id: NotificationId,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        let mut retried = false;
        loop {
            let current = self.get(id).await?;
            if current.is_delivered(channel) {
                return Err(StoreError::AlreadyDelivered { id, channel });
            }
            match self.compare_and_stamp(id, channel, at, current.version).await {
                Err(StoreError::VersionConflict { .. }) if !retried => {
                    tracing::debug!(notification_id = id, %channel, "version race, retrying once");
                    retried = true;
                }
                other => return other,
            }
        }
    }

    async fn lease(
        &self,
        id: NotificationId,
        channel: Channel,
    ) -> Result<Box<dyn DeliveryLease>, StoreError> {
        let mutex = self.lease_mutex((id, channel)).await;
        let guard = mutex.lock_owned().await;
        let snapshot = self.get(id).await?;
        Ok(Box::new(MemoryLease {
            rows: self.rows.clone(),
            snapshot,
            channel,
            _guard: guard,
        }))
    }

    async fn list_for_recipient(
        &self,
        recipient: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = self.rows.lock().await;
        let mut found: Vec<Notification> = rows
            .values()
            .filter(|n| n.recipient == recipient)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit);
        Ok(found)
    }
}

struct MemoryLease {
    rows: Rows,
    snapshot: Notification,
    channel: Channel,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl DeliveryLease for MemoryLease {
    fn notification(&self) -> &Notification {
        &self.snapshot
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn mark_delivered(self: Box<Self>, at: DateTime<Utc>) -> Result<Notification, StoreError> {
        let id = self.snapshot.id;
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !row.stamp(self.channel, at) {
            return Err(StoreError::AlreadyDelivered {
                id,
                channel: self.channel,
            });
        }
        Ok(row.clone())
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Directory ─────────────────────────────────────────────────

/// Fixed user directory, for workers without a database and for tests.
///
/// With [`MemoryDirectory::bare_fallback`] an unknown id resolves to a
/// recipient without chat or email targets, so only the socket channel
/// has somewhere to deliver.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<UserId, Recipient>>,
    bare_fallback: bool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients(recipients: impl IntoIterator<Item = Recipient>) -> Self {
        Self {
            users: Mutex::new(recipients.into_iter().map(|r| (r.id, r)).collect()),
            bare_fallback: false,
        }
    }

    /// Resolve unknown ids to `Recipient::new(id)` instead of `None`.
    pub fn bare_fallback(mut self) -> Self {
        self.bare_fallback = true;
        self
    }

    pub async fn insert(&self, recipient: Recipient) {
        self.users.lock().await.insert(recipient.id, recipient);
    }
}

#[async_trait]
impl RecipientDirectory for MemoryDirectory {
    async fn lookup(&self, id: UserId) -> Result<Option<Recipient>, StoreError> {
        let found = self.users.lock().await.get(&id).cloned();
        Ok(match found {
            None if self.bare_fallback => Some(Recipient::new(id)),
            other => other,
        })
    }
}
