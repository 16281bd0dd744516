//! PostgreSQL notification store.
//!
//! A lease is an open transaction holding `pg_advisory_xact_lock` on a key
//! derived from (notification id, channel). The lock is released when the
//! transaction commits or rolls back, which also covers a dropped lease.
//! Locking per channel rather than per row keeps the three channel tasks of
//! one notification independent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use adcrm_core::config::PostgresConfig;
use adcrm_core::{
    Channel, NewNotification, Notification, NotificationId, Payload, Recipient, UserId,
};

use crate::error::StoreError;
use crate::traits::{DeliveryLease, NotificationStore, RecipientDirectory};

const COLUMNS: &str = "id, recipient_id, category, level, payload, created_at, \
                       chat_sent_at, email_sent_at, socket_sent_at, version";

fn sent_at_column(channel: Channel) -> &'static str {
    match channel {
        Channel::Chat => "chat_sent_at",
        Channel::Email => "email_sent_at",
        Channel::Socket => "socket_sent_at",
    }
}

/// Advisory lock key for one channel of one notification.
fn lock_key(id: NotificationId, channel: Channel) -> i64 {
    id.wrapping_mul(4).wrapping_add(channel.index())
}

fn row_to_notification(row: &PgRow) -> Result<Notification, StoreError> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let category: String = row.try_get("category")?;
    let level: String = row.try_get("level")?;
    let payload: serde_json::Value = row.try_get("payload")?;

    Ok(Notification {
        id,
        recipient: row.try_get("recipient_id")?,
        category: category.parse().map_err(|e| corrupt(format!("{e}")))?,
        level: level.parse().map_err(|e| corrupt(format!("{e}")))?,
        payload: Payload::from_value(payload).map_err(|e| corrupt(e.to_string()))?,
        created_at: row.try_get("created_at")?,
        chat_sent_at: row.try_get("chat_sent_at")?,
        email_sent_at: row.try_get("email_sent_at")?,
        socket_sent_at: row.try_get("socket_sent_at")?,
        version: row.try_get("version")?,
    })
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the configured pool size and apply migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!("PostgreSQL connected: {}", config.host);
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations applied successfully");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn stamp_if_version(
        &self,
        id: NotificationId,
        channel: Channel,
        at: DateTime<Utc>,
        version: i64,
    ) -> Result<Option<Notification>, StoreError> {
        let column = sent_at_column(channel);
        let sql = format!(
            "UPDATE notifications SET {column} = $2, version = version + 1 \
             WHERE id = $1 AND version = $3 AND {column} IS NULL \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_notification).transpose()
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError> {
        new.payload.validate()?;
        let sql = format!(
            "INSERT INTO notifications (recipient_id, category, level, payload) \
             VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.recipient)
            .bind(new.category.as_str())
            .bind(new.level.as_str())
            .bind(new.payload.to_value())
            .fetch_one(&self.pool)
            .await?;
        let notification = row_to_notification(&row)?;
        debug!(notification_id = notification.id, "notification created");
        Ok(notification)
    }

    async fn get(&self, id: NotificationId) -> Result<Notification, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        row_to_notification(&row)
    }

    async fn mark_delivered(
        &self,
        id: NotificationId,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        for attempt in 0..2 {
            let current = self.get(id).await?;
            if current.is_delivered(channel) {
                return Err(StoreError::AlreadyDelivered { id, channel });
            }
            if let Some(updated) = self.stamp_if_version(id, channel, at, current.version).await? {
                return Ok(updated);
            }
            debug!(notification_id = id, %channel, attempt, "version race on stamp");
        }
        // Report the precise conflict if the racing writer stamped our channel.
        if self.get(id).await?.is_delivered(channel) {
            return Err(StoreError::AlreadyDelivered { id, channel });
        }
        Err(StoreError::VersionConflict { id })
    }

    async fn lease(
        &self,
        id: NotificationId,
        channel: Channel,
    ) -> Result<Box<dyn DeliveryLease>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(lock_key(id, channel))
            .execute(&mut *tx)
            .await?;

        let sql = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::NotFound(id));
        };
        let snapshot = row_to_notification(&row)?;

        Ok(Box::new(PgLease {
            tx,
            snapshot,
            channel,
        }))
    }

    async fn list_for_recipient(
        &self,
        recipient: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications WHERE recipient_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(recipient)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_notification).collect()
    }
}

struct PgLease {
    tx: Transaction<'static, Postgres>,
    snapshot: Notification,
    channel: Channel,
}

#[async_trait]
impl DeliveryLease for PgLease {
    fn notification(&self) -> &Notification {
        &self.snapshot
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn mark_delivered(self: Box<Self>, at: DateTime<Utc>) -> Result<Notification, StoreError> {
        let PgLease {
            mut tx,
            snapshot,
            channel,
        } = *self;
        let column = sent_at_column(channel);
        let sql = format!(
            "UPDATE notifications SET {column} = $2, version = version + 1 \
             WHERE id = $1 AND {column} IS NULL RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(snapshot.id)
            .bind(at)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::AlreadyDelivered {
                id: snapshot.id,
                channel,
            });
        };
        let updated = row_to_notification(&row)?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ── Directory ─────────────────────────────────────────────────

/// Reads recipients from the CRM `users` table.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgDirectory {
    async fn lookup(&self, id: UserId) -> Result<Option<Recipient>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, telegram_id::text AS chat_id, email FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Recipient, StoreError> {
            Ok(Recipient {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                chat_id: row.try_get("chat_id")?,
                email: row.try_get("email")?,
            })
        })
        .transpose()
    }
}
