//! Worker assembly shared by `dispatch-worker` and its tests.

use std::sync::Arc;

use tracing::{info, warn};

use adcrm_core::Config;
use adcrm_notify::{GroupHub, MessageTemplates, NotifyError};
use adcrm_queue::{MemoryQueue, QueueBackend, RetryPolicy, RoutingTable, TaskBroker, WorkerPool};
use adcrm_store::{
    MemoryDirectory, MemoryStore, NotificationStore, PgDirectory, PgStore, RecipientDirectory,
    StoreError,
};

use crate::api::AppState;
use crate::senders::build_senders;
use crate::service::NotificationService;
use crate::tasks::delivery_registry;

/// Connections kept free of delivery leases for HTTP requests and lookups.
pub const POOL_HEADROOM: u32 = 2;

/// Smallest pool that lets every consumer hold a lease at once.
pub fn required_pg_connections(queues: usize, concurrency: usize) -> u32 {
    let leases = queues.saturating_mul(concurrency);
    u32::try_from(leases)
        .unwrap_or(u32::MAX)
        .saturating_add(POOL_HEADROOM)
}

/// Raise `PG_MAX_CONNECTIONS` when it cannot cover the concurrent leases.
pub fn size_pg_pool(config: &mut Config, queues: usize) {
    let required = required_pg_connections(queues, config.dispatch.concurrency);
    if config.postgres.max_connections < required {
        warn!(
            configured = config.postgres.max_connections,
            required,
            queues,
            concurrency = config.dispatch.concurrency,
            "PG_MAX_CONNECTIONS below concurrent lease count, raising pool size"
        );
        config.postgres.max_connections = required;
    }
}

pub type Backends = (Arc<dyn NotificationStore>, Arc<dyn RecipientDirectory>);

/// Open PostgreSQL when configured, else the in-memory store.
///
/// The in-memory directory knows no users, so every id resolves to a bare
/// recipient: socket delivery works, chat has no target and email is skipped.
pub async fn open_store(config: &Config, force_memory: bool) -> Result<Backends, StoreError> {
    if config.postgres.is_configured() && !force_memory {
        let store = PgStore::connect(&config.postgres).await?;
        let directory: Arc<dyn RecipientDirectory> =
            Arc::new(PgDirectory::new(store.pool().clone()));
        let store: Arc<dyn NotificationStore> = Arc::new(store);
        return Ok((store, directory));
    }
    warn!("PostgreSQL not configured, using in-memory store (records are lost on exit)");
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryStore::new());
    let directory: Arc<dyn RecipientDirectory> = Arc::new(MemoryDirectory::new().bare_fallback());
    Ok((store, directory))
}

/// A wired worker: HTTP state plus the pool that consumes its queues.
pub struct Worker {
    pub state: Arc<AppState>,
    pub pool: WorkerPool,
    pub backend: Arc<dyn QueueBackend>,
}

/// Wire senders, queues, the task registry and HTTP state together.
///
/// An empty `queues` consumes every queue in the routing table.
pub fn assemble(
    config: &Config,
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn RecipientDirectory>,
    routing: RoutingTable,
    queues: &[String],
) -> Result<Worker, NotifyError> {
    let hub = Arc::new(GroupHub::default());
    let senders = build_senders(config, &MessageTemplates::default(), hub.clone())?;

    let backend: Arc<dyn QueueBackend> = Arc::new(MemoryQueue::new());
    let broker = TaskBroker::new(backend.clone(), routing);
    let registry = delivery_registry(
        store.clone(),
        directory,
        &senders,
        config.dispatch.send_timeout(),
    );

    let mut pool = WorkerPool::new(broker.clone(), registry)
        .retry_policy(RetryPolicy::new(
            config.dispatch.max_attempts,
            config.dispatch.retry_delay(),
        ))
        .concurrency(config.dispatch.concurrency);
    if !queues.is_empty() {
        pool = pool.queues(queues.to_vec());
    }
    info!(channels = ?senders.channels(), "worker assembled");

    let state = Arc::new(AppState {
        service: NotificationService::new(store, broker.clone()),
        hub,
        backend: backend.clone(),
        routing: Arc::new(broker.routing().clone()),
    });

    Ok(Worker {
        state,
        pool,
        backend,
    })
}
