//! Offline cache and sync coordinator.
//!
//! The [`SyncCoordinator`] owns the API handle, the local store and the
//! clock, hands out typed [`CachedResource`]s, and replays the
//! [`PendingWrites`] queue when the API is reachable again.

use std::sync::Arc;

use roombook_core::{Clock, Notification, NotificationPreference, Reservation};
use roombook_providers::{ApiError, KeyValueStore, RemoteApi};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::cache::{CACHE_PREFIX, CachedResource};
use crate::config::CacheConfig;
use crate::error::EngineResult;
use crate::pending::{PendingOp, PendingWrite, PendingWrites};

/// Cache namespaces used across the engine.
pub mod namespaces {
    /// Reservations of one user, keyed by user id.
    pub const USER_RESERVATIONS: &str = "reservations.user";
    /// Reservations of one room, keyed by room id.
    pub const ROOM_RESERVATIONS: &str = "reservations.room";
    /// Recent notifications of one user, keyed by user id.
    pub const NOTIFICATIONS: &str = "notifications";
    /// Preferences of one user, keyed by user id.
    pub const PREFERENCES: &str = "preferences";
}

/// Outcome of replaying one queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushFailure {
    /// The entity the write targeted.
    pub entity: String,
    pub error: String,
    /// True if the write was dropped because retrying cannot succeed.
    pub dropped: bool,
}

/// Per-item report of a [`SyncCoordinator::flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entities whose write reached the API.
    pub flushed: Vec<String>,
    pub failed: Vec<FlushFailure>,
    /// Writes still queued after the flush.
    pub remaining: usize,
}

impl FlushReport {
    /// Returns true if every queued write was applied.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Shared access to the API, the local store and the clock.
pub struct SyncCoordinator {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    pending: PendingWrites,
}

impl SyncCoordinator {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let pending = PendingWrites::new(Arc::clone(&store));
        Self {
            api,
            store,
            clock,
            config,
            pending,
        }
    }

    pub fn api(&self) -> &Arc<dyn RemoteApi> {
        &self.api
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    /// Returns a typed view over `namespace` with the configured TTL.
    pub fn resource<T>(&self, namespace: &'static str) -> CachedResource<T>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        CachedResource::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            namespace,
            self.config.ttl,
        )
    }

    pub fn user_reservations(&self) -> CachedResource<Vec<Reservation>> {
        self.resource(namespaces::USER_RESERVATIONS)
    }

    pub fn room_reservations(&self) -> CachedResource<Vec<Reservation>> {
        self.resource(namespaces::ROOM_RESERVATIONS)
    }

    pub fn notifications(&self) -> CachedResource<Vec<Notification>> {
        self.resource(namespaces::NOTIFICATIONS)
    }

    pub fn preferences(&self) -> CachedResource<NotificationPreference> {
        self.resource(namespaces::PREFERENCES)
    }

    /// Drops cached reservations after a mutation so the next read goes to
    /// the API.
    pub async fn invalidate_reservations(
        &self,
        room_id: &str,
        user_ids: &[&str],
    ) -> EngineResult<()> {
        self.room_reservations().invalidate(room_id).await?;
        let users = self.user_reservations();
        for user_id in user_ids {
            users.invalidate(user_id).await?;
        }
        Ok(())
    }

    /// Replays every queued write, oldest first.
    ///
    /// Each write is attempted independently. A write that fails with a
    /// retryable error stays queued; one that fails otherwise is dropped and
    /// reported.
    pub async fn flush(&self) -> EngineResult<FlushReport> {
        let writes = self.pending.list().await?;
        let mut report = FlushReport::default();
        if writes.is_empty() {
            return Ok(report);
        }
        info!(count = writes.len(), api = self.api.name(), "Flushing pending writes");

        for write in writes {
            let entity = write.op.entity();
            match self.replay(&write).await {
                Ok(()) => {
                    self.pending.remove(&write.op).await?;
                    debug!(entity = %entity, "Pending write applied");
                    report.flushed.push(entity);
                }
                Err(e) if e.is_retryable() => {
                    self.pending.record_attempt(&write.op).await?;
                    warn!(entity = %entity, error = %e, "Pending write deferred");
                    report.failed.push(FlushFailure {
                        entity,
                        error: e.to_string(),
                        dropped: false,
                    });
                }
                Err(e) => {
                    self.pending.remove(&write.op).await?;
                    warn!(entity = %entity, error = %e, "Pending write rejected, dropping");
                    report.failed.push(FlushFailure {
                        entity,
                        error: e.to_string(),
                        dropped: true,
                    });
                }
            }
        }

        report.remaining = self.pending.len().await?;
        info!(
            flushed = report.flushed.len(),
            failed = report.failed.len(),
            remaining = report.remaining,
            "Flush finished"
        );
        Ok(report)
    }

    async fn replay(&self, write: &PendingWrite) -> Result<(), ApiError> {
        match &write.op {
            PendingOp::PatchPreferences { user_id } => {
                let stored = self.api.patch_preferences(user_id, &write.payload).await?;
                if let Err(e) = self.preferences().put(user_id, &stored).await {
                    warn!(user_id = %user_id, error = %e, "Failed to cache flushed preferences");
                }
                Ok(())
            }
            PendingOp::MarkRead { notification_id } => {
                self.api.mark_notification_read(notification_id).await
            }
            PendingOp::MarkAllRead { user_id } => {
                self.api.mark_all_notifications_read(user_id).await
            }
        }
    }

    /// Removes every cached value and queued write, as on sign-out.
    pub async fn clear(&self) -> EngineResult<()> {
        let keys = self.store.keys_with_prefix(CACHE_PREFIX).await?;
        self.store.remove_many(&keys).await?;
        self.pending.clear().await?;
        debug!(count = keys.len(), "Cleared local cache");
        Ok(())
    }
}
