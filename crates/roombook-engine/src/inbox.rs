//! In-app notification inbox.
//!
//! The inbox keeps the most recent notifications of a user in the local
//! cache. Reads are cache-first; read-flag changes are applied locally first
//! and queued when the API is unreachable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roombook_core::Notification;
use roombook_providers::JsonObject;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{Cached, CachedResource};
use crate::error::{EngineError, EngineResult};
use crate::pending::PendingOp;
use crate::sync::SyncCoordinator;

/// A notification that is stored locally but not on the API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification {notification_id} was not persisted remotely: {reason}")]
pub struct PersistenceWarning {
    pub notification_id: String,
    pub reason: String,
}

/// Notification inbox of the session user.
#[derive(Clone)]
pub struct NotificationInbox {
    sync: Arc<SyncCoordinator>,
}

impl NotificationInbox {
    pub fn new(sync: Arc<SyncCoordinator>) -> Self {
        Self { sync }
    }

    fn resource(&self) -> CachedResource<Vec<Notification>> {
        self.sync.notifications()
    }

    fn bound(&self, list: &mut Vec<Notification>) {
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(self.sync.config().max_notifications);
    }

    async fn cached(
        &self,
        user_id: &str,
    ) -> EngineResult<Option<(Vec<Notification>, DateTime<Utc>)>> {
        Ok(self
            .resource()
            .peek(user_id)
            .await?
            .map(|c| (c.value, c.stored_at)))
    }

    /// Returns the list a local edit starts from.
    ///
    /// Without a cache entry the remote list is loaded first. If that fails
    /// the edit starts from an empty list stamped as expired, so the next
    /// [`list`](Self::list) goes back to the API.
    async fn base_list(
        &self,
        user_id: &str,
    ) -> EngineResult<(Vec<Notification>, DateTime<Utc>)> {
        if let Some(cached) = self.cached(user_id).await? {
            return Ok(cached);
        }
        match self.sync.api().list_notifications(user_id).await {
            Ok(list) => Ok((list, self.sync.clock().now())),
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "No inbox to extend, starting expired");
                Ok((Vec::new(), DateTime::<Utc>::default()))
            }
        }
    }

    /// Lists the notifications of `user_id`, most recent first.
    ///
    /// Read-flag changes still queued locally are reflected in the result.
    pub async fn list(&self, user_id: &str) -> EngineResult<Vec<Notification>> {
        let api = Arc::clone(self.sync.api());
        let Cached { mut value, source, .. } = self
            .resource()
            .get_or_fetch(user_id, || async move { api.list_notifications(user_id).await })
            .await?;
        self.bound(&mut value);

        let pending = self.sync.pending();
        let all_read = pending
            .get(&PendingOp::MarkAllRead {
                user_id: user_id.to_string(),
            })
            .await?
            .is_some();
        for n in value.iter_mut().filter(|n| !n.read) {
            n.read = all_read
                || pending
                    .get(&PendingOp::MarkRead {
                        notification_id: n.id.clone(),
                    })
                    .await?
                    .is_some();
        }
        debug!(user_id = %user_id, count = value.len(), source = ?source, "Listed notifications");
        Ok(value)
    }

    /// Stores `notification` locally, then on the API.
    ///
    /// A failed remote write is reported as a [`PersistenceWarning`]; the
    /// local copy is kept either way.
    pub async fn record(
        &self,
        notification: &Notification,
    ) -> EngineResult<Option<PersistenceWarning>> {
        let user_id = &notification.user_id;
        let (mut list, stored_at) = self.base_list(user_id).await?;
        list.retain(|n| n.id != notification.id);
        list.push(notification.clone());
        self.bound(&mut list);
        self.resource().put_at(user_id, &list, stored_at).await?;

        match self.sync.api().create_notification(notification).await {
            Ok(stored) => {
                if stored != *notification
                    && let Some((mut list, stored_at)) = self.cached(user_id).await?
                {
                    list.retain(|n| n.id != notification.id && n.id != stored.id);
                    list.push(stored);
                    self.bound(&mut list);
                    self.resource().put_at(user_id, &list, stored_at).await?;
                }
                debug!(notification_id = %notification.id, "Notification recorded");
                Ok(None)
            }
            Err(e) => {
                warn!(
                    notification_id = %notification.id,
                    error = %e,
                    "Notification kept locally only"
                );
                Ok(Some(PersistenceWarning {
                    notification_id: notification.id.clone(),
                    reason: e.to_string(),
                }))
            }
        }
    }

    async fn set_read_locally(&self, user_id: &str, id: Option<&str>) -> EngineResult<()> {
        let Some((mut list, stored_at)) = self.cached(user_id).await? else {
            return Ok(());
        };
        for n in list.iter_mut().filter(|n| id.is_none_or(|id| n.id == id)) {
            n.read = true;
        }
        self.resource().put_at(user_id, &list, stored_at).await
    }

    /// Marks one notification read, queueing the change when offline.
    pub async fn mark_read(&self, user_id: &str, notification_id: &str) -> EngineResult<()> {
        self.set_read_locally(user_id, Some(notification_id)).await?;
        match self.sync.api().mark_notification_read(notification_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_network() => {
                let op = PendingOp::MarkRead {
                    notification_id: notification_id.to_string(),
                };
                self.sync
                    .pending()
                    .enqueue(op, JsonObject::new(), self.sync.clock().now())
                    .await?;
                debug!(notification_id = %notification_id, "Mark-read queued");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Marks every notification of `user_id` read, queueing when offline.
    pub async fn mark_all_read(&self, user_id: &str) -> EngineResult<()> {
        self.set_read_locally(user_id, None).await?;
        match self.sync.api().mark_all_notifications_read(user_id).await {
            Ok(()) => {
                info!(user_id = %user_id, "All notifications marked read");
                Ok(())
            }
            Err(e) if e.is_network() => {
                let op = PendingOp::MarkAllRead {
                    user_id: user_id.to_string(),
                };
                self.sync
                    .pending()
                    .enqueue(op, JsonObject::new(), self.sync.clock().now())
                    .await?;
                debug!(user_id = %user_id, "Mark-all-read queued");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a notification on the API, then from the local cache.
    pub async fn delete(&self, user_id: &str, notification_id: &str) -> EngineResult<()> {
        self.sync.api().delete_notification(notification_id).await?;
        if let Some((mut list, stored_at)) = self.cached(user_id).await? {
            let before = list.len();
            list.retain(|n| n.id != notification_id);
            if list.len() != before {
                self.resource().put_at(user_id, &list, stored_at).await?;
            }
        }
        debug!(notification_id = %notification_id, "Notification deleted");
        Ok(())
    }

    /// Returns the unread count, counted locally when the API is unreachable.
    pub async fn unread_count(&self, user_id: &str) -> EngineResult<u32> {
        match self.sync.api().unread_count(user_id).await {
            Ok(count) => Ok(count),
            Err(e) if e.is_network() => match self.resource().peek(user_id).await? {
                Some(cached) => {
                    let count = cached.value.iter().filter(|n| !n.read).count();
                    Ok(u32::try_from(count).unwrap_or(u32::MAX))
                }
                None => Err(EngineError::Network(e)),
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use roombook_core::{ManualClock, NotificationKind};
    use roombook_providers::{InMemoryApi, MemoryStore, RemoteApi};

    use crate::config::CacheConfig;

    fn setup(max: usize) -> (Arc<InMemoryApi>, NotificationInbox) {
        let api = Arc::new(InMemoryApi::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()));
        let sync = Arc::new(SyncCoordinator::new(
            api.clone(),
            Arc::new(MemoryStore::new()),
            clock,
            CacheConfig::default().with_max_notifications(max),
        ));
        (api, NotificationInbox::new(sync))
    }

    fn note(id: &str, minute: i64) -> Notification {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 7, 0, 0).unwrap() + Duration::minutes(minute);
        Notification::new(id, "alice", NotificationKind::Approved, "Approved", "Room A", at)
    }

    #[tokio::test]
    async fn record_keeps_most_recent() {
        let (_api, inbox) = setup(2);
        for (i, id) in ["n1", "n2", "n3"].iter().enumerate() {
            assert_eq!(inbox.record(&note(id, i as i64)).await.unwrap(), None);
        }
        let ids: Vec<_> = inbox.list("alice").await.unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n3", "n2"]);
    }

    #[tokio::test]
    async fn record_offline_warns() {
        let (api, inbox) = setup(50);
        api.set_offline(true);
        let warning = inbox.record(&note("n1", 0)).await.unwrap();
        assert_eq!(warning.map(|w| w.notification_id), Some("n1".to_string()));
        assert_eq!(inbox.list("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_without_cache_keeps_remote_notifications() {
        let (api, inbox) = setup(50);
        for (i, id) in ["r1", "r2", "r3"].iter().enumerate() {
            api.create_notification(&note(id, i as i64)).await.unwrap();
        }

        inbox.record(&note("n4", 10)).await.unwrap();
        let ids: Vec<_> = inbox.list("alice").await.unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n4", "r3", "r2", "r1"]);
    }

    #[tokio::test]
    async fn record_offline_without_cache_refetches_later() {
        let (api, inbox) = setup(50);
        api.create_notification(&note("r1", 0)).await.unwrap();

        api.set_offline(true);
        inbox.record(&note("n2", 5)).await.unwrap();
        api.set_offline(false);

        let ids: Vec<_> = inbox.list("alice").await.unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["r1"]);
    }

    #[tokio::test]
    async fn mark_read_offline_is_queued() {
        let (api, inbox) = setup(50);
        inbox.record(&note("n1", 0)).await.unwrap();
        inbox.record(&note("n2", 1)).await.unwrap();

        api.set_offline(true);
        inbox.mark_read("alice", "n1").await.unwrap();
        assert_eq!(inbox.sync.pending().len().await.unwrap(), 1);
        assert_eq!(inbox.unread_count("alice").await.unwrap(), 1);

        api.set_offline(false);
        let report = inbox.sync.flush().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(inbox.unread_count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_removes_locally() {
        let (api, inbox) = setup(50);
        inbox.record(&note("n1", 0)).await.unwrap();
        inbox.delete("alice", "n1").await.unwrap();
        assert!(inbox.list("alice").await.unwrap().is_empty());
        assert!(api.notifications().await.is_empty());
    }
}
