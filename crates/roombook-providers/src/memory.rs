//! In-process [`RemoteApi`] backend.
//!
//! Keeps reservations, notifications and preferences in memory and follows
//! the same contract as the HTTP backend, including the all-or-nothing
//! transition batch. Connectivity can be toggled to exercise the offline
//! paths of the engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use roombook_core::{
    Notification, NotificationPreference, Reservation, ReservationDraft, ReservationStatus,
    StatusTransition,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{BoxFuture, JsonObject, RemoteApi};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Default)]
struct State {
    reservations: BTreeMap<String, Reservation>,
    notifications: Vec<Notification>,
    preferences: HashMap<String, NotificationPreference>,
}

/// An in-memory booking backend.
#[derive(Debug, Default)]
pub struct InMemoryApi {
    state: Mutex<State>,
    next_id: AtomicU64,
    offline: AtomicBool,
    reject_notifications: AtomicBool,
    requests: AtomicUsize,
}

impl InMemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `reservation` as-is, replacing any reservation with the same id.
    pub async fn insert(&self, reservation: Reservation) {
        let mut state = self.state.lock().await;
        state.reservations.insert(reservation.id.clone(), reservation);
    }

    /// Changes a status directly, bypassing the state machine, as an
    /// administrator acting through another client would.
    pub async fn set_status(&self, id: &str, status: ReservationStatus) -> bool {
        let mut state = self.state.lock().await;
        match state.reservations.get_mut(id) {
            Some(r) => {
                r.status = status;
                true
            }
            None => false,
        }
    }

    /// Returns a stored reservation without counting a request.
    pub async fn reservation(&self, id: &str) -> Option<Reservation> {
        self.state.lock().await.reservations.get(id).cloned()
    }

    /// Returns every stored notification without counting a request.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    /// Makes every call fail with a network error while `offline` is true.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes notification writes fail with a server error.
    pub fn set_reject_notifications(&self, reject: bool) {
        self.reject_notifications.store(reject, Ordering::SeqCst);
    }

    /// Number of calls received so far, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn begin(&self, op: &str) -> ApiResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            debug!(op, "in-memory api offline");
            return Err(ApiError::network(format!("{}: backend unreachable", op)));
        }
        Ok(())
    }

    fn begin_notification_write(&self, op: &str) -> ApiResult<()> {
        self.begin(op)?;
        if self.reject_notifications.load(Ordering::SeqCst) {
            return Err(ApiError::server(format!("{}: notification store unavailable", op)));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl RemoteApi for InMemoryApi {
    fn name(&self) -> &str {
        "memory"
    }

    fn list_user_reservations(&self, user_id: &str) -> BoxFuture<'_, ApiResult<Vec<Reservation>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.begin("list_user_reservations")?;
            let state = self.state.lock().await;
            Ok(state
                .reservations
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn list_room_reservations(&self, room_id: &str) -> BoxFuture<'_, ApiResult<Vec<Reservation>>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.begin("list_room_reservations")?;
            let state = self.state.lock().await;
            Ok(state
                .reservations
                .values()
                .filter(|r| r.room_id == room_id)
                .cloned()
                .collect())
        })
    }

    fn get_reservation(&self, id: &str) -> BoxFuture<'_, ApiResult<Reservation>> {
        let id = id.to_string();
        Box::pin(async move {
            self.begin("get_reservation")?;
            let state = self.state.lock().await;
            state
                .reservations
                .get(&id)
                .cloned()
                .ok_or_else(|| ApiError::not_found(format!("reservation {}", id)))
        })
    }

    fn create_reservation(
        &self,
        draft: &ReservationDraft,
    ) -> BoxFuture<'_, ApiResult<Reservation>> {
        let draft = draft.clone();
        Box::pin(async move {
            self.begin("create_reservation")?;
            if draft.start >= draft.end {
                return Err(ApiError::bad_request("start must be before end"));
            }
            let reservation =
                Reservation::from_draft(self.next_id("res"), &draft, ReservationStatus::Pending);
            let mut state = self.state.lock().await;
            state
                .reservations
                .insert(reservation.id.clone(), reservation.clone());
            Ok(reservation)
        })
    }

    fn apply_transitions(
        &self,
        transitions: &[StatusTransition],
    ) -> BoxFuture<'_, ApiResult<Vec<Reservation>>> {
        let transitions = transitions.to_vec();
        Box::pin(async move {
            self.begin("apply_transitions")?;
            let mut state = self.state.lock().await;

            // Validate the whole batch before touching anything.
            for t in &transitions {
                let current = state.reservations.get(&t.reservation_id).ok_or_else(|| {
                    ApiError::not_found(format!("reservation {}", t.reservation_id))
                })?;
                if !current.status.can_transition_to(t.to) {
                    return Err(ApiError::conflict(format!(
                        "reservation {} cannot move from {} to {}",
                        t.reservation_id, current.status, t.to
                    )));
                }
            }

            let mut updated = Vec::with_capacity(transitions.len());
            for t in transitions {
                if let Some(r) = state.reservations.get_mut(&t.reservation_id) {
                    r.status = t.to;
                    if t.to == ReservationStatus::Rejected {
                        r.rejection_reason = t.reason.clone();
                    }
                    updated.push(r.clone());
                }
            }
            Ok(updated)
        })
    }

    fn list_notifications(&self, user_id: &str) -> BoxFuture<'_, ApiResult<Vec<Notification>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.begin("list_notifications")?;
            let state = self.state.lock().await;
            let mut list: Vec<_> = state
                .notifications
                .iter()
                .filter(|n| n.user_id == user_id)
                .cloned()
                .collect();
            list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(list)
        })
    }

    fn create_notification(
        &self,
        notification: &Notification,
    ) -> BoxFuture<'_, ApiResult<Notification>> {
        let notification = notification.clone();
        Box::pin(async move {
            self.begin_notification_write("create_notification")?;
            let mut state = self.state.lock().await;
            state.notifications.retain(|n| n.id != notification.id);
            state.notifications.push(notification.clone());
            Ok(notification)
        })
    }

    fn mark_notification_read(&self, id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.begin_notification_write("mark_notification_read")?;
            let mut state = self.state.lock().await;
            let n = state
                .notifications
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or_else(|| ApiError::not_found(format!("notification {}", id)))?;
            n.read = true;
            Ok(())
        })
    }

    fn mark_all_notifications_read(&self, user_id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.begin_notification_write("mark_all_notifications_read")?;
            let mut state = self.state.lock().await;
            state
                .notifications
                .iter_mut()
                .filter(|n| n.user_id == user_id)
                .for_each(|n| n.read = true);
            Ok(())
        })
    }

    fn delete_notification(&self, id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.begin_notification_write("delete_notification")?;
            let mut state = self.state.lock().await;
            let before = state.notifications.len();
            state.notifications.retain(|n| n.id != id);
            if state.notifications.len() == before {
                return Err(ApiError::not_found(format!("notification {}", id)));
            }
            Ok(())
        })
    }

    fn unread_count(&self, user_id: &str) -> BoxFuture<'_, ApiResult<u32>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.begin("unread_count")?;
            let state = self.state.lock().await;
            let count = state
                .notifications
                .iter()
                .filter(|n| n.user_id == user_id && !n.read)
                .count();
            Ok(count as u32)
        })
    }

    fn get_preferences(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, ApiResult<Option<NotificationPreference>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.begin("get_preferences")?;
            Ok(self.state.lock().await.preferences.get(&user_id).cloned())
        })
    }

    fn patch_preferences(
        &self,
        user_id: &str,
        patch: &JsonObject,
    ) -> BoxFuture<'_, ApiResult<NotificationPreference>> {
        let user_id = user_id.to_string();
        let patch = patch.clone();
        Box::pin(async move {
            self.begin("patch_preferences")?;
            let mut state = self.state.lock().await;
            let current = state.preferences.get(&user_id).cloned().unwrap_or_default();

            let mut merged = match serde_json::to_value(&current) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => return Err(ApiError::internal("preferences are not an object")),
            };
            merged.extend(patch);
            let updated: NotificationPreference =
                serde_json::from_value(serde_json::Value::Object(merged))
                    .map_err(|e| ApiError::bad_request(format!("invalid preferences: {}", e)))?;

            state.preferences.insert(user_id, updated.clone());
            Ok(updated)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn draft(room: &str, h: u32) -> ReservationDraft {
        ReservationDraft::new(
            room,
            "alice",
            Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, h + 1, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn create_and_list() {
        let api = InMemoryApi::new();
        let a = api.create_reservation(&draft("room-a", 9)).await.unwrap();
        api.create_reservation(&draft("room-b", 9)).await.unwrap();

        assert_eq!(a.status, ReservationStatus::Pending);
        assert_eq!(api.list_room_reservations("room-a").await.unwrap().len(), 1);
        assert_eq!(api.list_user_reservations("alice").await.unwrap().len(), 2);
        assert_eq!(api.request_count(), 4);
    }

    #[tokio::test]
    async fn transition_batch_is_all_or_nothing() {
        let api = InMemoryApi::new();
        let a = api.create_reservation(&draft("room-a", 9)).await.unwrap();
        let b = api.create_reservation(&draft("room-a", 10)).await.unwrap();

        // b cannot go PENDING -> COMPLETED, so a must stay PENDING too.
        let err = api
            .apply_transitions(&[
                StatusTransition::new(&a.id, ReservationStatus::Approved),
                StatusTransition::new(&b.id, ReservationStatus::Completed),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::ApiErrorCode::Conflict);
        assert_eq!(
            api.reservation(&a.id).await.unwrap().status,
            ReservationStatus::Pending
        );
        assert_eq!(
            api.reservation(&b.id).await.unwrap().status,
            ReservationStatus::Pending
        );
    }

    #[tokio::test]
    async fn offline_calls_fail_with_network_error() {
        let api = InMemoryApi::new();
        api.set_offline(true);
        let err = api.list_user_reservations("alice").await.unwrap_err();
        assert!(err.is_network());
        api.set_offline(false);
        assert!(api.list_user_reservations("alice").await.is_ok());
    }

    #[tokio::test]
    async fn preferences_patch_merges_onto_defaults() {
        let api = InMemoryApi::new();
        assert!(api.get_preferences("alice").await.unwrap().is_none());

        let mut patch = JsonObject::new();
        patch.insert("push_enabled".into(), false.into());
        let prefs = api.patch_preferences("alice", &patch).await.unwrap();
        assert!(!prefs.push_enabled);
        assert!(prefs.reminder_enabled);
        assert_eq!(api.get_preferences("alice").await.unwrap(), Some(prefs));
    }
}
