//! RemoteApi trait definition.
//!
//! [`RemoteApi`] is the boundary to the booking backend. The engine never
//! talks HTTP itself: it reads and writes through this trait, wrapped by the
//! offline cache so that network failures degrade to cached reads and queued
//! writes.

use std::future::Future;
use std::pin::Pin;

use roombook_core::{
    Notification, NotificationPreference, Reservation, ReservationDraft, StatusTransition,
};

use crate::error::ApiResult;

/// A boxed future for async trait methods.
///
/// Boxed futures keep the traits object-safe so services can hold
/// `Arc<dyn RemoteApi>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A JSON object used for partial updates.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// The remote reservation/notification API.
///
/// # Implementation Notes
///
/// - Implementations must bound every request with a timeout and report a
///   timeout as [`ApiErrorCode::NetworkError`](crate::ApiErrorCode::NetworkError).
/// - [`apply_transitions`](RemoteApi::apply_transitions) is all-or-nothing:
///   either every transition in the batch is applied or none is.
pub trait RemoteApi: Send + Sync {
    /// Returns a short name for logs (e.g. "http", "memory").
    fn name(&self) -> &str;

    /// Lists every reservation owned by `user_id`.
    fn list_user_reservations(&self, user_id: &str) -> BoxFuture<'_, ApiResult<Vec<Reservation>>>;

    /// Lists every reservation of `room_id`, whatever its status.
    fn list_room_reservations(&self, room_id: &str) -> BoxFuture<'_, ApiResult<Vec<Reservation>>>;

    /// Fetches a single reservation.
    fn get_reservation(&self, id: &str) -> BoxFuture<'_, ApiResult<Reservation>>;

    /// Stores a new PENDING reservation.
    fn create_reservation(&self, draft: &ReservationDraft) -> BoxFuture<'_, ApiResult<Reservation>>;

    /// Applies a batch of status transitions atomically and returns the
    /// updated reservations in batch order.
    fn apply_transitions(
        &self,
        transitions: &[StatusTransition],
    ) -> BoxFuture<'_, ApiResult<Vec<Reservation>>>;

    /// Lists the notifications of `user_id`, most recent first.
    fn list_notifications(&self, user_id: &str) -> BoxFuture<'_, ApiResult<Vec<Notification>>>;

    /// Stores a notification record.
    fn create_notification(
        &self,
        notification: &Notification,
    ) -> BoxFuture<'_, ApiResult<Notification>>;

    fn mark_notification_read(&self, id: &str) -> BoxFuture<'_, ApiResult<()>>;

    fn mark_all_notifications_read(&self, user_id: &str) -> BoxFuture<'_, ApiResult<()>>;

    fn delete_notification(&self, id: &str) -> BoxFuture<'_, ApiResult<()>>;

    fn unread_count(&self, user_id: &str) -> BoxFuture<'_, ApiResult<u32>>;

    /// Fetches the preferences of `user_id`; `None` if never stored.
    fn get_preferences(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, ApiResult<Option<NotificationPreference>>>;

    /// Applies a partial update and returns the stored preferences.
    fn patch_preferences(
        &self,
        user_id: &str,
        patch: &JsonObject,
    ) -> BoxFuture<'_, ApiResult<NotificationPreference>>;
}
