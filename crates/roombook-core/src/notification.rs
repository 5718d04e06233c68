//! Notification types.
//!
//! - [`Notification`]: an in-app notification record
//! - [`NotificationKind`]: why the notification exists
//! - [`ReservationChange`]: a status transition observed by the monitor
//! - [`ScheduledReminder`]: a reminder handed to the delivery channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reservation::{Reservation, ReservationStatus};

/// The type of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Approved,
    Rejected,
    Cancelled,
    Reminder,
    Expiring,
    /// Mandatory broadcast; bypasses user preferences.
    System,
}

impl NotificationKind {
    /// Returns the notification kind announcing a move to `status`, if any.
    pub fn for_status(status: ReservationStatus) -> Option<Self> {
        match status {
            ReservationStatus::Approved => Some(Self::Approved),
            ReservationStatus::Rejected => Some(Self::Rejected),
            ReservationStatus::Cancelled => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true for kinds gated by the status-change preference.
    pub fn is_status_change(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// Returns true for kinds gated by the reminder preference.
    pub fn is_reminder(self) -> bool {
        matches!(self, Self::Reminder | Self::Expiring)
    }
}

/// An in-app notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
}

impl Notification {
    /// Creates an unread notification.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            payload: serde_json::Value::Null,
            read: false,
            created_at,
            reservation_id: None,
        }
    }

    /// Builder: attach the reservation this notification is about.
    pub fn with_reservation(mut self, reservation_id: impl Into<String>) -> Self {
        self.reservation_id = Some(reservation_id.into());
        self
    }

    /// Builder: set the free-form payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A status transition observed between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationChange {
    pub reservation_id: String,
    pub old_status: ReservationStatus,
    pub new_status: ReservationStatus,
    /// The reservation as observed by the poll that detected the change.
    pub reservation: Reservation,
}

/// A reminder handed to the delivery channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledReminder {
    /// Synthetic id, see [`ScheduledReminder::make_id`].
    pub id: String,
    pub reservation_id: String,
    pub trigger_at: DateTime<Utc>,
    pub notification: Notification,
}

impl ScheduledReminder {
    /// Builds the synthetic reminder id from the reservation and trigger time.
    ///
    /// Rescheduling the same reminder yields the same id.
    pub fn make_id(reservation_id: &str, trigger_at: DateTime<Utc>) -> String {
        format!("{}-{}", reservation_id, trigger_at.timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kind_for_status() {
        assert_eq!(
            NotificationKind::for_status(ReservationStatus::Approved),
            Some(NotificationKind::Approved)
        );
        assert_eq!(
            NotificationKind::for_status(ReservationStatus::Cancelled),
            Some(NotificationKind::Cancelled)
        );
        assert_eq!(NotificationKind::for_status(ReservationStatus::Active), None);
        assert_eq!(NotificationKind::for_status(ReservationStatus::Pending), None);
    }

    #[test]
    fn kind_groups() {
        assert!(NotificationKind::Rejected.is_status_change());
        assert!(!NotificationKind::Reminder.is_status_change());
        assert!(NotificationKind::Expiring.is_reminder());
        assert!(!NotificationKind::System.is_reminder());
        assert!(!NotificationKind::System.is_status_change());
    }

    #[test]
    fn reminder_id_combines_reservation_and_trigger() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        assert_eq!(
            ScheduledReminder::make_id("r42", at),
            format!("r42-{}", at.timestamp_millis())
        );
    }

    #[test]
    fn notification_wire_shape() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        let notification =
            Notification::new("n1", "alice", NotificationKind::Approved, "Approved", "Room A", at)
                .with_reservation("r1");
        insta::assert_json_snapshot!(notification, @r#"
        {
          "id": "n1",
          "user_id": "alice",
          "type": "approved",
          "title": "Approved",
          "body": "Room A",
          "payload": null,
          "read": false,
          "created_at": "2024-01-01T13:00:00Z",
          "reservation_id": "r1"
        }
        "#);
    }
}
