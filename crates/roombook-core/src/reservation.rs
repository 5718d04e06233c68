//! Reservation types.
//!
//! This module provides the core types for room bookings:
//! - [`Reservation`]: a booking as stored by the remote API
//! - [`ReservationStatus`]: the lifecycle state machine
//! - [`ReservationDraft`]: a validated-on-submit booking request
//! - [`StatusTransition`]: one requested status change, sent in batches
//! - [`Actor`]: who is asking for a mutation

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::Interval;

/// Lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Submitted, waiting for an administrator decision.
    Pending,
    /// Approved; holds the room.
    Approved,
    /// In progress; holds the room.
    Active,
    /// Finished normally.
    Completed,
    /// Cancelled by the owner, an administrator, or a forced approval.
    Cancelled,
    /// Refused by an administrator.
    Rejected,
}

impl ReservationStatus {
    /// Returns true for statuses that cannot change any more.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }

    /// Returns true for statuses that block other bookings of the same room.
    pub fn holds_room(self) -> bool {
        matches!(self, Self::Approved | Self::Active)
    }

    /// Returns true if the state machine permits `self -> next`.
    ///
    /// Cancellation of a non-terminal reservation is allowed here; the
    /// "before start" condition is time-dependent and checked by the caller.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ReservationStatus::*;
        match (self, next) {
            (Pending, Approved) | (Pending, Rejected) => true,
            (Approved, Active) => true,
            (Active, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Returns the wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A room reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl Reservation {
    /// Builds a reservation from a draft with the given id and status.
    pub fn from_draft(
        id: impl Into<String>,
        draft: &ReservationDraft,
        status: ReservationStatus,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: draft.room_id.clone(),
            user_id: draft.user_id.clone(),
            start: draft.start,
            end: draft.end,
            status,
            purpose: draft.purpose.clone(),
            recurrence_group_id: draft.recurrence_group_id.clone(),
            rejection_reason: None,
        }
    }

    /// Returns the booked interval.
    ///
    /// Reservations coming from the remote API are trusted to satisfy
    /// `start < end`; a malformed one yields an interval that overlaps nothing.
    pub fn interval(&self) -> Interval {
        Interval {
            start: self.start,
            end: self.end,
        }
    }

    /// Returns true if the reservation has started at `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start
    }

    /// Returns true if the reservation is owned by `user_id`.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Returns the reservations that block `interval`.
///
/// A reservation blocks when it holds the room (APPROVED or ACTIVE) and its
/// interval overlaps `interval`. The reservation identified by `exclude_id`
/// is never returned. Callers pass the reservations of a single room.
pub fn find_conflicts(
    reservations: &[Reservation],
    interval: &Interval,
    exclude_id: Option<&str>,
) -> Vec<Reservation> {
    reservations
        .iter()
        .filter(|r| exclude_id != Some(r.id.as_str()))
        .filter(|r| r.status.holds_room())
        .filter(|r| r.interval().overlaps(interval))
        .cloned()
        .collect()
}

/// Error raised when a draft fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// A booking request that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub room_id: String,
    pub user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_group_id: Option<String>,
}

impl ReservationDraft {
    /// Creates a new draft.
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            start,
            end,
            purpose: None,
            recurrence_group_id: None,
        }
    }

    /// Builder: set the purpose text.
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Builder: attach the draft to a recurrence group.
    pub fn with_recurrence_group(mut self, group_id: impl Into<String>) -> Self {
        self.recurrence_group_id = Some(group_id.into());
        self
    }

    /// Checks required fields and the time range.
    pub fn validate(&self) -> Result<Interval, ValidationError> {
        if self.room_id.trim().is_empty() {
            return Err(ValidationError::new("room_id", "must not be empty"));
        }
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::new("user_id", "must not be empty"));
        }
        Interval::new(self.start, self.end)
            .map_err(|e| ValidationError::new("time range", e.to_string()))
    }
}

/// One requested status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub reservation_id: String,
    pub to: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusTransition {
    pub fn new(reservation_id: impl Into<String>, to: ReservationStatus) -> Self {
        Self {
            reservation_id: reservation_id.into(),
            to,
            reason: None,
        }
    }

    /// Builder: attach a reason (stored for rejections).
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// The user performing a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub is_admin: bool,
}

impl Actor {
    /// A regular user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    /// An administrator.
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    /// Returns true if the actor may cancel `reservation`.
    pub fn may_cancel(&self, reservation: &Reservation) -> bool {
        self.is_admin || reservation.is_owned_by(&self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn terminal_statuses() {
        assert!(ReservationStatus::Completed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Rejected.is_terminal());
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(!ReservationStatus::Approved.is_terminal());
        assert!(!ReservationStatus::Active.is_terminal());
    }

    #[test]
    fn state_machine_edges() {
        use ReservationStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Approved.can_transition_to(Active));
        assert!(Approved.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Active));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Approved));
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Approved).unwrap(),
            "\"APPROVED\""
        );
        let parsed: ReservationStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(parsed, ReservationStatus::Cancelled);
        assert_eq!(ReservationStatus::Active.to_string(), "ACTIVE");
    }

    fn held(id: &str, start: u32, end: u32, status: ReservationStatus) -> Reservation {
        let draft = ReservationDraft::new("room-1", "alice", at(start), at(end));
        Reservation::from_draft(id, &draft, status)
    }

    #[test]
    fn find_conflicts_only_room_holders_that_overlap() {
        let existing = vec![
            held("approved", 10, 11, ReservationStatus::Approved),
            held("active", 11, 13, ReservationStatus::Active),
            held("pending", 10, 12, ReservationStatus::Pending),
            held("cancelled", 10, 12, ReservationStatus::Cancelled),
            held("touching", 9, 10, ReservationStatus::Approved),
        ];
        let wanted = Interval::new(at(10), at(12)).unwrap();

        let ids: Vec<_> = find_conflicts(&existing, &wanted, None)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["approved", "active"]);
    }

    #[test]
    fn find_conflicts_excludes_candidate() {
        let existing = vec![held("self", 10, 11, ReservationStatus::Approved)];
        let wanted = Interval::new(at(10), at(11)).unwrap();
        assert!(find_conflicts(&existing, &wanted, Some("self")).is_empty());
        assert_eq!(find_conflicts(&existing, &wanted, Some("other")).len(), 1);
    }

    #[test]
    fn draft_validation() {
        let ok = ReservationDraft::new("room-1", "alice", at(10), at(11));
        assert!(ok.validate().is_ok());

        let inverted = ReservationDraft::new("room-1", "alice", at(11), at(10));
        let err = inverted.validate().unwrap_err();
        assert_eq!(err.field, "time range");

        let no_room = ReservationDraft::new(" ", "alice", at(10), at(11));
        assert_eq!(no_room.validate().unwrap_err().field, "room_id");
    }

    #[test]
    fn actor_cancel_rights() {
        let draft = ReservationDraft::new("room-1", "alice", at(10), at(11));
        let reservation = Reservation::from_draft("r1", &draft, ReservationStatus::Pending);

        assert!(Actor::user("alice").may_cancel(&reservation));
        assert!(!Actor::user("bob").may_cancel(&reservation));
        assert!(Actor::admin("carol").may_cancel(&reservation));
    }

    #[test]
    fn reservation_wire_shape() {
        let draft =
            ReservationDraft::new("room-1", "alice", at(10), at(11)).with_purpose("standup");
        let reservation = Reservation::from_draft("r1", &draft, ReservationStatus::Approved);
        insta::assert_json_snapshot!(reservation, @r#"
        {
          "id": "r1",
          "room_id": "room-1",
          "user_id": "alice",
          "start": "2024-01-01T10:00:00Z",
          "end": "2024-01-01T11:00:00Z",
          "status": "APPROVED",
          "purpose": "standup"
        }
        "#);
    }
}
