//! Reservation conflict resolver and state machine.
//!
//! The resolver validates booking requests, detects overlaps against the
//! reservations that hold a room, and drives status transitions through the
//! API. A forced approval cancels every conflicting reservation and
//! approves the target in a single all-or-nothing batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roombook_core::{
    Actor, Interval, Reservation, ReservationDraft, ReservationStatus, StatusTransition,
    ValidationError, find_conflicts,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::sync::SyncCoordinator;

/// Result of [`ConflictResolver::create`].
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Stored as PENDING.
    Created(Reservation),
    /// Not stored; these reservations hold the room.
    Conflict(Vec<Reservation>),
}

/// Result of [`ConflictResolver::approve`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApproveOutcome {
    Approved {
        reservation: Reservation,
        /// Reservations cancelled by a forced approval.
        cancelled: Vec<Reservation>,
    },
    /// Not approved; nothing was changed.
    Conflict(Vec<Reservation>),
}

/// Conflict detection and lifecycle transitions.
#[derive(Clone)]
pub struct ConflictResolver {
    sync: Arc<SyncCoordinator>,
}

impl ConflictResolver {
    pub fn new(sync: Arc<SyncCoordinator>) -> Self {
        Self { sync }
    }

    pub(crate) fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    fn now(&self) -> DateTime<Utc> {
        self.sync.clock().now()
    }

    /// Returns the reservations of `room_id` that hold the room during
    /// `[start, end)`, never including `exclude_id`.
    ///
    /// Room reservations are read network-first; a cached copy is used when
    /// the API is unreachable.
    #[instrument(skip(self))]
    pub async fn check_conflict(
        &self,
        room_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_id: Option<&str>,
    ) -> EngineResult<Vec<Reservation>> {
        let interval = Interval::new(start, end)
            .map_err(|e| ValidationError::new("time range", e.to_string()))?;
        let api = Arc::clone(self.sync.api());
        let room = self
            .sync
            .room_reservations()
            .refresh(room_id, || async move { api.list_room_reservations(room_id).await })
            .await?;
        if room.is_stale() {
            warn!(room_id = %room_id, "Conflict check against cached reservations");
        }

        let conflicts = find_conflicts(&room.value, &interval, exclude_id);
        debug!(count = conflicts.len(), "Conflict check done");
        Ok(conflicts)
    }

    /// Validates `draft` and stores it as PENDING unless it conflicts.
    #[instrument(skip(self, draft), fields(room_id = %draft.room_id, user_id = %draft.user_id))]
    pub async fn create(&self, draft: &ReservationDraft) -> EngineResult<CreateOutcome> {
        draft.validate()?;
        let conflicts = self
            .check_conflict(&draft.room_id, draft.start, draft.end, None)
            .await?;
        if !conflicts.is_empty() {
            info!(count = conflicts.len(), "Booking conflicts, not created");
            return Ok(CreateOutcome::Conflict(conflicts));
        }

        let reservation = self.sync.api().create_reservation(draft).await?;
        self.sync
            .invalidate_reservations(&reservation.room_id, &[reservation.user_id.as_str()])
            .await?;
        info!(reservation_id = %reservation.id, "Reservation created");
        Ok(CreateOutcome::Created(reservation))
    }

    async fn fetch(&self, reservation_id: &str) -> EngineResult<Reservation> {
        Ok(self.sync.api().get_reservation(reservation_id).await?)
    }

    /// Sends `transitions` as one batch and drops the affected cache entries.
    async fn apply(
        &self,
        transitions: &[StatusTransition],
        affected: &[&Reservation],
    ) -> EngineResult<Vec<Reservation>> {
        let updated = self.sync.api().apply_transitions(transitions).await?;
        for r in affected {
            self.sync
                .invalidate_reservations(&r.room_id, &[r.user_id.as_str()])
                .await?;
        }
        Ok(updated)
    }

    fn require(reservation: &Reservation, to: ReservationStatus) -> EngineResult<()> {
        if reservation.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(EngineError::invalid_transition(
                &reservation.id,
                reservation.status,
                to,
            ))
        }
    }

    /// Approves a PENDING reservation.
    ///
    /// Without `force`, a conflict leaves everything untouched and returns
    /// the conflict set. With `force`, the conflicting reservations are
    /// cancelled and the target approved in one batch.
    #[instrument(skip(self))]
    pub async fn approve(&self, reservation_id: &str, force: bool) -> EngineResult<ApproveOutcome> {
        let target = self.fetch(reservation_id).await?;
        Self::require(&target, ReservationStatus::Approved)?;

        let conflicts = self
            .check_conflict(&target.room_id, target.start, target.end, Some(&target.id))
            .await?;
        if !conflicts.is_empty() && !force {
            info!(count = conflicts.len(), "Approval blocked by conflicts");
            return Ok(ApproveOutcome::Conflict(conflicts));
        }

        let mut transitions: Vec<StatusTransition> = conflicts
            .iter()
            .map(|c| StatusTransition::new(&c.id, ReservationStatus::Cancelled))
            .collect();
        transitions.push(StatusTransition::new(&target.id, ReservationStatus::Approved));

        let mut affected: Vec<&Reservation> = conflicts.iter().collect();
        affected.push(&target);
        let mut updated = self.apply(&transitions, &affected).await?;

        let reservation = match updated.iter().position(|r| r.id == target.id) {
            Some(i) => updated.remove(i),
            None => Reservation {
                status: ReservationStatus::Approved,
                ..target
            },
        };
        if !updated.is_empty() {
            info!(
                reservation_id = %reservation.id,
                cancelled = updated.len(),
                "Forced approval cancelled conflicting reservations"
            );
        } else {
            info!(reservation_id = %reservation.id, "Reservation approved");
        }
        Ok(ApproveOutcome::Approved {
            reservation,
            cancelled: updated,
        })
    }

    async fn transition_one(
        &self,
        target: Reservation,
        to: ReservationStatus,
        reason: Option<String>,
    ) -> EngineResult<Reservation> {
        let transition = StatusTransition::new(&target.id, to).with_reason(reason.clone());
        let updated = self.apply(&[transition], &[&target]).await?;
        let reservation = updated.into_iter().next().unwrap_or(Reservation {
            status: to,
            rejection_reason: reason,
            ..target
        });
        info!(
            reservation_id = %reservation.id,
            status = %reservation.status,
            "Reservation updated"
        );
        Ok(reservation)
    }

    /// Rejects a PENDING reservation, storing the reason.
    #[instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        reservation_id: &str,
        reason: Option<String>,
    ) -> EngineResult<Reservation> {
        let target = self.fetch(reservation_id).await?;
        Self::require(&target, ReservationStatus::Rejected)?;
        self.transition_one(target, ReservationStatus::Rejected, reason)
            .await
    }

    /// Cancels a reservation on behalf of `actor`.
    ///
    /// Only the owner or an administrator may cancel, only before the
    /// reservation starts, and only from a non-terminal status.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn cancel(&self, reservation_id: &str, actor: &Actor) -> EngineResult<Reservation> {
        let target = self.fetch(reservation_id).await?;
        if !actor.may_cancel(&target) {
            return Err(EngineError::forbidden(format!(
                "{} may not cancel reservation {}",
                actor.user_id, target.id
            )));
        }
        Self::require(&target, ReservationStatus::Cancelled)?;
        if target.has_started(self.now()) {
            return Err(EngineError::AlreadyStarted {
                reservation_id: target.id,
            });
        }
        self.transition_one(target, ReservationStatus::Cancelled, None)
            .await
    }

    /// Marks an APPROVED reservation as in progress.
    #[instrument(skip(self))]
    pub async fn activate(&self, reservation_id: &str) -> EngineResult<Reservation> {
        let target = self.fetch(reservation_id).await?;
        Self::require(&target, ReservationStatus::Active)?;
        self.transition_one(target, ReservationStatus::Active, None)
            .await
    }

    /// Marks an ACTIVE reservation as finished.
    #[instrument(skip(self))]
    pub async fn complete(&self, reservation_id: &str) -> EngineResult<Reservation> {
        let target = self.fetch(reservation_id).await?;
        Self::require(&target, ReservationStatus::Completed)?;
        self.transition_one(target, ReservationStatus::Completed, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use roombook_core::ManualClock;
    use roombook_providers::{InMemoryApi, MemoryStore};

    use crate::config::CacheConfig;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, h, 0, 0).unwrap()
    }

    fn reservation(id: &str, h: u32, status: ReservationStatus) -> Reservation {
        Reservation {
            id: id.into(),
            room_id: "room-a".into(),
            user_id: "alice".into(),
            start: at(h),
            end: at(h + 1),
            status,
            purpose: None,
            recurrence_group_id: None,
            rejection_reason: None,
        }
    }

    fn setup() -> (Arc<InMemoryApi>, Arc<ManualClock>, ConflictResolver) {
        let api = Arc::new(InMemoryApi::new());
        let clock = Arc::new(ManualClock::new(at(6)));
        let sync = Arc::new(SyncCoordinator::new(
            api.clone(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
            CacheConfig::default(),
        ));
        (api, clock, ConflictResolver::new(sync))
    }

    #[tokio::test]
    async fn touching_intervals_do_not_conflict() {
        let (api, _, resolver) = setup();
        api.insert(reservation("r1", 9, ReservationStatus::Approved)).await;

        assert!(resolver.check_conflict("room-a", at(10), at(11), None).await.unwrap().is_empty());
        assert!(resolver.check_conflict("room-a", at(8), at(9), None).await.unwrap().is_empty());
        assert_eq!(
            resolver
                .check_conflict("room-a", at(9) + Duration::minutes(30), at(11), None)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn only_room_holding_statuses_conflict() {
        let (api, _, resolver) = setup();
        api.insert(reservation("p", 9, ReservationStatus::Pending)).await;
        api.insert(reservation("c", 9, ReservationStatus::Cancelled)).await;
        api.insert(reservation("a", 9, ReservationStatus::Active)).await;

        let conflicts = resolver.check_conflict("room-a", at(9), at(10), None).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, "a");

        assert!(
            resolver
                .check_conflict("room-a", at(9), at(10), Some("a"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn create_rejects_inverted_range() {
        let (_, _, resolver) = setup();
        let draft = ReservationDraft::new("room-a", "alice", at(10), at(9));
        assert!(matches!(
            resolver.create(&draft).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn reject_stores_reason() {
        let (api, _, resolver) = setup();
        api.insert(reservation("r1", 9, ReservationStatus::Pending)).await;

        let r = resolver.reject("r1", Some("maintenance".into())).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Rejected);
        assert_eq!(r.rejection_reason.as_deref(), Some("maintenance"));

        // Terminal now.
        assert!(matches!(
            resolver.reject("r1", None).await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_rules() {
        let (api, clock, resolver) = setup();
        api.insert(reservation("r1", 9, ReservationStatus::Approved)).await;

        assert!(matches!(
            resolver.cancel("r1", &Actor::user("bob")).await,
            Err(EngineError::Forbidden(_))
        ));

        clock.set(at(9));
        assert!(matches!(
            resolver.cancel("r1", &Actor::user("alice")).await,
            Err(EngineError::AlreadyStarted { .. })
        ));

        clock.set(at(8));
        let r = resolver.cancel("r1", &Actor::admin("carol")).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn lifecycle_to_completion() {
        let (api, _, resolver) = setup();
        api.insert(reservation("r1", 9, ReservationStatus::Pending)).await;

        assert!(matches!(
            resolver.activate("r1").await,
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            resolver.approve("r1", false).await.unwrap(),
            ApproveOutcome::Approved { .. }
        ));
        assert_eq!(resolver.activate("r1").await.unwrap().status, ReservationStatus::Active);
        assert_eq!(resolver.complete("r1").await.unwrap().status, ReservationStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_reservation_is_not_found() {
        let (_, _, resolver) = setup();
        assert!(matches!(
            resolver.approve("nope", false).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
