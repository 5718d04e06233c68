//! Reminder scheduling and status-change alerts.
//!
//! [`ReminderScheduler`] talks to the [`DeliveryChannel`]:
//! - reminders are scheduled `lead` minutes before a reservation starts
//! - at most one reminder is kept per reservation; stale ones are cancelled
//! - status changes raised by the monitor become inbox entries and, when the
//!   user's preferences allow it, immediate alerts

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use roombook_core::{
    Notification, NotificationKind, Reservation, ReservationChange, ReservationStatus,
    ScheduledReminder,
};
use roombook_providers::{
    AlertPayload, DeliveryChannel, DeliveryError, DeliveryId, PermissionStatus,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReminderConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::Subscription;
use crate::inbox::{NotificationInbox, PersistenceWarning};
use crate::preferences::{PreferenceService, should_notify};
use crate::sync::SyncCoordinator;

/// A reminder handed to the delivery channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub reminder: ScheduledReminder,
    pub delivery_id: DeliveryId,
}

/// Why no reminder was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The trigger time is not in the future.
    TriggerNotInFuture,
    /// Alerts are not permitted.
    PermissionNotGranted,
    /// The same reminder is already scheduled.
    AlreadyScheduled,
}

/// Result of [`ReminderScheduler::schedule_reminder`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReminderOutcome {
    /// The alert is scheduled. `Err` means the notification record could not
    /// be stored remotely; the alert stays scheduled.
    Scheduled(Result<Scheduled, PersistenceWarning>),
    Skipped(SkipReason),
}

impl ReminderOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

/// Result of [`ReminderScheduler::on_status_change`].
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// The transition does not produce a notification.
    Ignored,
    Recorded {
        notification: Notification,
        /// True if an alert was shown.
        delivered: bool,
        warning: Option<PersistenceWarning>,
    },
}

#[derive(Debug, Clone)]
struct Tracked {
    trigger_at: DateTime<Utc>,
    scheduled: Scheduled,
}

/// Schedules reminders and delivers status-change alerts.
pub struct ReminderScheduler {
    sync: Arc<SyncCoordinator>,
    channel: Arc<dyn DeliveryChannel>,
    inbox: NotificationInbox,
    preferences: PreferenceService,
    /// Scheduled reminders keyed by reservation id.
    tracked: Mutex<HashMap<String, Tracked>>,
    /// Answer to the one permission request.
    permission: Mutex<Option<PermissionStatus>>,
    /// Reminder records already stored on the API.
    persisted: Mutex<HashSet<String>>,
}

impl ReminderScheduler {
    pub fn new(
        sync: Arc<SyncCoordinator>,
        channel: Arc<dyn DeliveryChannel>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            inbox: NotificationInbox::new(Arc::clone(&sync)),
            preferences: PreferenceService::new(Arc::clone(&sync))
                .with_default_lead_minutes(config.default_lead_minutes),
            sync,
            channel,
            tracked: Mutex::new(HashMap::new()),
            permission: Mutex::new(None),
            persisted: Mutex::new(HashSet::new()),
        }
    }

    pub fn channel(&self) -> &Arc<dyn DeliveryChannel> {
        &self.channel
    }

    /// Asks for alert permission.
    ///
    /// The user is asked at most once per scheduler; later calls return the
    /// remembered answer. A refusal is reported as
    /// [`EngineError::PermissionDenied`].
    pub async fn request_permission(&self) -> EngineResult<PermissionStatus> {
        let mut remembered = self.permission.lock().await;
        let status = match *remembered {
            Some(status) => status,
            None => {
                let status = match self.channel.permission_status().await? {
                    PermissionStatus::Undetermined => self.channel.request_permission().await?,
                    status => status,
                };
                info!(channel = self.channel.name(), status = ?status, "Alert permission resolved");
                *remembered = Some(status);
                status
            }
        };
        if status.is_granted() {
            Ok(status)
        } else {
            Err(EngineError::PermissionDenied)
        }
    }

    async fn permitted(&self) -> EngineResult<bool> {
        Ok(self.channel.permission_status().await?.is_granted())
    }

    /// Schedules a reminder `lead_minutes` before `reservation` starts.
    ///
    /// Nothing is scheduled when the trigger is not in the future or alerts
    /// are not permitted. A reminder already scheduled for the reservation
    /// at another time is cancelled first.
    #[instrument(skip(self, reservation), fields(reservation_id = %reservation.id))]
    pub async fn schedule_reminder(
        &self,
        reservation: &Reservation,
        lead_minutes: u32,
    ) -> EngineResult<ReminderOutcome> {
        let now = self.sync.clock().now();
        let trigger_at = reservation.start - Duration::minutes(i64::from(lead_minutes));
        if trigger_at <= now {
            debug!(trigger_at = %trigger_at, "Reminder trigger already passed");
            return Ok(ReminderOutcome::Skipped(SkipReason::TriggerNotInFuture));
        }
        if !self.permitted().await? {
            debug!("Alerts not permitted, reminder skipped");
            return Ok(ReminderOutcome::Skipped(SkipReason::PermissionNotGranted));
        }

        let mut tracked = self.tracked.lock().await;
        if let Some(existing) = tracked.get(&reservation.id) {
            if existing.trigger_at == trigger_at {
                return Ok(ReminderOutcome::Skipped(SkipReason::AlreadyScheduled));
            }
            debug!(delivery_id = %existing.scheduled.delivery_id, "Cancelling stale reminder");
            self.channel.cancel(&existing.scheduled.delivery_id).await?;
            tracked.remove(&reservation.id);
        }

        let notification = reminder_notification(
            reservation,
            lead_minutes,
            trigger_at,
            now,
            self.sync.clock().offset(),
        );
        let alert = AlertPayload::new(notification.title.clone(), notification.body.clone())
            .with_data(json!({
                "notification_id": notification.id,
                "reservation_id": reservation.id,
            }));
        let delivery_id = match self.channel.schedule_at(&alert, trigger_at).await {
            Ok(id) => id,
            Err(DeliveryError::PermissionDenied) => {
                return Ok(ReminderOutcome::Skipped(SkipReason::PermissionNotGranted));
            }
            Err(DeliveryError::TriggerInPast(_)) => {
                return Ok(ReminderOutcome::Skipped(SkipReason::TriggerNotInFuture));
            }
            Err(e) => return Err(e.into()),
        };

        let scheduled = Scheduled {
            reminder: ScheduledReminder {
                id: notification.id.clone(),
                reservation_id: reservation.id.clone(),
                trigger_at,
                notification: notification.clone(),
            },
            delivery_id,
        };
        tracked.insert(
            reservation.id.clone(),
            Tracked {
                trigger_at,
                scheduled: scheduled.clone(),
            },
        );
        drop(tracked);
        info!(trigger_at = %trigger_at, delivery_id = %scheduled.delivery_id, "Reminder scheduled");

        if self.persisted.lock().await.contains(&notification.id) {
            debug!(notification_id = %notification.id, "Reminder record already stored");
            return Ok(ReminderOutcome::Scheduled(Ok(scheduled)));
        }
        match self.sync.api().create_notification(&notification).await {
            Ok(_) => {
                self.persisted.lock().await.insert(notification.id);
                Ok(ReminderOutcome::Scheduled(Ok(scheduled)))
            }
            Err(e) => {
                warn!(
                    notification_id = %notification.id,
                    error = %e,
                    "Reminder not persisted remotely"
                );
                Ok(ReminderOutcome::Scheduled(Err(PersistenceWarning {
                    notification_id: notification.id,
                    reason: e.to_string(),
                })))
            }
        }
    }

    /// Cancels every scheduled alert, then schedules a reminder for each
    /// upcoming APPROVED or ACTIVE reservation of `user_id`.
    ///
    /// Running it twice leaves the same set of alerts scheduled.
    #[instrument(skip(self))]
    pub async fn reschedule_reminders(
        &self,
        user_id: &str,
        lead_minutes: u32,
    ) -> EngineResult<Vec<ReminderOutcome>> {
        self.cancel_all().await?;

        let api = Arc::clone(self.sync.api());
        let reservations = self
            .sync
            .user_reservations()
            .refresh(user_id, || async move { api.list_user_reservations(user_id).await })
            .await?
            .value;

        let now = self.sync.clock().now();
        let mut outcomes = Vec::new();
        for r in reservations.iter().filter(|r| is_eligible(r, now)) {
            outcomes.push(self.schedule_reminder(r, lead_minutes).await?);
        }
        info!(
            scheduled = outcomes.iter().filter(|o| o.is_scheduled()).count(),
            candidates = outcomes.len(),
            "Reminders rescheduled"
        );
        Ok(outcomes)
    }

    /// Reschedules with the lead time stored in the user's preferences.
    ///
    /// When reminders are turned off every alert is cancelled and nothing is
    /// scheduled.
    pub async fn reschedule_from_preferences(
        &self,
        user_id: &str,
    ) -> EngineResult<Vec<ReminderOutcome>> {
        let prefs = self.preferences.get(user_id).await?;
        if !prefs.push_enabled || !prefs.reminder_enabled {
            debug!(user_id = %user_id, "Reminders disabled by preferences");
            self.cancel_all().await?;
            return Ok(Vec::new());
        }
        self.reschedule_reminders(user_id, prefs.reminder_minutes)
            .await
    }

    /// Cancels the reminder of one reservation. Returns false if none was
    /// scheduled.
    pub async fn cancel_reminder(&self, reservation_id: &str) -> EngineResult<bool> {
        let Some(existing) = self.tracked.lock().await.remove(reservation_id) else {
            return Ok(false);
        };
        self.channel.cancel(&existing.scheduled.delivery_id).await?;
        debug!(reservation_id = %reservation_id, "Reminder cancelled");
        Ok(true)
    }

    /// Cancels every scheduled alert.
    pub async fn cancel_all(&self) -> EngineResult<()> {
        let mut tracked = self.tracked.lock().await;
        self.channel.cancel_all().await?;
        tracked.clear();
        Ok(())
    }

    /// Reminders currently scheduled, ordered by trigger time.
    pub async fn scheduled(&self) -> Vec<Scheduled> {
        let mut list: Vec<_> = self.tracked.lock().await.values().cloned().collect();
        list.sort_by(|a, b| a.trigger_at.cmp(&b.trigger_at));
        list.into_iter().map(|t| t.scheduled).collect()
    }

    /// Records and, if permitted, shows an alert for a status change.
    ///
    /// A reservation leaving the room (rejected or cancelled) also loses its
    /// reminder; a newly approved one gets one when reminders are enabled.
    #[instrument(skip(self, change), fields(reservation_id = %change.reservation_id))]
    pub async fn on_status_change(&self, change: &ReservationChange) -> EngineResult<AlertOutcome> {
        let reservation = &change.reservation;
        if matches!(
            change.new_status,
            ReservationStatus::Cancelled | ReservationStatus::Rejected
        ) {
            self.cancel_reminder(&reservation.id).await?;
        }
        let Some(kind) = NotificationKind::for_status(change.new_status) else {
            debug!(new = %change.new_status, "Transition has no notification");
            return Ok(AlertOutcome::Ignored);
        };

        let now = self.sync.clock().now();
        let notification = status_notification(kind, change, now);
        let warning = self.inbox.record(&notification).await?;

        let prefs = self.preferences.get(&reservation.user_id).await?;
        let mut delivered = false;
        if should_notify(kind, &prefs, &self.sync.clock().local_now()) {
            let alert = AlertPayload::new(notification.title.clone(), notification.body.clone())
                .with_data(json!({
                    "notification_id": notification.id,
                    "reservation_id": reservation.id,
                }))
                .with_sound(prefs.sound_enabled);
            match self.channel.show_now(&alert).await {
                Ok(id) => {
                    delivered = true;
                    debug!(delivery_id = %id, "Status alert shown");
                    if prefs.vibration_enabled
                        && let Err(e) = self.channel.vibrate().await
                    {
                        warn!(error = %e, "Vibration failed");
                    }
                }
                Err(DeliveryError::PermissionDenied) => {
                    debug!("Alerts not permitted, status alert suppressed");
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            debug!(kind = ?kind, "Status alert suppressed by preferences");
        }

        if change.new_status == ReservationStatus::Approved
            && prefs.push_enabled
            && prefs.reminder_enabled
        {
            self.schedule_reminder(reservation, prefs.reminder_minutes)
                .await?;
        }

        info!(kind = ?kind, delivered, "Status change handled");
        Ok(AlertOutcome::Recorded {
            notification,
            delivered,
            warning,
        })
    }

    /// Handles change events until the bus goes away.
    pub async fn run(&self, mut changes: Subscription<ReservationChange>) {
        while let Some(change) = changes.recv().await {
            if let Err(e) = self.on_status_change(&change).await {
                warn!(
                    reservation_id = %change.reservation_id,
                    error = %e,
                    "Failed to handle status change"
                );
            }
        }
        debug!("Change subscription closed");
    }

    pub async fn set_badge_count(&self, count: u32) -> EngineResult<()> {
        self.channel.set_badge_count(count).await?;
        Ok(())
    }
}

fn is_eligible(reservation: &Reservation, now: DateTime<Utc>) -> bool {
    matches!(
        reservation.status,
        ReservationStatus::Approved | ReservationStatus::Active
    ) && reservation.start > now
}

fn reminder_notification(
    reservation: &Reservation,
    lead_minutes: u32,
    trigger_at: DateTime<Utc>,
    now: DateTime<Utc>,
    offset: chrono::FixedOffset,
) -> Notification {
    let starts = reservation.start.with_timezone(&offset).format("%H:%M");
    let body = match &reservation.purpose {
        Some(purpose) => format!(
            "{} in room {} starts at {}",
            purpose, reservation.room_id, starts
        ),
        None => format!("Room {} at {}", reservation.room_id, starts),
    };
    Notification::new(
        ScheduledReminder::make_id(&reservation.id, trigger_at),
        reservation.user_id.clone(),
        NotificationKind::Reminder,
        format!("Starts in {} min", lead_minutes),
        body,
        now,
    )
    .with_reservation(reservation.id.clone())
    .with_payload(json!({
        "room_id": reservation.room_id,
        "start": reservation.start,
        "lead_minutes": lead_minutes,
    }))
}

fn status_notification(
    kind: NotificationKind,
    change: &ReservationChange,
    now: DateTime<Utc>,
) -> Notification {
    let r = &change.reservation;
    let (title, body) = match kind {
        NotificationKind::Approved => (
            "Reservation approved".to_string(),
            format!("Your booking of room {} was approved", r.room_id),
        ),
        NotificationKind::Rejected => (
            "Reservation rejected".to_string(),
            match &r.rejection_reason {
                Some(reason) => format!(
                    "Your booking of room {} was rejected: {}",
                    r.room_id, reason
                ),
                None => format!("Your booking of room {} was rejected", r.room_id),
            },
        ),
        NotificationKind::Cancelled => (
            "Reservation cancelled".to_string(),
            format!("Your booking of room {} was cancelled", r.room_id),
        ),
        _ => ("Reservation update".to_string(), format!("Room {}", r.room_id)),
    };
    Notification::new(Uuid::new_v4().to_string(), r.user_id.clone(), kind, title, body, now)
        .with_reservation(r.id.clone())
        .with_payload(json!({
            "room_id": r.room_id,
            "old_status": change.old_status,
            "new_status": change.new_status,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use roombook_core::{Clock, ManualClock};
    use roombook_providers::{InMemoryApi, MemoryStore, RecordingChannel};

    use crate::config::CacheConfig;

    struct Fixture {
        api: Arc<InMemoryApi>,
        clock: Arc<ManualClock>,
        channel: Arc<RecordingChannel>,
        scheduler: ReminderScheduler,
    }

    fn fixture(answer: PermissionStatus) -> Fixture {
        let api = Arc::new(InMemoryApi::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()));
        let channel = Arc::new(RecordingChannel::new(answer));
        let sync = Arc::new(SyncCoordinator::new(
            api.clone(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
            CacheConfig::default(),
        ));
        let scheduler = ReminderScheduler::new(sync, channel.clone(), ReminderConfig::default());
        Fixture {
            api,
            clock,
            channel,
            scheduler,
        }
    }

    fn reservation(id: &str, hour: u32, status: ReservationStatus) -> Reservation {
        Reservation {
            id: id.into(),
            room_id: "room-a".into(),
            user_id: "alice".into(),
            start: Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 3, hour + 1, 0, 0).unwrap(),
            status,
            purpose: None,
            recurrence_group_id: None,
            rejection_reason: None,
        }
    }

    #[tokio::test]
    async fn trigger_in_past_is_skipped() {
        let f = fixture(PermissionStatus::Granted);
        f.scheduler.request_permission().await.unwrap();
        // 08:10 start with 15 minutes lead triggers at 07:55, before now.
        let mut r = reservation("r1", 8, ReservationStatus::Approved);
        r.start += Duration::minutes(10);
        let outcome = f.scheduler.schedule_reminder(&r, 15).await.unwrap();
        assert_eq!(outcome, ReminderOutcome::Skipped(SkipReason::TriggerNotInFuture));

        // Exactly now is not in the future either.
        r.start = f.clock.now() + Duration::minutes(15);
        let outcome = f.scheduler.schedule_reminder(&r, 15).await.unwrap();
        assert_eq!(outcome, ReminderOutcome::Skipped(SkipReason::TriggerNotInFuture));
        assert!(f.channel.scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn schedules_at_lead_before_start() {
        let f = fixture(PermissionStatus::Granted);
        f.scheduler.request_permission().await.unwrap();
        let r = reservation("r1", 10, ReservationStatus::Approved);
        let outcome = f.scheduler.schedule_reminder(&r, 15).await.unwrap();
        let scheduled = match outcome {
            ReminderOutcome::Scheduled(Ok(scheduled)) => scheduled,
            other => panic!("expected a scheduled reminder, got {:?}", other),
        };
        let trigger_at = Utc.with_ymd_and_hms(2024, 6, 3, 9, 45, 0).unwrap();
        assert_eq!(scheduled.reminder.trigger_at, trigger_at);
        assert_eq!(scheduled.reminder.id, ScheduledReminder::make_id("r1", trigger_at));
        assert_eq!(f.channel.scheduled().await.len(), 1);
        assert_eq!(f.api.notifications().await.len(), 1);

        let again = f.scheduler.schedule_reminder(&r, 15).await.unwrap();
        assert_eq!(again, ReminderOutcome::Skipped(SkipReason::AlreadyScheduled));
        assert_eq!(f.channel.scheduled().await.len(), 1);
    }

    #[tokio::test]
    async fn changed_lead_replaces_stale_reminder() {
        let f = fixture(PermissionStatus::Granted);
        f.scheduler.request_permission().await.unwrap();
        let r = reservation("r1", 10, ReservationStatus::Approved);
        f.scheduler.schedule_reminder(&r, 15).await.unwrap();
        f.scheduler.schedule_reminder(&r, 30).await.unwrap();

        let scheduled = f.channel.scheduled().await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].at, Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn rescheduling_stores_one_reminder_record() {
        let f = fixture(PermissionStatus::Granted);
        f.scheduler.request_permission().await.unwrap();
        f.api.insert(reservation("r1", 10, ReservationStatus::Approved)).await;

        f.scheduler.reschedule_reminders("alice", 15).await.unwrap();
        f.clock.advance(Duration::minutes(10));
        f.scheduler.reschedule_reminders("alice", 15).await.unwrap();
        f.clock.advance(Duration::minutes(10));
        let outcomes = f.scheduler.reschedule_reminders("alice", 15).await.unwrap();

        assert!(matches!(outcomes.as_slice(), [ReminderOutcome::Scheduled(Ok(_))]));
        assert_eq!(f.channel.scheduled().await.len(), 1);
        assert_eq!(f.api.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_alert() {
        let f = fixture(PermissionStatus::Granted);
        f.scheduler.request_permission().await.unwrap();
        f.api.set_reject_notifications(true);
        let r = reservation("r1", 10, ReservationStatus::Approved);
        let outcome = f.scheduler.schedule_reminder(&r, 15).await.unwrap();
        assert!(matches!(outcome, ReminderOutcome::Scheduled(Err(_))));
        assert_eq!(f.channel.scheduled().await.len(), 1);
    }

    #[tokio::test]
    async fn denied_permission_is_reported_once_and_scheduling_is_a_no_op() {
        let f = fixture(PermissionStatus::Denied);
        assert!(matches!(
            f.scheduler.request_permission().await,
            Err(EngineError::PermissionDenied)
        ));
        assert!(f.scheduler.request_permission().await.is_err());
        assert_eq!(f.channel.permission_requests().await, 1);

        let r = reservation("r1", 10, ReservationStatus::Approved);
        let outcome = f.scheduler.schedule_reminder(&r, 15).await.unwrap();
        assert_eq!(outcome, ReminderOutcome::Skipped(SkipReason::PermissionNotGranted));
    }

    #[tokio::test]
    async fn status_change_respects_preferences() {
        let f = fixture(PermissionStatus::Granted);
        f.scheduler.request_permission().await.unwrap();
        let change = ReservationChange {
            reservation_id: "r1".into(),
            old_status: ReservationStatus::Pending,
            new_status: ReservationStatus::Rejected,
            reservation: reservation("r1", 10, ReservationStatus::Rejected),
        };

        let outcome = f.scheduler.on_status_change(&change).await.unwrap();
        assert!(matches!(outcome, AlertOutcome::Recorded { delivered: true, .. }));
        assert_eq!(f.channel.shown().await.len(), 1);
        assert_eq!(f.channel.vibrations().await, 1);

        f.scheduler
            .preferences
            .update(
                "alice",
                &roombook_core::PreferencePatch {
                    status_changes: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let outcome = f.scheduler.on_status_change(&change).await.unwrap();
        assert!(matches!(outcome, AlertOutcome::Recorded { delivered: false, .. }));
        assert_eq!(f.channel.shown().await.len(), 1);
        assert_eq!(f.scheduler.inbox.list("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn activation_is_ignored() {
        let f = fixture(PermissionStatus::Granted);
        let change = ReservationChange {
            reservation_id: "r1".into(),
            old_status: ReservationStatus::Approved,
            new_status: ReservationStatus::Active,
            reservation: reservation("r1", 10, ReservationStatus::Active),
        };
        assert_eq!(f.scheduler.on_status_change(&change).await.unwrap(), AlertOutcome::Ignored);
    }
}
