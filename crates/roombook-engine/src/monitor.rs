//! Reservation change monitor.
//!
//! Polls the current user's reservations and raises a
//! [`ReservationChange`] for every reservation whose status differs from the
//! last observation. The first observation of an id never raises.
//!
//! The monitor runs as one background task with:
//! - an immediate first poll, then one poll per interval
//! - exponential backoff after failed polls
//! - a [`MonitorHandle`] to request a poll or stop the task

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use roombook_core::{Reservation, ReservationChange, ReservationStatus};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::events::EventBus;
use crate::sync::SyncCoordinator;

/// Commands understood by the monitor task.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Poll immediately; the reply carries the number of changes raised,
    /// or `None` if the poll failed.
    PollNow(oneshot::Sender<Option<usize>>),
    Stop,
}

/// Observable monitor state.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub user_id: Option<String>,
    /// Last observed status per reservation id.
    pub statuses: HashMap<String, ReservationStatus>,
    pub consecutive_failures: u32,
    pub polls: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MonitorState {
    fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }
}

/// Shared monitor state.
pub type SharedMonitorState = Arc<RwLock<MonitorState>>;

/// Updates `statuses` from `reservations` and returns the transitions.
///
/// Ids seen for the first time are recorded without raising.
pub fn diff_statuses(
    statuses: &mut HashMap<String, ReservationStatus>,
    reservations: &[Reservation],
) -> Vec<ReservationChange> {
    let mut changes = Vec::new();
    for r in reservations {
        if let Some(old) = statuses.insert(r.id.clone(), r.status)
            && old != r.status
        {
            changes.push(ReservationChange {
                reservation_id: r.id.clone(),
                old_status: old,
                new_status: r.status,
                reservation: r.clone(),
            });
        }
    }
    changes
}

/// Handle for sending commands to a running monitor.
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    command_tx: mpsc::Sender<MonitorCommand>,
    state: SharedMonitorState,
}

impl MonitorHandle {
    /// Polls now and waits for the result.
    ///
    /// Returns the number of changes raised, or `None` if the poll failed or
    /// the monitor has stopped.
    pub async fn poll_now(&self) -> Option<usize> {
        let (tx, rx) = oneshot::channel();
        self.command_tx.send(MonitorCommand::PollNow(tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Asks the task to stop. Does not wait.
    pub async fn stop(&self) {
        let _ = self.command_tx.send(MonitorCommand::Stop).await;
    }

    pub async fn state(&self) -> MonitorState {
        self.state.read().await.clone()
    }
}

struct RunningMonitor {
    handle: MonitorHandle,
    join: JoinHandle<()>,
}

/// Watches one user's reservations for status changes.
pub struct ReservationMonitor {
    sync: Arc<SyncCoordinator>,
    config: MonitorConfig,
    events: EventBus<ReservationChange>,
    state: SharedMonitorState,
    running: Mutex<Option<RunningMonitor>>,
}

impl ReservationMonitor {
    pub fn new(
        sync: Arc<SyncCoordinator>,
        config: MonitorConfig,
        events: EventBus<ReservationChange>,
    ) -> Self {
        Self {
            sync,
            config,
            events,
            state: Arc::new(RwLock::new(MonitorState::default())),
            running: Mutex::new(None),
        }
    }

    /// The bus change events are published on.
    pub fn events(&self) -> &EventBus<ReservationChange> {
        &self.events
    }

    /// Starts monitoring `user_id`, tearing down any previous task first.
    pub async fn initialize(&self, user_id: &str) -> MonitorHandle {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            stop_task(previous).await;
        }
        *self.state.write().await = MonitorState::for_user(user_id);

        let (command_tx, command_rx) = mpsc::channel(16);
        let handle = MonitorHandle {
            command_tx,
            state: Arc::clone(&self.state),
        };
        let task = MonitorTask {
            user_id: user_id.to_string(),
            sync: Arc::clone(&self.sync),
            config: self.config.clone(),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
        };
        let join = tokio::spawn(task.run(command_rx));
        info!(
            user_id = %user_id,
            interval_secs = self.config.poll_interval.as_secs(),
            "Reservation monitor started"
        );

        *running = Some(RunningMonitor {
            handle: handle.clone(),
            join,
        });
        handle
    }

    /// Stops the task and forgets every observed status.
    pub async fn destroy(&self) {
        if let Some(previous) = self.running.lock().await.take() {
            stop_task(previous).await;
            info!("Reservation monitor stopped");
        }
        *self.state.write().await = MonitorState::default();
    }

    /// Returns the handle of the running task.
    pub async fn handle(&self) -> Option<MonitorHandle> {
        self.running.lock().await.as_ref().map(|r| r.handle.clone())
    }

    pub async fn is_running(&self) -> bool {
        match self.running.lock().await.as_ref() {
            Some(r) => !r.join.is_finished(),
            None => false,
        }
    }

    pub async fn state(&self) -> MonitorState {
        self.state.read().await.clone()
    }
}

async fn stop_task(running: RunningMonitor) {
    running.handle.stop().await;
    if let Err(e) = running.join.await
        && !e.is_cancelled()
    {
        warn!(error = %e, "Monitor task ended abnormally");
    }
}

struct MonitorTask {
    user_id: String,
    sync: Arc<SyncCoordinator>,
    config: MonitorConfig,
    events: EventBus<ReservationChange>,
    state: SharedMonitorState,
}

impl MonitorTask {
    async fn run(self, mut command_rx: mpsc::Receiver<MonitorCommand>) {
        self.poll().await;

        loop {
            let failures = self.state.read().await.consecutive_failures;
            let delay = self.config.next_delay(failures);
            debug!(delay_secs = delay.as_secs(), failures, "Scheduling next poll");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.poll().await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(MonitorCommand::PollNow(reply)) => {
                            debug!("Received PollNow command");
                            let _ = reply.send(self.poll().await);
                        }
                        Some(MonitorCommand::Stop) | None => {
                            debug!("Monitor stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Runs one poll. Returns the number of changes raised, `None` on failure.
    async fn poll(&self) -> Option<usize> {
        let now = self.sync.clock().now();
        let result = self.sync.api().list_user_reservations(&self.user_id).await;

        let mut state = self.state.write().await;
        state.polls += 1;
        state.last_poll = Some(now);
        let reservations = match result {
            Ok(list) => list,
            Err(e) => {
                state.consecutive_failures += 1;
                state.last_error = Some(e.to_string());
                warn!(
                    user_id = %self.user_id,
                    error = %e,
                    failures = state.consecutive_failures,
                    "Reservation poll failed"
                );
                return None;
            }
        };
        state.consecutive_failures = 0;
        state.last_error = None;
        let changes = diff_statuses(&mut state.statuses, &reservations);
        drop(state);

        if let Err(e) = self
            .sync
            .user_reservations()
            .put(&self.user_id, &reservations)
            .await
        {
            warn!(error = %e, "Failed to cache polled reservations");
        }

        let count = changes.len();
        for change in changes {
            info!(
                reservation_id = %change.reservation_id,
                old = %change.old_status,
                new = %change.new_status,
                "Reservation status changed"
            );
            self.events.publish(change);
        }
        debug!(count = reservations.len(), changes = count, "Reservation poll done");
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reservation(id: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: id.into(),
            room_id: "room-a".into(),
            user_id: "alice".into(),
            start: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
            status,
            purpose: None,
            recurrence_group_id: None,
            rejection_reason: None,
        }
    }

    #[test]
    fn first_observation_never_raises() {
        let mut statuses = HashMap::new();
        let changes = diff_statuses(
            &mut statuses,
            &[reservation("r1", ReservationStatus::Approved)],
        );
        assert!(changes.is_empty());
        assert_eq!(statuses.get("r1"), Some(&ReservationStatus::Approved));
    }

    #[test]
    fn status_change_raises_once() {
        let mut statuses = HashMap::new();
        diff_statuses(&mut statuses, &[reservation("r1", ReservationStatus::Pending)]);

        let changes = diff_statuses(
            &mut statuses,
            &[reservation("r1", ReservationStatus::Approved)],
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_status, ReservationStatus::Pending);
        assert_eq!(changes[0].new_status, ReservationStatus::Approved);

        let again = diff_statuses(
            &mut statuses,
            &[reservation("r1", ReservationStatus::Approved)],
        );
        assert!(again.is_empty());
    }
}
