//! Per-user service wiring.
//!
//! A [`Session`] owns every engine service for one signed-in user. It is
//! built at sign-in and torn down with [`Session::sign_out`]; nothing in the
//! engine is global.

use std::sync::Arc;

use roombook_core::{Clock, ReservationChange};
use roombook_providers::{DeliveryChannel, KeyValueStore, RemoteApi};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::events::EventBus;
use crate::inbox::NotificationInbox;
use crate::monitor::{MonitorHandle, ReservationMonitor};
use crate::preferences::PreferenceService;
use crate::reminders::ReminderScheduler;
use crate::resolver::ConflictResolver;
use crate::sync::{FlushReport, SyncCoordinator};

/// The services of one signed-in user.
pub struct Session {
    user_id: String,
    config: EngineConfig,
    sync: Arc<SyncCoordinator>,
    resolver: ConflictResolver,
    preferences: PreferenceService,
    inbox: NotificationInbox,
    monitor: ReservationMonitor,
    reminders: Arc<ReminderScheduler>,
    events: EventBus<ReservationChange>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn KeyValueStore>,
        channel: Arc<dyn DeliveryChannel>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let sync = Arc::new(SyncCoordinator::new(api, store, clock, config.cache.clone()));
        let events = EventBus::new();
        Self {
            user_id: user_id.into(),
            resolver: ConflictResolver::new(Arc::clone(&sync)),
            preferences: PreferenceService::new(Arc::clone(&sync))
                .with_default_lead_minutes(config.reminders.default_lead_minutes),
            inbox: NotificationInbox::new(Arc::clone(&sync)),
            monitor: ReservationMonitor::new(
                Arc::clone(&sync),
                config.monitor.clone(),
                events.clone(),
            ),
            reminders: Arc::new(ReminderScheduler::new(
                Arc::clone(&sync),
                channel,
                config.reminders.clone(),
            )),
            events,
            dispatcher: Mutex::new(None),
            config,
            sync,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn preferences(&self) -> &PreferenceService {
        &self.preferences
    }

    pub fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }

    pub fn monitor(&self) -> &ReservationMonitor {
        &self.monitor
    }

    pub fn reminders(&self) -> &Arc<ReminderScheduler> {
        &self.reminders
    }

    /// The bus reservation changes are published on.
    pub fn events(&self) -> &EventBus<ReservationChange> {
        &self.events
    }

    /// Starts background work: replays queued writes, reschedules reminders
    /// and starts the monitor with change events routed to the reminder
    /// scheduler.
    ///
    /// Failures of the first two steps are logged; the monitor is started
    /// regardless.
    pub async fn start(&self) -> MonitorHandle {
        match self.sync.flush().await {
            Ok(report) if !report.is_complete() => {
                warn!(failed = report.failed.len(), "Some queued writes were not applied");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to replay queued writes"),
        }
        if let Err(e) = self.reminders.reschedule_from_preferences(&self.user_id).await {
            warn!(error = %e, "Failed to reschedule reminders");
        }

        let mut dispatcher = self.dispatcher.lock().await;
        if let Some(previous) = dispatcher.take() {
            previous.abort();
        }
        let changes = self.events.subscribe();
        let reminders = Arc::clone(&self.reminders);
        *dispatcher = Some(tokio::spawn(async move { reminders.run(changes).await }));
        drop(dispatcher);

        info!(user_id = %self.user_id, "Session started");
        self.monitor.initialize(&self.user_id).await
    }

    /// Replays queued writes.
    pub async fn sync_now(&self) -> EngineResult<FlushReport> {
        self.sync.flush().await
    }

    /// Stops background work and cancels every scheduled alert. With
    /// `clear_cache` the local cache and the write queue are dropped too.
    pub async fn sign_out(&self, clear_cache: bool) -> EngineResult<()> {
        self.monitor.destroy().await;
        if let Some(task) = self.dispatcher.lock().await.take() {
            task.abort();
        }
        self.reminders.cancel_all().await?;
        if clear_cache {
            self.sync.clear().await?;
        }
        info!(user_id = %self.user_id, clear_cache, "Signed out");
        Ok(())
    }
}
