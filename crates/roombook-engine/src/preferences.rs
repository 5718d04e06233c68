//! Notification preference engine.
//!
//! [`is_quiet_time`] and [`should_notify`] are pure functions over stored
//! preferences. [`PreferenceService`] reads and writes the preferences
//! through the sync coordinator.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone};
use roombook_core::{
    NotificationKind, NotificationPreference, PreferencePatch, minutes_since_midnight,
};
use tracing::{debug, info, warn};

use crate::cache::Cached;
use crate::error::{EngineError, EngineResult};
use crate::pending::PendingOp;
use crate::sync::SyncCoordinator;

/// Returns true if `now` falls inside the quiet window `[start, end]`.
///
/// Times are compared as minutes since midnight. When `start > end` the
/// window wraps midnight. Both bounds are inclusive.
pub fn is_quiet_time(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    let now = minutes_since_midnight(now);
    let start = minutes_since_midnight(start);
    let end = minutes_since_midnight(end);
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

/// Decides whether a notification of `kind` may be delivered at `now`.
///
/// `now` is evaluated on its own wall clock.
pub fn should_notify<Tz: TimeZone>(
    kind: NotificationKind,
    prefs: &NotificationPreference,
    now: &DateTime<Tz>,
) -> bool {
    if kind == NotificationKind::System {
        return true;
    }
    if !prefs.push_enabled {
        return false;
    }
    if prefs.quiet_hours_enabled
        && is_quiet_time(now.time(), prefs.quiet_hours_start, prefs.quiet_hours_end)
    {
        return false;
    }
    match kind {
        NotificationKind::Approved | NotificationKind::Rejected | NotificationKind::Cancelled => {
            prefs.status_changes
        }
        NotificationKind::Reminder | NotificationKind::Expiring => prefs.reminder_enabled,
        NotificationKind::System => true,
    }
}

/// Result of [`PreferenceService::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceUpdate {
    pub preferences: NotificationPreference,
    /// True if the API was unreachable and the patch waits in the queue.
    pub queued: bool,
}

/// Reads and updates per-user preferences.
#[derive(Clone)]
pub struct PreferenceService {
    sync: Arc<SyncCoordinator>,
    /// Returned for users without stored preferences.
    defaults: NotificationPreference,
}

impl PreferenceService {
    pub fn new(sync: Arc<SyncCoordinator>) -> Self {
        Self {
            sync,
            defaults: NotificationPreference::default(),
        }
    }

    /// Sets the reminder lead of the default preferences.
    pub fn with_default_lead_minutes(mut self, minutes: u32) -> Self {
        self.defaults.reminder_minutes = minutes;
        self
    }

    /// Returns the preferences of `user_id`, cache-first.
    ///
    /// Defaults are returned (and cached) when the API has none stored. A
    /// write still queued locally is applied on top of whatever the API
    /// returned.
    pub async fn get(&self, user_id: &str) -> EngineResult<NotificationPreference> {
        let api = Arc::clone(self.sync.api());
        let defaults = self.defaults.clone();
        let resource = self.sync.preferences();
        let fetched = resource
            .get_or_fetch(user_id, || async move {
                api.get_preferences(user_id)
                    .await
                    .map(|stored| stored.unwrap_or(defaults))
            })
            .await;

        let mut prefs = match fetched {
            Ok(Cached { value, .. }) => value,
            Err(EngineError::Network(e)) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "Preferences unavailable offline, using defaults"
                );
                self.defaults.clone()
            }
            Err(e) => return Err(e),
        };

        let op = PendingOp::PatchPreferences {
            user_id: user_id.to_string(),
        };
        if let Some(pending) = self.sync.pending().get(&op).await? {
            let patch: PreferencePatch =
                serde_json::from_value(serde_json::Value::Object(pending.payload))?;
            patch.apply_to(&mut prefs);
        }
        Ok(prefs)
    }

    /// Applies `patch` to the preferences of `user_id`.
    ///
    /// An invalid patch is rejected before anything is written. The local
    /// cache is updated first. The PATCH is then sent to the API; if it is
    /// unreachable the patch is queued and the locally merged preferences
    /// are returned.
    pub async fn update(
        &self,
        user_id: &str,
        patch: &PreferencePatch,
    ) -> EngineResult<PreferenceUpdate> {
        patch.validate()?;
        let mut local = self.get(user_id).await?;
        if patch.is_empty() {
            return Ok(PreferenceUpdate {
                preferences: local,
                queued: false,
            });
        }
        patch.apply_to(&mut local);
        let resource = self.sync.preferences();
        resource.put(user_id, &local).await?;

        let payload = patch.to_object();
        match self.sync.api().patch_preferences(user_id, &payload).await {
            Ok(stored) => {
                resource.put(user_id, &stored).await?;
                info!(user_id = %user_id, "Preferences updated");
                Ok(PreferenceUpdate {
                    preferences: stored,
                    queued: false,
                })
            }
            Err(e) if e.is_network() => {
                let now = self.sync.clock().now();
                self.sync
                    .pending()
                    .enqueue(
                        PendingOp::PatchPreferences {
                            user_id: user_id.to_string(),
                        },
                        payload,
                        now,
                    )
                    .await?;
                debug!(user_id = %user_id, error = %e, "Preferences update queued");
                Ok(PreferenceUpdate {
                    preferences: local,
                    queued: true,
                })
            }
            Err(e) => {
                // Roll back the optimistic write so the next read refetches.
                resource.invalidate(user_id).await?;
                Err(e.into())
            }
        }
    }
}
