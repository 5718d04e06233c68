//! Push-delivery channel.
//!
//! A [`DeliveryChannel`] shows alerts immediately or at a later instant and
//! drives badge/vibration feedback. The engine only sees this trait; the
//! concrete channel is chosen when a session is built.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::api::BoxFuture;

/// Whether the user allowed alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Never asked.
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

/// The content of one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub title: String,
    pub body: String,
    /// Free-form data handed back when the alert is opened.
    #[serde(default)]
    pub data: serde_json::Value,
    pub sound: bool,
}

impl AlertPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
            sound: true,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_sound(mut self, sound: bool) -> Self {
        self.sound = sound;
        self
    }
}

/// Identifier returned by the channel for a shown or scheduled alert.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by a delivery channel.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("alerts are not permitted")]
    PermissionDenied,

    #[error("trigger time {0} is not in the future")]
    TriggerInPast(DateTime<Utc>),

    #[error("delivery backend failed: {0}")]
    Backend(String),
}

/// A specialized Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// A channel able to display alerts now or later.
pub trait DeliveryChannel: Send + Sync {
    /// Returns a short name for logs.
    fn name(&self) -> &str;

    /// Asks the user for permission. Returns the resulting status.
    fn request_permission(&self) -> BoxFuture<'_, DeliveryResult<PermissionStatus>>;

    fn permission_status(&self) -> BoxFuture<'_, DeliveryResult<PermissionStatus>>;

    fn show_now(&self, alert: &AlertPayload) -> BoxFuture<'_, DeliveryResult<DeliveryId>>;

    /// Schedules `alert` for `at`, which must lie in the future.
    fn schedule_at(
        &self,
        alert: &AlertPayload,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, DeliveryResult<DeliveryId>>;

    /// Cancels one scheduled alert. Unknown ids are ignored.
    fn cancel(&self, id: &DeliveryId) -> BoxFuture<'_, DeliveryResult<()>>;

    /// Cancels every scheduled alert.
    fn cancel_all(&self) -> BoxFuture<'_, DeliveryResult<()>>;

    fn set_badge_count(&self, count: u32) -> BoxFuture<'_, DeliveryResult<()>>;

    fn vibrate(&self) -> BoxFuture<'_, DeliveryResult<()>>;
}

/// A scheduled alert as seen by [`RecordingChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSchedule {
    pub id: DeliveryId,
    pub alert: AlertPayload,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct Recording {
    permission: PermissionStatus,
    answer: PermissionStatus,
    permission_requests: usize,
    shown: Vec<AlertPayload>,
    scheduled: BTreeMap<DeliveryId, RecordedSchedule>,
    badge: Option<u32>,
    vibrations: usize,
    failing: bool,
    next_id: u64,
}

/// A channel that records every call instead of displaying anything.
///
/// Used by tests and by the CLI in `--dry-run` mode.
#[derive(Debug)]
pub struct RecordingChannel {
    inner: Mutex<Recording>,
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new(PermissionStatus::Granted)
    }
}

impl RecordingChannel {
    /// Creates a channel that answers permission requests with `answer`.
    pub fn new(answer: PermissionStatus) -> Self {
        Self {
            inner: Mutex::new(Recording {
                permission: PermissionStatus::Undetermined,
                answer,
                permission_requests: 0,
                shown: Vec::new(),
                scheduled: BTreeMap::new(),
                badge: None,
                vibrations: 0,
                failing: false,
                next_id: 0,
            }),
        }
    }

    /// Makes `show_now` and `schedule_at` fail while `failing` is true.
    pub async fn set_failing(&self, failing: bool) {
        self.inner.lock().await.failing = failing;
    }

    pub async fn shown(&self) -> Vec<AlertPayload> {
        self.inner.lock().await.shown.clone()
    }

    /// Currently scheduled alerts, ordered by trigger time.
    pub async fn scheduled(&self) -> Vec<RecordedSchedule> {
        let mut list: Vec<_> = self.inner.lock().await.scheduled.values().cloned().collect();
        list.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub async fn badge(&self) -> Option<u32> {
        self.inner.lock().await.badge
    }

    pub async fn vibrations(&self) -> usize {
        self.inner.lock().await.vibrations
    }

    pub async fn permission_requests(&self) -> usize {
        self.inner.lock().await.permission_requests
    }
}

impl DeliveryChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn request_permission(&self) -> BoxFuture<'_, DeliveryResult<PermissionStatus>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.permission_requests += 1;
            inner.permission = inner.answer;
            Ok(inner.permission)
        })
    }

    fn permission_status(&self) -> BoxFuture<'_, DeliveryResult<PermissionStatus>> {
        Box::pin(async move { Ok(self.inner.lock().await.permission) })
    }

    fn show_now(&self, alert: &AlertPayload) -> BoxFuture<'_, DeliveryResult<DeliveryId>> {
        let alert = alert.clone();
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.failing {
                return Err(DeliveryError::Backend("recording channel set to fail".into()));
            }
            if !inner.permission.is_granted() {
                return Err(DeliveryError::PermissionDenied);
            }
            inner.next_id += 1;
            let id = DeliveryId(format!("shown-{}", inner.next_id));
            inner.shown.push(alert);
            Ok(id)
        })
    }

    fn schedule_at(
        &self,
        alert: &AlertPayload,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, DeliveryResult<DeliveryId>> {
        let alert = alert.clone();
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.failing {
                return Err(DeliveryError::Backend("recording channel set to fail".into()));
            }
            if !inner.permission.is_granted() {
                return Err(DeliveryError::PermissionDenied);
            }
            inner.next_id += 1;
            let id = DeliveryId(format!("scheduled-{}", inner.next_id));
            inner.scheduled.insert(
                id.clone(),
                RecordedSchedule {
                    id: id.clone(),
                    alert,
                    at,
                },
            );
            Ok(id)
        })
    }

    fn cancel(&self, id: &DeliveryId) -> BoxFuture<'_, DeliveryResult<()>> {
        let id = id.clone();
        Box::pin(async move {
            self.inner.lock().await.scheduled.remove(&id);
            Ok(())
        })
    }

    fn cancel_all(&self) -> BoxFuture<'_, DeliveryResult<()>> {
        Box::pin(async move {
            self.inner.lock().await.scheduled.clear();
            Ok(())
        })
    }

    fn set_badge_count(&self, count: u32) -> BoxFuture<'_, DeliveryResult<()>> {
        Box::pin(async move {
            self.inner.lock().await.badge = Some(count);
            Ok(())
        })
    }

    fn vibrate(&self) -> BoxFuture<'_, DeliveryResult<()>> {
        Box::pin(async move {
            self.inner.lock().await.vibrations += 1;
            Ok(())
        })
    }
}

#[cfg(feature = "desktop")]
pub use desktop::{DesktopChannel, DesktopConfig};

#[cfg(feature = "desktop")]
mod desktop {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use notify_rust::Notification;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tracing::{debug, error, info};

    use super::{
        AlertPayload, DeliveryChannel, DeliveryError, DeliveryId, DeliveryResult, PermissionStatus,
    };
    use crate::api::BoxFuture;

    /// Settings for [`DesktopChannel`].
    #[derive(Debug, Clone)]
    pub struct DesktopConfig {
        pub app_name: String,
        pub timeout_secs: u32,
        pub icon_path: Option<String>,
    }

    impl Default for DesktopConfig {
        fn default() -> Self {
            Self {
                app_name: "roombook".to_string(),
                timeout_secs: 10,
                icon_path: None,
            }
        }
    }

    impl DesktopConfig {
        pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
            self.app_name = name.into();
            self
        }

        pub fn with_timeout(mut self, secs: u32) -> Self {
            self.timeout_secs = secs;
            self
        }

        pub fn with_icon_path(mut self, path: impl Into<String>) -> Self {
            self.icon_path = Some(path.into());
            self
        }
    }

    /// Desktop notifications through the platform notification daemon.
    ///
    /// Scheduled alerts are held as local timer tasks, so they only fire
    /// while the process runs. Desktops have no badge or vibration; those
    /// calls are accepted and logged.
    pub struct DesktopChannel {
        config: Arc<DesktopConfig>,
        timers: Arc<Mutex<HashMap<DeliveryId, JoinHandle<()>>>>,
        next_id: AtomicU64,
    }

    impl DesktopChannel {
        pub fn new(config: DesktopConfig) -> Self {
            Self {
                config: Arc::new(config),
                timers: Arc::new(Mutex::new(HashMap::new())),
                next_id: AtomicU64::new(0),
            }
        }

        fn next_id(&self) -> DeliveryId {
            DeliveryId(format!("desktop-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
        }
    }

    impl Drop for DesktopChannel {
        fn drop(&mut self) {
            if let Ok(timers) = self.timers.try_lock() {
                for handle in timers.values() {
                    handle.abort();
                }
            }
        }
    }

    fn show(config: &DesktopConfig, alert: &AlertPayload) -> DeliveryResult<()> {
        let mut notification = Notification::new();
        notification
            .appname(&config.app_name)
            .summary(&alert.title)
            .body(&alert.body)
            .timeout(Duration::from_secs(config.timeout_secs as u64));

        if let Some(ref icon) = config.icon_path {
            notification.icon(icon);
        }
        if alert.sound {
            notification.sound_name("message-new-instant");
        }

        match notification.show() {
            Ok(_) => {
                info!(title = %alert.title, "Notification sent");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, title = %alert.title, "Failed to send notification");
                Err(DeliveryError::Backend(e.to_string()))
            }
        }
    }

    impl DeliveryChannel for DesktopChannel {
        fn name(&self) -> &str {
            "desktop"
        }

        fn request_permission(&self) -> BoxFuture<'_, DeliveryResult<PermissionStatus>> {
            Box::pin(async { Ok(PermissionStatus::Granted) })
        }

        fn permission_status(&self) -> BoxFuture<'_, DeliveryResult<PermissionStatus>> {
            Box::pin(async { Ok(PermissionStatus::Granted) })
        }

        fn show_now(&self, alert: &AlertPayload) -> BoxFuture<'_, DeliveryResult<DeliveryId>> {
            let alert = alert.clone();
            Box::pin(async move {
                show(&self.config, &alert)?;
                Ok(self.next_id())
            })
        }

        fn schedule_at(
            &self,
            alert: &AlertPayload,
            at: DateTime<Utc>,
        ) -> BoxFuture<'_, DeliveryResult<DeliveryId>> {
            let alert = alert.clone();
            Box::pin(async move {
                let delay = (at - Utc::now())
                    .to_std()
                    .map_err(|_| DeliveryError::TriggerInPast(at))?;
                let id = self.next_id();

                let config = Arc::clone(&self.config);
                let timers = Arc::clone(&self.timers);
                let task_id = id.clone();
                // Held until the handle is stored; the timer removes its own
                // entry and must not run ahead of the insert.
                let mut guard = self.timers.lock().await;
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    timers.lock().await.remove(&task_id);
                    let _ = show(&config, &alert);
                });
                guard.insert(id.clone(), handle);
                drop(guard);

                debug!(id = %id, at = %at, "Scheduled desktop alert");
                Ok(id)
            })
        }

        fn cancel(&self, id: &DeliveryId) -> BoxFuture<'_, DeliveryResult<()>> {
            let id = id.clone();
            Box::pin(async move {
                if let Some(handle) = self.timers.lock().await.remove(&id) {
                    handle.abort();
                    debug!(id = %id, "Cancelled desktop alert");
                }
                Ok(())
            })
        }

        fn cancel_all(&self) -> BoxFuture<'_, DeliveryResult<()>> {
            Box::pin(async move {
                let mut timers = self.timers.lock().await;
                let count = timers.len();
                for (_, handle) in timers.drain() {
                    handle.abort();
                }
                debug!(count, "Cancelled all desktop alerts");
                Ok(())
            })
        }

        fn set_badge_count(&self, count: u32) -> BoxFuture<'_, DeliveryResult<()>> {
            Box::pin(async move {
                debug!(count, "Badge count not supported on desktop");
                Ok(())
            })
        }

        fn vibrate(&self) -> BoxFuture<'_, DeliveryResult<()>> {
            Box::pin(async {
                debug!("Vibration not supported on desktop");
                Ok(())
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn fired_timer_leaves_no_entry() {
            let channel = DesktopChannel::new(DesktopConfig::default());
            let alert = AlertPayload::new("Room A", "Starts now");
            let at = Utc::now() + chrono::Duration::milliseconds(5);

            let id = channel.schedule_at(&alert, at).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;

            assert!(!channel.timers.lock().await.contains_key(&id));
        }

        #[tokio::test]
        async fn cancel_removes_pending_timer() {
            let channel = DesktopChannel::new(DesktopConfig::default());
            let alert = AlertPayload::new("Room A", "Starts at 09:00");
            let at = Utc::now() + chrono::Duration::hours(1);

            let id = channel.schedule_at(&alert, at).await.unwrap();
            assert!(channel.timers.lock().await.contains_key(&id));
            channel.cancel(&id).await.unwrap();
            assert!(channel.timers.lock().await.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn recording_requires_permission() {
        let channel = RecordingChannel::default();
        let alert = AlertPayload::new("Room A", "Starts at 09:00");

        assert!(matches!(
            channel.show_now(&alert).await,
            Err(DeliveryError::PermissionDenied)
        ));
        assert_eq!(
            channel.request_permission().await.unwrap(),
            PermissionStatus::Granted
        );
        channel.show_now(&alert).await.unwrap();
        assert_eq!(channel.shown().await, vec![alert]);
    }

    #[tokio::test]
    async fn recording_schedule_and_cancel() {
        let channel = RecordingChannel::default();
        channel.request_permission().await.unwrap();
        let at = Utc::now() + Duration::hours(1);

        let a = channel
            .schedule_at(&AlertPayload::new("a", ""), at)
            .await
            .unwrap();
        channel
            .schedule_at(&AlertPayload::new("b", ""), at + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(channel.scheduled().await.len(), 2);

        channel.cancel(&a).await.unwrap();
        let left = channel.scheduled().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].alert.title, "b");

        channel.cancel_all().await.unwrap();
        assert!(channel.scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn recording_denied_answer() {
        let channel = RecordingChannel::new(PermissionStatus::Denied);
        assert_eq!(
            channel.request_permission().await.unwrap(),
            PermissionStatus::Denied
        );
        assert_eq!(channel.permission_requests().await, 1);
        assert!(
            channel
                .schedule_at(&AlertPayload::new("a", ""), Utc::now() + Duration::hours(1))
                .await
                .is_err()
        );
    }
}
