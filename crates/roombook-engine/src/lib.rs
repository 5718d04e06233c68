//! Reservation lifecycle, reminders and offline sync.
//!
//! This crate holds the services of a signed-in user:
//! - conflict detection and the reservation state machine
//! - recurring reservation expansion
//! - the reservation change monitor
//! - reminder scheduling and status-change alerts
//! - the notification inbox and preferences
//! - the offline cache and pending-write queue they all read through
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use roombook_core::SystemClock;
//! use roombook_engine::{EngineConfig, Session};
//! use roombook_providers::{InMemoryApi, MemoryStore, RecordingChannel};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = Session::new(
//!         "alice",
//!         Arc::new(InMemoryApi::new()),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(RecordingChannel::default()),
//!         Arc::new(SystemClock),
//!         EngineConfig::default(),
//!     );
//!     let monitor = session.start().await;
//!     monitor.poll_now().await;
//!     session.sign_out(false).await.ok();
//! }
//! ```

mod cache;
mod config;
mod error;
mod events;
mod inbox;
mod monitor;
mod pending;
mod preferences;
mod recurrence;
mod reminders;
mod resolver;
mod session;
mod sync;

pub use cache::{CACHE_PREFIX, CacheSource, Cached, CachedResource};
pub use config::{CacheConfig, EngineConfig, MonitorConfig, ReminderConfig};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, Subscription};
pub use inbox::{NotificationInbox, PersistenceWarning};
pub use monitor::{
    MonitorCommand, MonitorHandle, MonitorState, ReservationMonitor, SharedMonitorState,
    diff_statuses,
};
pub use pending::{PENDING_PREFIX, PendingOp, PendingWrite, PendingWrites};
pub use preferences::{PreferenceService, PreferenceUpdate, is_quiet_time, should_notify};
pub use recurrence::{
    MAX_OCCURRENCES, RecurringReport, SkipCause, SkippedOccurrence, expand_in,
};
pub use reminders::{AlertOutcome, ReminderOutcome, ReminderScheduler, Scheduled, SkipReason};
pub use resolver::{ApproveOutcome, ConflictResolver, CreateOutcome};
pub use session::Session;
pub use sync::{FlushFailure, FlushReport, SyncCoordinator, namespaces};
