//! Core types: reservations, notifications, preferences, time

pub mod notification;
pub mod preference;
pub mod recurrence;
pub mod reservation;
pub mod time;
pub mod tracing;

pub use notification::{Notification, NotificationKind, ReservationChange, ScheduledReminder};
pub use preference::{NotificationPreference, PreferencePatch, parse_hhmm};
pub use recurrence::{RecurrenceKind, RecurrencePattern};
pub use reservation::{
    Actor, Reservation, ReservationDraft, ReservationStatus, StatusTransition, ValidationError,
    find_conflicts,
};
pub use time::{Clock, Interval, InvalidInterval, ManualClock, SystemClock, minutes_since_midnight};
pub use crate::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
