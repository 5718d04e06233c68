//! Recurrence pattern types.

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// How often a recurring reservation repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
}

/// A recurrence rule applied once, at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub kind: RecurrenceKind,
    /// Selected weekdays; only meaningful for [`RecurrenceKind::Weekly`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<Weekday>,
    /// Exclusive end date (wall clock): occurrences start strictly before it.
    pub until: NaiveDate,
}

impl RecurrencePattern {
    pub fn daily(until: NaiveDate) -> Self {
        Self {
            kind: RecurrenceKind::Daily,
            weekdays: Vec::new(),
            until,
        }
    }

    pub fn weekly(weekdays: impl IntoIterator<Item = Weekday>, until: NaiveDate) -> Self {
        Self {
            kind: RecurrenceKind::Weekly,
            weekdays: weekdays.into_iter().collect(),
            until,
        }
    }

    pub fn monthly(until: NaiveDate) -> Self {
        Self {
            kind: RecurrenceKind::Monthly,
            weekdays: Vec::new(),
            until,
        }
    }
}
