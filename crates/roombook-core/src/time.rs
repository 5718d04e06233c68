//! Time types for reservations.
//!
//! This module provides [`Interval`] for representing a booked time range
//! (a half-open `[start, end)` interval in UTC), wall-clock helpers used by
//! quiet-hours evaluation, and the [`Clock`] abstraction every time-based
//! decision in the workspace goes through.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveTime, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when an interval's start is not strictly before its end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("interval start {start} must be before end {end}")]
pub struct InvalidInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A half-open time interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// Start of the interval (inclusive).
    pub start: DateTime<Utc>,
    /// End of the interval (exclusive).
    pub end: DateTime<Utc>,
}

impl Interval {
    /// Creates a new interval.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInterval`] if `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvalidInterval> {
        if start >= end {
            return Err(InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates an interval from a start time and a positive duration.
    pub fn from_duration(
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Self, InvalidInterval> {
        Self::new(start, start + duration)
    }

    /// Returns true if the two intervals share any instant.
    ///
    /// Touching intervals (`self.end == other.start`) do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Returns true if `instant` falls inside the interval.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Returns the length of the interval.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Returns the number of whole minutes elapsed since midnight.
pub fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Source of the current time.
///
/// Services take a clock instead of calling `Utc::now()` so that reminder
/// triggers, cancellation cut-offs and quiet hours can be evaluated against
/// a controlled instant.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the wall-clock offset used for quiet hours and recurrence.
    fn offset(&self) -> FixedOffset;

    /// Returns the current instant in the clock's wall-clock offset.
    fn local_now(&self) -> DateTime<FixedOffset> {
        self.now().with_timezone(&self.offset())
    }
}

/// The system clock, using the host's local offset for wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        Local::now().offset().fix()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    /// Creates a clock frozen at `now`, with a UTC wall clock.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            offset: Utc.fix(),
        }
    }

    /// Builder: set the wall-clock offset.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned lock still holds a valid instant.
        self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    #[test]
    fn interval_rejects_empty_and_inverted() {
        assert!(Interval::new(utc(10, 0), utc(10, 0)).is_err());
        assert!(Interval::new(utc(11, 0), utc(10, 0)).is_err());
        assert!(Interval::new(utc(10, 0), utc(11, 0)).is_ok());
    }

    #[test]
    fn interval_overlap_is_half_open() {
        let a = Interval::new(utc(10, 0), utc(11, 0)).unwrap();
        let b = Interval::new(utc(10, 30), utc(11, 30)).unwrap();
        let touching = Interval::new(utc(11, 0), utc(12, 0)).unwrap();
        let inside = Interval::new(utc(10, 15), utc(10, 45)).unwrap();

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(a.overlaps(&inside));
        assert!(!a.overlaps(&touching));
        assert!(!touching.overlaps(&a));
    }

    #[test]
    fn interval_contains_start_not_end() {
        let a = Interval::new(utc(10, 0), utc(11, 0)).unwrap();
        assert!(a.contains(utc(10, 0)));
        assert!(!a.contains(utc(11, 0)));
        assert_eq!(a.duration(), Duration::hours(1));
    }

    #[test]
    fn minutes_since_midnight_values() {
        assert_eq!(minutes_since_midnight(NaiveTime::from_hms_opt(0, 0, 0).unwrap()), 0);
        assert_eq!(minutes_since_midnight(NaiveTime::from_hms_opt(7, 0, 59).unwrap()), 420);
        assert_eq!(minutes_since_midnight(NaiveTime::from_hms_opt(23, 30, 0).unwrap()), 1410);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(utc(13, 0));
        assert_eq!(clock.now(), utc(13, 0));
        clock.advance(Duration::minutes(45));
        assert_eq!(clock.now(), utc(13, 45));
        clock.set(utc(8, 0));
        assert_eq!(clock.now(), utc(8, 0));
    }

    #[test]
    fn manual_clock_local_now_uses_offset() {
        let clock =
            ManualClock::new(utc(22, 30)).with_offset(FixedOffset::east_opt(3600).unwrap());
        assert_eq!(clock.local_now().time(), NaiveTime::from_hms_opt(23, 30, 0).unwrap());
    }
}
