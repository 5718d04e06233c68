//! Recurring reservation expander.
//!
//! A recurring request is expanded once, at booking time, into one draft
//! per occurrence. Occurrences keep the base's wall-clock time of day and
//! duration. Each occurrence is then booked independently: conflicting ones
//! are skipped and reported, the rest are created under a shared
//! recurrence-group id.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone, Utc, Weekday};
use roombook_core::{
    RecurrenceKind, RecurrencePattern, Reservation, ReservationDraft, ValidationError,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::resolver::{ConflictResolver, CreateOutcome};

/// Upper bound on the occurrences of one recurring request. Longer patterns
/// are rejected before anything is booked.
pub const MAX_OCCURRENCES: usize = 366;

/// Expands `draft` according to `pattern` on the wall clock of `tz`.
///
/// The pattern's end date is exclusive: no occurrence starts on it. The
/// base occurrence is included when it matches the pattern.
pub fn expand_in<Tz: TimeZone>(
    draft: &ReservationDraft,
    pattern: &RecurrencePattern,
    tz: &Tz,
) -> Result<Vec<ReservationDraft>, ValidationError> {
    draft.validate()?;
    let local_start = draft.start.with_timezone(tz);
    let base_date = local_start.date_naive();
    let time_of_day = local_start.time();
    let duration = draft.end - draft.start;

    if base_date >= pattern.until {
        return Err(ValidationError::new(
            "until",
            format!(
                "end date {} must be after the first occurrence {}",
                pattern.until, base_date
            ),
        ));
    }

    let dates = occurrence_dates(base_date, pattern)?;
    let mut drafts = Vec::with_capacity(dates.len());
    for date in dates {
        let Some(local) = tz.from_local_datetime(&date.and_time(time_of_day)).earliest() else {
            // The wall-clock time does not exist on this date (DST gap).
            debug!(date = %date, "Skipping nonexistent local time");
            continue;
        };
        let start: DateTime<Utc> = local.with_timezone(&Utc);
        drafts.push(ReservationDraft {
            start,
            end: start + duration,
            ..draft.clone()
        });
    }
    Ok(drafts)
}

fn occurrence_dates(
    base: NaiveDate,
    pattern: &RecurrencePattern,
) -> Result<Vec<NaiveDate>, ValidationError> {
    let too_many = || {
        ValidationError::new(
            "until",
            format!("pattern yields more than {} occurrences", MAX_OCCURRENCES),
        )
    };

    let mut dates = Vec::new();
    match pattern.kind {
        RecurrenceKind::Daily | RecurrenceKind::Weekly => {
            let weekdays: Vec<Weekday> = match pattern.kind {
                RecurrenceKind::Weekly if !pattern.weekdays.is_empty() => pattern.weekdays.clone(),
                RecurrenceKind::Weekly => vec![base.weekday()],
                _ => Vec::new(),
            };
            let mut date = base;
            while date < pattern.until {
                if pattern.kind == RecurrenceKind::Daily || weekdays.contains(&date.weekday()) {
                    if dates.len() == MAX_OCCURRENCES {
                        return Err(too_many());
                    }
                    dates.push(date);
                }
                match date.checked_add_days(Days::new(1)) {
                    Some(next) => date = next,
                    None => break,
                }
            }
        }
        RecurrenceKind::Monthly => {
            let day = base.day();
            let first_of_month = base.with_day(1).unwrap_or(base);
            let mut k = 0u32;
            loop {
                let Some(month) = first_of_month.checked_add_months(Months::new(k)) else {
                    break;
                };
                if month >= pattern.until {
                    break;
                }
                // Months without this day are skipped.
                match month.with_day(day) {
                    Some(date) if date < pattern.until => {
                        if dates.len() == MAX_OCCURRENCES {
                            return Err(too_many());
                        }
                        dates.push(date);
                    }
                    _ => {}
                }
                k += 1;
            }
        }
    }
    Ok(dates)
}

/// Why an occurrence was not created.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipCause {
    /// These reservations hold the room.
    Conflict(Vec<Reservation>),
    /// The API refused or could not be reached.
    Failed(String),
}

/// An occurrence that was not created.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedOccurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cause: SkipCause,
}

/// Result of [`ConflictResolver::create_recurring`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringReport {
    /// Shared by every created occurrence.
    pub group_id: String,
    pub created: Vec<Reservation>,
    pub skipped: Vec<SkippedOccurrence>,
}

impl RecurringReport {
    /// Number of occurrences the pattern produced.
    pub fn total(&self) -> usize {
        self.created.len() + self.skipped.len()
    }
}

impl ConflictResolver {
    /// Books every occurrence of a recurring request.
    ///
    /// Expansion happens on the wall clock of the session clock. Occurrences
    /// are submitted one by one through [`create`](Self::create); a conflict
    /// or failure skips that occurrence only.
    pub async fn create_recurring(
        &self,
        draft: &ReservationDraft,
        pattern: &RecurrencePattern,
    ) -> EngineResult<RecurringReport> {
        let offset = self.sync().clock().offset();
        let group_id = Uuid::new_v4().to_string();
        let occurrences = expand_in(draft, pattern, &offset)?;
        info!(
            group_id = %group_id,
            kind = ?pattern.kind,
            count = occurrences.len(),
            "Booking recurring reservation"
        );

        let mut report = RecurringReport {
            group_id: group_id.clone(),
            created: Vec::new(),
            skipped: Vec::new(),
        };
        for occurrence in occurrences {
            let occurrence = occurrence.with_recurrence_group(&group_id);
            let (start, end) = (occurrence.start, occurrence.end);
            match self.create(&occurrence).await {
                Ok(CreateOutcome::Created(r)) => report.created.push(r),
                Ok(CreateOutcome::Conflict(conflicts)) => {
                    debug!(
                        start = %start,
                        count = conflicts.len(),
                        "Occurrence conflicts, skipped"
                    );
                    report.skipped.push(SkippedOccurrence {
                        start,
                        end,
                        cause: SkipCause::Conflict(conflicts),
                    });
                }
                Err(e) => {
                    warn!(start = %start, error = %e, "Occurrence failed, skipped");
                    report.skipped.push(SkippedOccurrence {
                        start,
                        end,
                        cause: SkipCause::Failed(e.to_string()),
                    });
                }
            }
        }

        info!(
            group_id = %group_id,
            created = report.created.len(),
            skipped = report.skipped.len(),
            "Recurring booking finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn draft(y: i32, m: u32, d: u32) -> ReservationDraft {
        ReservationDraft::new(
            "room-a",
            "alice",
            Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).unwrap(),
        )
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn days(drafts: &[ReservationDraft]) -> Vec<u32> {
        drafts.iter().map(|d| d.start.day()).collect()
    }

    #[test]
    fn daily_stops_before_end_date() {
        let pattern = RecurrencePattern::daily(date(2024, 6, 7));
        let out = expand_in(&draft(2024, 6, 3), &pattern, &Utc).unwrap();
        assert_eq!(days(&out), vec![3, 4, 5, 6]);
        assert!(out.iter().all(|d| d.end - d.start == chrono::Duration::minutes(90)));
    }

    #[test]
    fn weekly_selected_days() {
        // 2024-06-03 is a Monday.
        let pattern = RecurrencePattern::weekly([Weekday::Mon, Weekday::Wed], date(2024, 6, 18));
        let out = expand_in(&draft(2024, 6, 3), &pattern, &Utc).unwrap();
        assert_eq!(days(&out), vec![3, 5, 10, 12, 17]);
    }

    #[test]
    fn selected_weekday_on_end_date_is_excluded() {
        // 2024-06-17 is a Monday and the end date.
        let pattern = RecurrencePattern::weekly([Weekday::Mon], date(2024, 6, 17));
        let out = expand_in(&draft(2024, 6, 3), &pattern, &Utc).unwrap();
        assert_eq!(days(&out), vec![3, 10]);
    }

    #[test]
    fn weekly_without_days_uses_base_weekday() {
        let pattern = RecurrencePattern::weekly([], date(2024, 6, 25));
        let out = expand_in(&draft(2024, 6, 3), &pattern, &Utc).unwrap();
        assert_eq!(days(&out), vec![3, 10, 17, 24]);
    }

    #[test]
    fn monthly_skips_short_months() {
        let pattern = RecurrencePattern::monthly(date(2024, 6, 30));
        let out = expand_in(&draft(2024, 1, 31), &pattern, &Utc).unwrap();
        let months: Vec<u32> = out.iter().map(|d| d.start.month()).collect();
        assert_eq!(months, vec![1, 3, 5]);
    }

    #[test]
    fn monthly_day_on_end_date_is_excluded() {
        let pattern = RecurrencePattern::monthly(date(2024, 3, 15));
        let out = expand_in(&draft(2024, 1, 15), &pattern, &Utc).unwrap();
        let months: Vec<u32> = out.iter().map(|d| d.start.month()).collect();
        assert_eq!(months, vec![1, 2]);
    }

    #[test]
    fn keeps_wall_clock_time() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        // 23:30 UTC is 01:30 the next day at UTC+2.
        let base = ReservationDraft::new(
            "room-a",
            "alice",
            Utc.with_ymd_and_hms(2024, 6, 2, 23, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 3, 0, 30, 0).unwrap(),
        );
        let out = expand_in(&base, &RecurrencePattern::daily(date(2024, 6, 5)), &tz).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].start, Utc.with_ymd_and_hms(2024, 6, 3, 23, 30, 0).unwrap());
    }

    #[test]
    fn end_date_before_base_is_invalid() {
        let err = expand_in(&draft(2024, 6, 3), &RecurrencePattern::daily(date(2024, 6, 2)), &Utc)
            .unwrap_err();
        assert_eq!(err.field, "until");
    }

    #[test]
    fn end_date_on_base_is_invalid() {
        let err = expand_in(&draft(2024, 6, 3), &RecurrencePattern::daily(date(2024, 6, 3)), &Utc)
            .unwrap_err();
        assert_eq!(err.field, "until");
    }

    #[test]
    fn too_many_occurrences_is_invalid() {
        let err = expand_in(&draft(2024, 1, 1), &RecurrencePattern::daily(date(2026, 1, 1)), &Utc)
            .unwrap_err();
        assert_eq!(err.field, "until");
        assert!(err.message.contains("366"));
    }

    #[test]
    fn full_year_fits_the_cap() {
        // 2024 is a leap year: 366 days.
        let pattern = RecurrencePattern::daily(date(2025, 1, 1));
        let out = expand_in(&draft(2024, 1, 1), &pattern, &Utc).unwrap();
        assert_eq!(out.len(), MAX_OCCURRENCES);
    }
}
