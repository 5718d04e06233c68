//! Command implementations.

pub mod config;
pub mod notifications;
pub mod prefs;
pub mod reservations;
pub mod sync;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use roombook_core::{Clock, Reservation, SystemClock};
use roombook_engine::Session;
#[cfg(feature = "desktop")]
use roombook_providers::{DesktopChannel, DesktopConfig};
use roombook_providers::{DeliveryChannel, FileStore, HttpApi, RecordingChannel};
use serde::Serialize;
use tracing::debug;

use crate::cli::Cli;
use crate::config::RoombookConfig;
use crate::error::{CliError, CliResult};

/// Everything a command needs: the session and output settings.
pub struct Context {
    pub session: Session,
    pub json: bool,
}

impl Context {
    /// Builds a session for the configured user.
    pub async fn open(cli: &Cli, config: &RoombookConfig) -> CliResult<Self> {
        let user_id = config.user_id(cli.user.as_deref())?;
        let api = HttpApi::new(config.http_config()?)?;
        let store_path = config.store_path();
        let store = FileStore::open(&store_path).await?;
        debug!(path = %store_path.display(), user_id = %user_id, "Opening session");

        let session = Session::new(
            user_id,
            Arc::new(api),
            Arc::new(store),
            delivery_channel(cli.dry_run),
            Arc::new(SystemClock),
            config.engine_config(),
        );
        Ok(Self {
            session,
            json: cli.json,
        })
    }

    pub fn user_id(&self) -> &str {
        self.session.user_id()
    }

    pub fn offset(&self) -> FixedOffset {
        self.session.sync().clock().offset()
    }

    /// Prints `value` as JSON when `--json` is set, otherwise runs `text`.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> CliResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }
}

#[cfg(feature = "desktop")]
fn delivery_channel(dry_run: bool) -> Arc<dyn DeliveryChannel> {
    if dry_run {
        Arc::new(RecordingChannel::default())
    } else {
        Arc::new(DesktopChannel::new(DesktopConfig::default()))
    }
}

#[cfg(not(feature = "desktop"))]
fn delivery_channel(_dry_run: bool) -> Arc<dyn DeliveryChannel> {
    Arc::new(RecordingChannel::default())
}

/// Parses an RFC 3339 timestamp, or `YYYY-MM-DD HH:MM` on the wall clock
/// of `offset`.
pub fn parse_time(value: &str, offset: &FixedOffset) -> CliResult<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .map_err(|_| CliError::invalid(format!("cannot parse time `{}`", value)))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| CliError::invalid(format!("ambiguous local time `{}`", value)))
}

/// One-line description of a reservation.
pub fn describe(reservation: &Reservation, offset: &FixedOffset) -> String {
    let start = reservation.start.with_timezone(offset);
    let end = reservation.end.with_timezone(offset);
    let mut line = format!(
        "{}  {:<10} {}  {} {}-{}",
        reservation.id,
        reservation.status,
        reservation.room_id,
        start.format("%Y-%m-%d"),
        start.format("%H:%M"),
        end.format("%H:%M"),
    );
    if let Some(purpose) = &reservation.purpose {
        line.push_str("  ");
        line.push_str(purpose);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use roombook_core::ReservationStatus;

    #[test]
    fn parses_rfc3339_and_local_times() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();

        assert_eq!(parse_time("2024-06-03T10:00:00+02:00", &utc).unwrap(), expected);
        assert_eq!(parse_time("2024-06-03 10:00", &plus2).unwrap(), expected);
        assert_eq!(parse_time("2024-06-03T08:00", &utc).unwrap(), expected);
        assert!(parse_time("tomorrow", &utc).is_err());
    }

    #[test]
    fn describes_reservation() {
        let r = Reservation {
            id: "res-1".into(),
            room_id: "blue".into(),
            user_id: "alice".into(),
            start: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 3, 10, 30, 0).unwrap(),
            status: ReservationStatus::Approved,
            purpose: Some("Standup".into()),
            recurrence_group_id: None,
            rejection_reason: None,
        };
        let line = describe(&r, &FixedOffset::east_opt(0).unwrap());
        assert!(line.starts_with("res-1"));
        assert!(line.contains("2024-06-03 09:00-10:30"));
        assert!(line.ends_with("Standup"));
    }
}
