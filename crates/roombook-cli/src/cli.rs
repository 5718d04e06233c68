//! Command-line interface definition.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

/// roombook - Book shared rooms and follow your reservations
#[derive(Debug, Parser)]
#[command(name = "roombook")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "ROOMBOOK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Act as this user (overrides `api.user_id`)
    #[arg(long, short, env = "ROOMBOOK_USER")]
    pub user: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Record alerts instead of showing them
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Request a room
    Book {
        #[command(flatten)]
        slot: SlotArgs,

        /// What the room is booked for
        #[arg(long)]
        purpose: Option<String>,
    },

    /// Request a room on a recurring schedule
    BookRecurring {
        #[command(flatten)]
        slot: SlotArgs,

        #[arg(long)]
        purpose: Option<String>,

        /// Recurrence kind
        #[arg(long, value_enum)]
        every: RecurrenceArg,

        /// Weekdays for weekly recurrence (e.g. mon,wed)
        #[arg(long, value_delimiter = ',')]
        on: Vec<String>,

        /// End date, exclusive: no occurrence starts on it (YYYY-MM-DD)
        #[arg(long)]
        until: NaiveDate,
    },

    /// Approve a pending reservation
    Approve {
        id: String,

        /// Cancel conflicting reservations
        #[arg(long)]
        force: bool,
    },

    /// Reject a pending reservation
    Reject {
        id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Cancel a reservation
    Cancel {
        id: String,

        /// Cancel as an administrator
        #[arg(long)]
        admin: bool,
    },

    /// List reservations holding a room during a slot
    Conflicts {
        #[command(flatten)]
        slot: SlotArgs,

        /// Ignore this reservation
        #[arg(long)]
        exclude: Option<String>,
    },

    /// Notification preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Notification inbox
    Notifications {
        #[command(subcommand)]
        action: NotificationsAction,
    },

    /// Replay writes queued while offline
    Sync,

    /// Watch reservations and deliver alerts until interrupted
    Watch,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// A room and a time slot.
#[derive(Debug, Clone, clap::Args)]
pub struct SlotArgs {
    /// Room id
    #[arg(long)]
    pub room: String,

    /// Start time (RFC 3339, or "YYYY-MM-DD HH:MM" local time)
    #[arg(long)]
    pub start: String,

    /// End time, same formats as --start
    #[arg(long)]
    pub end: String,
}

/// Recurrence kinds accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecurrenceArg {
    Daily,
    Weekly,
    Monthly,
}

/// Preference actions.
#[derive(Debug, Subcommand)]
pub enum PrefsAction {
    /// Show current preferences
    Show,

    /// Change preferences
    Set {
        #[arg(long)]
        push: Option<bool>,

        #[arg(long)]
        status_changes: Option<bool>,

        #[arg(long)]
        reminders: Option<bool>,

        /// Reminder lead time in minutes
        #[arg(long)]
        reminder_minutes: Option<u32>,

        #[arg(long)]
        sound: Option<bool>,

        #[arg(long)]
        vibration: Option<bool>,

        #[arg(long)]
        quiet_hours: Option<bool>,

        /// Quiet hours start (HH:MM)
        #[arg(long)]
        quiet_start: Option<String>,

        /// Quiet hours end (HH:MM)
        #[arg(long)]
        quiet_end: Option<String>,
    },
}

/// Inbox actions.
#[derive(Debug, Subcommand)]
pub enum NotificationsAction {
    /// List recent notifications
    List {
        /// Only show unread notifications
        #[arg(long)]
        unread: bool,
    },

    /// Mark one notification read
    Read { id: String },

    /// Mark every notification read
    ReadAll,

    /// Delete a notification
    Delete { id: String },

    /// Show the unread count
    Count,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forced_approval() {
        let cli =
            Cli::try_parse_from(["roombook", "--user", "admin", "approve", "res-1", "--force"])
                .unwrap();
        assert_eq!(cli.user.as_deref(), Some("admin"));
        assert!(matches!(cli.command, Command::Approve { ref id, force: true } if id == "res-1"));
    }

    #[test]
    fn parses_recurring_weekdays() {
        let cli = Cli::try_parse_from([
            "roombook",
            "book-recurring",
            "--room",
            "r1",
            "--start",
            "2024-01-01 09:00",
            "--end",
            "2024-01-01 10:00",
            "--every",
            "weekly",
            "--on",
            "mon,wed",
            "--until",
            "2024-01-31",
        ])
        .unwrap();
        let Command::BookRecurring { every, on, until, .. } = cli.command else {
            panic!("expected book-recurring");
        };
        assert_eq!(every, RecurrenceArg::Weekly);
        assert_eq!(on, vec!["mon", "wed"]);
        assert_eq!(until, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
    }
}
