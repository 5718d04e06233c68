//! Preference commands.

use roombook_core::{NotificationPreference, PreferencePatch, parse_hhmm};

use super::Context;
use crate::cli::PrefsAction;
use crate::error::{CliError, CliResult};

fn print(prefs: &NotificationPreference) {
    let on = |b: bool| if b { "on" } else { "off" };
    println!("push:            {}", on(prefs.push_enabled));
    println!("status changes:  {}", on(prefs.status_changes));
    println!(
        "reminders:       {} ({} min before)",
        on(prefs.reminder_enabled),
        prefs.reminder_minutes
    );
    println!("sound:           {}", on(prefs.sound_enabled));
    println!("vibration:       {}", on(prefs.vibration_enabled));
    println!(
        "quiet hours:     {} ({}-{})",
        on(prefs.quiet_hours_enabled),
        prefs.quiet_hours_start.format("%H:%M"),
        prefs.quiet_hours_end.format("%H:%M")
    );
}

fn hhmm(value: Option<String>, flag: &str) -> CliResult<Option<chrono::NaiveTime>> {
    value
        .map(|v| {
            parse_hhmm(&v).ok_or_else(|| {
                CliError::invalid(format!("--{} expects HH:MM, got `{}`", flag, v))
            })
        })
        .transpose()
}

/// Builds a patch from the `prefs set` flags.
pub fn patch_from(action: PrefsAction) -> CliResult<PreferencePatch> {
    let PrefsAction::Set {
        push,
        status_changes,
        reminders,
        reminder_minutes,
        sound,
        vibration,
        quiet_hours,
        quiet_start,
        quiet_end,
    } = action
    else {
        return Ok(PreferencePatch::default());
    };
    let patch = PreferencePatch {
        push_enabled: push,
        status_changes,
        reminder_enabled: reminders,
        reminder_minutes,
        sound_enabled: sound,
        vibration_enabled: vibration,
        quiet_hours_enabled: quiet_hours,
        quiet_hours_start: hhmm(quiet_start, "quiet-start")?,
        quiet_hours_end: hhmm(quiet_end, "quiet-end")?,
    };
    patch
        .validate()
        .map_err(|e| CliError::invalid(e.to_string()))?;
    Ok(patch)
}

pub async fn run(ctx: &Context, action: PrefsAction) -> CliResult<()> {
    let user_id = ctx.user_id();
    let prefs = match action {
        PrefsAction::Show => ctx.session.preferences().get(user_id).await?,
        set => {
            let patch = patch_from(set)?;
            if patch.is_empty() {
                return Err(CliError::invalid("nothing to change; see `roombook prefs set --help`"));
            }
            let update = ctx.session.preferences().update(user_id, &patch).await?;
            if update.queued {
                eprintln!("API unreachable; the change is queued. Run `roombook sync` later.");
            }
            update.preferences
        }
    };
    ctx.emit(&prefs, || print(&prefs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn set_flags_become_patch() {
        let patch = patch_from(PrefsAction::Set {
            push: None,
            status_changes: Some(false),
            reminders: None,
            reminder_minutes: Some(30),
            sound: None,
            vibration: None,
            quiet_hours: Some(true),
            quiet_start: Some("22:30".into()),
            quiet_end: None,
        })
        .unwrap();
        assert_eq!(patch.status_changes, Some(false));
        assert_eq!(patch.reminder_minutes, Some(30));
        assert_eq!(patch.quiet_hours_start, NaiveTime::from_hms_opt(22, 30, 0));
        assert_eq!(patch.push_enabled, None);
    }

    #[test]
    fn bad_time_is_rejected() {
        let result = patch_from(PrefsAction::Set {
            push: None,
            status_changes: None,
            reminders: None,
            reminder_minutes: None,
            sound: None,
            vibration: None,
            quiet_hours: None,
            quiet_start: Some("25:00".into()),
            quiet_end: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn zero_reminder_minutes_is_rejected() {
        let result = patch_from(PrefsAction::Set {
            push: None,
            status_changes: None,
            reminders: None,
            reminder_minutes: Some(0),
            sound: None,
            vibration: None,
            quiet_hours: None,
            quiet_start: None,
            quiet_end: None,
        });
        assert!(matches!(result, Err(CliError::InvalidArgument(_))));
    }
}
