//! Notification preference types.
//!
//! Quiet-hours times are wall-clock times serialized as `"HH:MM"`.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::reservation::ValidationError;

/// Per-user notification preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreference {
    /// Master switch for push alerts.
    pub push_enabled: bool,
    /// Notify on approve/reject/cancel.
    pub status_changes: bool,
    /// Schedule reminders before reservations start.
    pub reminder_enabled: bool,
    /// Reminder lead time in minutes.
    pub reminder_minutes: u32,
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
    pub quiet_hours_enabled: bool,
    #[serde(with = "hhmm")]
    pub quiet_hours_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub quiet_hours_end: NaiveTime,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self {
            push_enabled: true,
            status_changes: true,
            reminder_enabled: true,
            reminder_minutes: 15,
            sound_enabled: true,
            vibration_enabled: true,
            quiet_hours_enabled: false,
            quiet_hours_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            quiet_hours_end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
        }
    }
}

/// A partial update to [`NotificationPreference`].
///
/// Serializes to a JSON object holding only the fields that are set, which
/// is what the remote PATCH endpoint and the pending-write queue expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_changes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibration_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", with = "hhmm_opt")]
    pub quiet_hours_start: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none", with = "hhmm_opt")]
    pub quiet_hours_end: Option<NaiveTime>,
}

impl PreferencePatch {
    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Rejects values the preferences may not hold.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reminder_minutes == Some(0) {
            return Err(ValidationError::new(
                "reminder_minutes",
                "reminder lead must be at least one minute",
            ));
        }
        Ok(())
    }

    /// Applies the set fields onto `prefs`.
    pub fn apply_to(&self, prefs: &mut NotificationPreference) {
        if let Some(v) = self.push_enabled {
            prefs.push_enabled = v;
        }
        if let Some(v) = self.status_changes {
            prefs.status_changes = v;
        }
        if let Some(v) = self.reminder_enabled {
            prefs.reminder_enabled = v;
        }
        if let Some(v) = self.reminder_minutes {
            prefs.reminder_minutes = v;
        }
        if let Some(v) = self.sound_enabled {
            prefs.sound_enabled = v;
        }
        if let Some(v) = self.vibration_enabled {
            prefs.vibration_enabled = v;
        }
        if let Some(v) = self.quiet_hours_enabled {
            prefs.quiet_hours_enabled = v;
        }
        if let Some(v) = self.quiet_hours_start {
            prefs.quiet_hours_start = v;
        }
        if let Some(v) = self.quiet_hours_end {
            prefs.quiet_hours_end = v;
        }
    }

    /// Returns the patch as a JSON object of the set fields.
    pub fn to_object(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Parses `"HH:MM"` (or `"HH:MM:SS"`) into a wall-clock time.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_hhmm(&raw).ok_or_else(|| D::Error::custom(format!("invalid time `{}`", raw)))
    }
}

mod hhmm_opt {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => s.serialize_str(&t.format("%H:%M").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_hhmm(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid time `{}`", raw))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let prefs = NotificationPreference::default();
        assert!(prefs.push_enabled);
        assert!(prefs.status_changes);
        assert!(prefs.reminder_enabled);
        assert_eq!(prefs.reminder_minutes, 15);
        assert!(!prefs.quiet_hours_enabled);
        assert_eq!(prefs.quiet_hours_start, parse_hhmm("22:00").unwrap());
        assert_eq!(prefs.quiet_hours_end, parse_hhmm("07:00").unwrap());
    }

    #[test]
    fn zero_lead_is_rejected() {
        let patch = PreferencePatch {
            reminder_minutes: Some(0),
            ..Default::default()
        };
        assert_eq!(patch.validate().unwrap_err().field, "reminder_minutes");

        let patch = PreferencePatch {
            reminder_minutes: Some(1),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn quiet_hours_serialize_as_hhmm() {
        let json = serde_json::to_value(NotificationPreference::default()).unwrap();
        assert_eq!(json["quiet_hours_start"], "22:00");
        assert_eq!(json["quiet_hours_end"], "07:00");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let prefs: NotificationPreference =
            serde_json::from_str(r#"{"push_enabled": false, "quiet_hours_start": "23:15"}"#)
                .unwrap();
        assert!(!prefs.push_enabled);
        assert!(prefs.reminder_enabled);
        assert_eq!(prefs.quiet_hours_start, parse_hhmm("23:15").unwrap());
    }

    #[test]
    fn patch_object_holds_only_set_fields() {
        let patch = PreferencePatch {
            push_enabled: Some(false),
            quiet_hours_end: parse_hhmm("06:30"),
            ..Default::default()
        };
        let obj = patch.to_object();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["push_enabled"], false);
        assert_eq!(obj["quiet_hours_end"], "06:30");

        let back: PreferencePatch = serde_json::from_value(serde_json::Value::Object(obj)).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn patch_apply() {
        let mut prefs = NotificationPreference::default();
        PreferencePatch {
            reminder_minutes: Some(30),
            quiet_hours_enabled: Some(true),
            ..Default::default()
        }
        .apply_to(&mut prefs);
        assert_eq!(prefs.reminder_minutes, 30);
        assert!(prefs.quiet_hours_enabled);
        assert!(prefs.push_enabled);
        assert!(PreferencePatch::default().is_empty());
    }
}
