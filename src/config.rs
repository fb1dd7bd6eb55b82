//! Session configuration: canonical key names (spec §6), a `Dictionary`
//! string map with typed accessors, and `SessionSettings` wrapping one
//! `Dictionary` per `SessionId`.
//!
//! No `original_source` file covers `SessionSettings`/`Dictionary` (the set
//! provided is `Acceptor.cpp`, `DataDictionaryProvider.h`,
//! `FieldConvertors.cpp`, `SessionFactory.cpp`,
//! `ThreadedSocketConnection.cpp`); the ordered string/string map with
//! `getString`/`getBool`/`getLong`/`getDay` accessors (one `Dictionary` per
//! configured session) is built from spec.md §6's canonical key set plus
//! quickfix's documented `SessionSettings` shape, not a cited source file.
//! The builder style is grounded on the teacher's `GatewayConfig`/
//! `SessionConfig`, generalized to the full key set of spec §6. No
//! settings-*file* parser is implemented —
//! that is the named Non-goal; a `Dictionary` is built programmatically or
//! via `serde_json::from_value`/`from_str`, since `serde_json` is already
//! in the dependency set.

use crate::error::{FixError, Result};
use crate::session_id::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Acceptor,
    Initiator,
}

impl ConnectionType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "acceptor" => Some(Self::Acceptor),
            "initiator" => Some(Self::Initiator),
            _ => None,
        }
    }
}

/// Day-of-week, used by `StartDay`/`EndDay`/`LogonDay`/`LogoutDay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw.to_ascii_lowercase().as_str() {
            "sunday" => Self::Sunday,
            "monday" => Self::Monday,
            "tuesday" => Self::Tuesday,
            "wednesday" => Self::Wednesday,
            "thursday" => Self::Thursday,
            "friday" => Self::Friday,
            "saturday" => Self::Saturday,
            _ => return None,
        })
    }

    pub fn from_chrono(w: chrono::Weekday) -> Self {
        match w {
            chrono::Weekday::Sun => Self::Sunday,
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
        }
    }
}

/// A `StartTime`/`EndTime` (and optionally `StartDay`/`EndDay`) window, used
/// both for the permitted session-time window (spec §4.4 SessionTime
/// enforcement) and for validating `LogonTime`/`LogoutTime` fall inside it
/// (spec §4.5 factory rule 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: chrono::NaiveTime,
    pub end: chrono::NaiveTime,
    pub start_day: Option<Weekday>,
    pub end_day: Option<Weekday>,
}

impl TimeRange {
    pub fn daily(start: chrono::NaiveTime, end: chrono::NaiveTime) -> Self {
        Self { start, end, start_day: None, end_day: None }
    }

    pub fn weekly(start: chrono::NaiveTime, end: chrono::NaiveTime, start_day: Weekday, end_day: Weekday) -> Self {
        Self { start, end, start_day: Some(start_day), end_day: Some(end_day) }
    }

    /// Is `(day, time)` inside this window? For a day-qualified range this
    /// treats `start_day..=end_day` as inclusive and wraps across the week
    /// the same way a plain time-of-day range wraps across midnight.
    pub fn is_in_range(&self, day: Weekday, time: chrono::NaiveTime) -> bool {
        match (self.start_day, self.end_day) {
            (Some(start_day), Some(end_day)) => {
                if start_day <= end_day {
                    if day < start_day || day > end_day {
                        return false;
                    }
                } else if day > end_day && day < start_day {
                    return false;
                }
                if day == start_day && time < self.start {
                    return false;
                }
                if day == end_day && time > self.end {
                    return false;
                }
                true
            }
            _ => self.contains_time_of_day(time),
        }
    }

    /// Time-of-day-only containment, ignoring any day qualifiers — used by
    /// the factory to check `LogonTime`/`LogoutTime` against the window.
    pub fn contains_time_of_day(&self, time: chrono::NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            // Window wraps midnight.
            time >= self.start || time <= self.end
        }
    }
}

/// The four independent sequence-reset policies of spec §3/§4.4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetPolicy {
    pub on_logon: bool,
    pub on_logout: bool,
    pub on_disconnect: bool,
    pub refresh_on_logon: bool,
}

/// An ordered string/string settings map — one per `SessionId`. No
/// `original_source` file covers this type; it is built from quickfix's
/// documented `FIX::Dictionary` shape (a settings container, not a FIX
/// protocol `DataDictionary`) to hold spec.md §6's canonical key set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dictionary(BTreeMap<String, String>);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        self.0.get(key).map(String::as_str).ok_or_else(|| FixError::InvalidConfig(format!("missing key: {key}")))
    }

    pub fn get_string_opt(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.0.get(key) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "Y" | "y" | "true" => Ok(true),
                "N" | "n" | "false" => Ok(false),
                _ => Err(FixError::InvalidConfig(format!("{key} is not a bool: {v}"))),
            },
        }
    }

    pub fn get_long(&self, key: &str) -> Result<i64> {
        let raw = self.get_string(key)?;
        raw.parse().map_err(|_| FixError::InvalidConfig(format!("{key} is not an integer: {raw}")))
    }

    pub fn get_long_opt(&self, key: &str, default: i64) -> Result<i64> {
        match self.0.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| FixError::InvalidConfig(format!("{key} is not an integer: {v}"))),
        }
    }

    pub fn get_day(&self, key: &str) -> Result<Option<Weekday>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => Weekday::parse(v)
                .map(Some)
                .ok_or_else(|| FixError::InvalidConfig(format!("{key} is not a weekday: {v}"))),
        }
    }

    pub fn get_time(&self, key: &str) -> Result<chrono::NaiveTime> {
        let raw = self.get_string(key)?;
        chrono::NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .map_err(|_| FixError::InvalidConfig(format!("{key} is not HH:MM:SS: {raw}")))
    }

    pub fn connection_type(&self) -> Result<ConnectionType> {
        let raw = self.get_string("ConnectionType")?;
        ConnectionType::parse(raw).ok_or_else(|| FixError::InvalidConfig(format!("invalid ConnectionType: {raw}")))
    }
}

/// The full settings for one configured session, plus the canonical keys of
/// spec §6 broken out as typed accessors for the factory to consume.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    sessions: BTreeMap<SessionId, Dictionary>,
}

impl SessionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, session_id: SessionId, dict: Dictionary) -> &mut Self {
        self.sessions.insert(session_id, dict);
        self
    }

    pub fn get(&self, session_id: &SessionId) -> Result<&Dictionary> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| FixError::InvalidConfig(format!("no settings for session {session_id}")))
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &Dictionary)> {
        self.sessions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_typed_accessors() {
        let mut d = Dictionary::new();
        d.set("HeartBtInt", "30").set("ResetOnLogon", "Y").set("ConnectionType", "initiator");
        assert_eq!(d.get_long("HeartBtInt").unwrap(), 30);
        assert!(d.get_bool("ResetOnLogon", false).unwrap());
        assert_eq!(d.connection_type().unwrap(), ConnectionType::Initiator);
    }

    #[test]
    fn missing_key_is_invalid_config() {
        let d = Dictionary::new();
        assert!(matches!(d.get_string("Missing"), Err(FixError::InvalidConfig(_))));
    }

    #[test]
    fn time_range_within_day_window() {
        let range = TimeRange::daily(
            chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        );
        assert!(range.contains_time_of_day(chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!range.contains_time_of_day(chrono::NaiveTime::from_hms_opt(20, 0, 0).unwrap()));
    }

    #[test]
    fn time_range_wraps_midnight() {
        let range = TimeRange::daily(
            chrono::NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        );
        assert!(range.contains_time_of_day(chrono::NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(range.contains_time_of_day(chrono::NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(!range.contains_time_of_day(chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn weekly_range_spans_days() {
        let range = TimeRange::weekly(
            chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            Weekday::Monday,
            Weekday::Friday,
        );
        assert!(range.is_in_range(Weekday::Wednesday, chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
        assert!(!range.is_in_range(Weekday::Sunday, chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
    }
}
