//! Time-slot labels (`"HH:MM-HH:MM"`) and calendar conversions.
//!
//! Dates and slot times are interpreted in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime};
use thiserror::Error;

use crate::model::Ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    label: String,
    start: NaiveTime,
    end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time slot {0:?} (expected HH:MM-HH:MM)")]
pub struct BadSlot(pub String);

impl TimeSlot {
    pub fn parse(label: &str) -> Result<Self, BadSlot> {
        let bad = || BadSlot(label.to_string());
        let (start, end) = label.trim().split_once('-').ok_or_else(bad)?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| bad())?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| bad())?;
        if start >= end {
            return Err(bad());
        }
        Ok(Self {
            label: format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
            start,
            end,
        })
    }

    /// Canonical label, zero-padded.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn start_on(&self, date: NaiveDate) -> Ms {
        date.and_time(self.start).and_utc().timestamp_millis()
    }

    pub fn end_on(&self, date: NaiveDate) -> Ms {
        date.and_time(self.end).and_utc().timestamp_millis()
    }
}

impl FromStr for TimeSlot {
    type Err = BadSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Midnight (UTC) of `date`.
pub fn day_start(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Calendar date (UTC) containing instant `ms`.
pub fn date_of(ms: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

/// Human-readable rendering used in notification text.
pub fn format_instant(ms: Ms) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => format!("{ms}ms"),
    }
}

/// The slots a day is divided into unless configured otherwise.
pub fn default_slots() -> Vec<TimeSlot> {
    ["08:00-10:00", "10:00-12:00", "13:00-15:00", "15:00-17:00"]
        .iter()
        .filter_map(|s| TimeSlot::parse(s).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, MINUTE_MS};

    fn may_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()
    }

    #[test]
    fn parse_and_place_on_date() {
        let slot = TimeSlot::parse("08:00-10:00").unwrap();
        let midnight = day_start(may_first());
        assert_eq!(slot.start_on(may_first()), midnight + 8 * HOUR_MS);
        assert_eq!(slot.end_on(may_first()), midnight + 10 * HOUR_MS);
        assert_eq!(slot.label(), "08:00-10:00");
    }

    #[test]
    fn label_is_canonicalised() {
        let slot: TimeSlot = " 8:05 - 9:30 ".parse().unwrap();
        assert_eq!(slot.label(), "08:05-09:30");
        assert_eq!(
            slot.start_on(may_first()),
            day_start(may_first()) + 8 * HOUR_MS + 5 * MINUTE_MS
        );
    }

    #[test]
    fn rejects_malformed_and_inverted() {
        for bad in ["", "08:00", "08:00-", "25:00-26:00", "10:00-08:00", "09:00-09:00", "ab-cd"] {
            assert!(TimeSlot::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(
            TimeSlot::parse("10:00-08:00").unwrap_err().to_string(),
            "invalid time slot \"10:00-08:00\" (expected HH:MM-HH:MM)"
        );
    }

    #[test]
    fn known_epoch_value() {
        // 2025-05-01T00:00:00Z
        assert_eq!(day_start(may_first()), 1_746_057_600_000);
        assert_eq!(date_of(1_746_057_600_000 + 23 * HOUR_MS), Some(may_first()));
    }

    #[test]
    fn format_instant_renders_utc() {
        let at = day_start(may_first()) + 8 * HOUR_MS + 15 * MINUTE_MS;
        assert_eq!(format_instant(at), "2025-05-01 08:15 UTC");
    }

    #[test]
    fn default_slots_are_four() {
        let labels: Vec<_> = default_slots().iter().map(|s| s.label().to_string()).collect();
        assert_eq!(labels, ["08:00-10:00", "10:00-12:00", "13:00-15:00", "15:00-17:00"]);
    }
}
