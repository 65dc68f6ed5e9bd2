use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::{HOUR_MS, MINUTE_MS, Ms};
use crate::slot::{self, TimeSlot};

/// Deadline and sweep policy for the claim engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long after the slot start a booking may still be checked in.
    pub check_in_grace: Ms,
    /// Occupancy longer than this is force-ended by the sweeper.
    pub max_occupancy: Ms,
    /// Bookings whose deadline falls within this window get a reminder.
    pub reminder_lookahead: Ms,
    pub sweep_interval: Duration,
    /// Send at most one reminder per booking. When false, every sweep tick
    /// inside the lookahead window re-sends it.
    pub remind_once: bool,
    /// Slots shown by `schedule`.
    pub time_slots: Vec<TimeSlot>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_in_grace: 15 * MINUTE_MS,
            max_occupancy: 2 * HOUR_MS,
            reminder_lookahead: 5 * MINUTE_MS,
            sweep_interval: Duration::from_secs(60),
            remind_once: true,
            time_slots: slot::default_slots(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    /// Provision the 40 sample rooms on an empty registry.
    pub seed_sample: bool,
    pub engine: EngineConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults;
    /// set-but-unparseable keys are errors.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();

        let engine = EngineConfig {
            check_in_grace: parse_minutes(&get, "STUDYSPACE_CHECK_IN_GRACE_MINUTES")?
                .unwrap_or(defaults.check_in_grace),
            max_occupancy: parse_minutes(&get, "STUDYSPACE_MAX_OCCUPANCY_MINUTES")?
                .unwrap_or(defaults.max_occupancy),
            reminder_lookahead: parse_minutes(&get, "STUDYSPACE_REMINDER_LOOKAHEAD_MINUTES")?
                .unwrap_or(defaults.reminder_lookahead),
            sweep_interval: parse::<u64>(&get, "STUDYSPACE_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            remind_once: parse_bool(&get, "STUDYSPACE_REMIND_ONCE")?.unwrap_or(defaults.remind_once),
            time_slots: match get("STUDYSPACE_TIME_SLOTS") {
                Some(raw) => parse_slots(&raw)?,
                None => defaults.time_slots,
            },
        };
        if engine.sweep_interval.is_zero() {
            return Err(invalid("STUDYSPACE_SWEEP_INTERVAL_SECS", "0", "must be positive"));
        }

        Ok(Self {
            bind: get("STUDYSPACE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "STUDYSPACE_PORT")?.unwrap_or(5050),
            data_dir: PathBuf::from(get("STUDYSPACE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parse(&get, "STUDYSPACE_MAX_CONNECTIONS")?.unwrap_or(256),
            metrics_port: parse(&get, "STUDYSPACE_METRICS_PORT")?,
            seed_sample: parse_bool(&get, "STUDYSPACE_SEED_SAMPLE")?.unwrap_or(false),
            engine,
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
    }
}

fn parse_minutes(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<Ms>, ConfigError> {
    match parse::<u32>(get, var)? {
        Some(0) => Err(invalid(var, "0", "must be positive")),
        other => Ok(other.map(|m| Ms::from(m) * MINUTE_MS)),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<bool>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(var, &raw, "expected a boolean")),
        },
    }
}

fn parse_slots(raw: &str) -> Result<Vec<TimeSlot>, ConfigError> {
    let slots = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(TimeSlot::parse)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid("STUDYSPACE_TIME_SLOTS", raw, e.to_string()))?;
    if slots.is_empty() {
        return Err(invalid("STUDYSPACE_TIME_SLOTS", raw, "no slots given"));
    }
    Ok(slots)
}
