//! Duration and sync-schedule parsing for docbuild.
//!
//! This crate provides the two small parsing surfaces the daemon
//! configuration needs:
//!
//! - Human-readable durations (`"30s"`, `"5m"`, `"1h30m"`) with serde
//!   codecs for config fields.
//! - [`ScheduleSpec`]: the `daemon.sync.schedule` value, which is either
//!   `@every <duration>` or a cron expression.
//!
//! # Example
//!
//! ```
//! use docbuild_duration::{parse_duration, ScheduleSpec};
//! use std::time::Duration;
//!
//! let d = parse_duration("90s").expect("parse");
//! assert_eq!(d, Duration::from_secs(90));
//!
//! let spec: ScheduleSpec = "@every 15m".parse().expect("parse");
//! assert_eq!(spec, ScheduleSpec::Every(Duration::from_secs(900)));
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Parse a human-readable duration string (`"250ms"`, `"30s"`, `"1h30m"`).
pub fn parse_duration(s: &str) -> Result<Duration, ScheduleParseError> {
    humantime::parse_duration(s.trim()).map_err(|e| ScheduleParseError {
        input: s.to_string(),
        reason: e.to_string(),
    })
}

/// Format a duration the way we parse it.
pub fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

/// Error produced when a duration or schedule string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleParseError {
    /// The offending input.
    pub input: String,
    /// Parser diagnostic.
    pub reason: String,
}

impl fmt::Display for ScheduleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid schedule {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for ScheduleParseError {}

/// A sync schedule: either a fixed interval or a cron expression.
///
/// `@every <duration>` fires on a fixed interval. Anything else is parsed
/// as a cron expression; five-field expressions get a seconds field of `0`
/// prepended so the common crontab form works unchanged.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    /// Fixed interval, e.g. `@every 10m`.
    Every(Duration),
    /// Cron expression, e.g. `0 3 * * *`.
    Cron(cron::Schedule),
}

impl PartialEq for ScheduleSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScheduleSpec::Every(a), ScheduleSpec::Every(b)) => a == b,
            (ScheduleSpec::Cron(a), ScheduleSpec::Cron(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl Eq for ScheduleSpec {}

impl ScheduleSpec {
    /// The next fire time strictly after `after`.
    ///
    /// For `Every` the interval is anchored at `after`; the caller is
    /// expected to pass the previous fire time (or "now" on first use).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleSpec::Every(interval) => {
                let interval = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(interval)
            }
            ScheduleSpec::Cron(schedule) => schedule.after(&after).next(),
        }
    }

    /// The fixed interval, when this is an `@every` schedule.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            ScheduleSpec::Every(d) => Some(*d),
            ScheduleSpec::Cron(_) => None,
        }
    }
}

impl FromStr for ScheduleSpec {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("@every") {
            let d = parse_duration(rest)?;
            if d.is_zero() {
                return Err(ScheduleParseError {
                    input: s.to_string(),
                    reason: "interval must be positive".to_string(),
                });
            }
            return Ok(ScheduleSpec::Every(d));
        }

        let expr = normalize_cron(s);
        let schedule = cron::Schedule::from_str(&expr).map_err(|e| ScheduleParseError {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(ScheduleSpec::Cron(schedule))
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSpec::Every(d) => write!(f, "@every {}", format_duration(*d)),
            ScheduleSpec::Cron(schedule) => write!(f, "{}", schedule),
        }
    }
}

impl Serialize for ScheduleSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScheduleSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The `cron` crate wants a seconds field; crontab users write five fields.
fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Serde codec for optional humantime durations.
///
/// Usage: `#[serde(with = "docbuild_duration::option")]` on an
/// `Option<Duration>` config field.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => parse_duration(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
