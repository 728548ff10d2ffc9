//! Refresh cadences and the timing constants built on them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::RefreshError;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const WEEK_MS: i64 = 7 * DAY_MS;
pub const MONTH_MS: i64 = 30 * DAY_MS;

/// Delay between consecutive price refreshes (catch-up starts, bucket runs,
/// stream misses).
pub const PRICE_REFRESH_STAGGER: Duration = Duration::from_millis(200);

/// How often a cache section is refreshed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshCadence {
    Daily,
    Weekly,
    Monthly,
}

impl RefreshCadence {
    /// Parse a cadence name, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Result<Self, RefreshError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(RefreshCadence::Daily),
            "weekly" => Ok(RefreshCadence::Weekly),
            "monthly" => Ok(RefreshCadence::Monthly),
            _ => Err(RefreshError::InvalidCadence(value.to_string())),
        }
    }

    pub fn as_millis(&self) -> i64 {
        match self {
            RefreshCadence::Daily => DAY_MS,
            RefreshCadence::Weekly => WEEK_MS,
            RefreshCadence::Monthly => MONTH_MS,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis().unsigned_abs())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshCadence::Daily => "daily",
            RefreshCadence::Weekly => "weekly",
            RefreshCadence::Monthly => "monthly",
        }
    }
}

impl fmt::Display for RefreshCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshCadence {
    type Err = RefreshError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Pick a section's cadence: a CLI value wins, then a non-blank env value.
///
/// A blank or whitespace-only env value means no cadence.
pub fn resolve_refresh_cadence(
    cli: Option<RefreshCadence>,
    env: Option<&str>,
) -> Result<Option<RefreshCadence>, RefreshError> {
    if cli.is_some() {
        return Ok(cli);
    }
    match env.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => RefreshCadence::parse(value).map(Some),
        None => Ok(None),
    }
}

/// Parse a TCP port in `1..=65535`.
pub fn parse_port(value: &str) -> Result<u16, RefreshError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(|| RefreshError::InvalidPort(value.to_string()))
}
