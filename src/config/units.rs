//! Size and duration values as written in config files

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parse a size string (e.g., "1g", "100M", "4k") to bytes
///
/// Suffixes are powers of 1024; a trailing `b` (`kb`, `mb`...) is accepted.
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let lower = s.trim().to_lowercase();
    let trimmed = lower
        .strip_suffix('b')
        .filter(|t| !t.is_empty())
        .unwrap_or(lower.as_str());

    let (num, shift) = match trimmed.char_indices().last() {
        Some((i, 'k')) => (&trimmed[..i], 10),
        Some((i, 'm')) => (&trimmed[..i], 20),
        Some((i, 'g')) => (&trimmed[..i], 30),
        Some((i, 't')) => (&trimmed[..i], 40),
        _ => (trimmed, 0),
    };

    num.trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(1u64 << shift))
        .ok_or_else(|| ConfigError::Size(s.to_string()))
}

/// Parse a duration string (e.g., "250ms", "60s", "5m", "1h"); bare digits are seconds
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let lower = s.trim().to_lowercase();
    let err = || ConfigError::Duration(s.to_string());

    let (num, unit_ms): (&str, u64) = if let Some(n) = lower.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = lower.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = lower.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (lower.as_str(), 1_000)
    };

    let n: u64 = num.trim().parse().map_err(|_| err())?;
    n.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(err)
}

/// Byte count as an integer or a suffixed string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

impl SizeValue {
    pub fn bytes(&self) -> Result<u64, ConfigError> {
        match self {
            SizeValue::Bytes(n) => Ok(*n),
            SizeValue::Text(s) => parse_size(s),
        }
    }
}

/// Duration as integer seconds or a suffixed string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub fn duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(n) => Ok(Duration::from_secs(*n)),
            DurationValue::Text(s) => parse_duration(s),
        }
    }
}
