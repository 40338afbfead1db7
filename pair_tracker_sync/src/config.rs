use std::time::Duration;

use crate::{SyncError, FOREGROUND_PUSH_INTERVAL, WORKER_SAMPLE_INTERVAL};

/// Daemon configuration. Everything comes from the environment; the fixed
/// coordinates stand in for a positioning backend on headless hosts.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub api_token: String,
    pub sample_interval: Duration,
    pub push_interval: Duration,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_level: Option<u8>,
}

impl SyncConfig {
    /// Read the configuration from the process environment.
    pub fn load() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let require =
            |name: &str| get(name).ok_or_else(|| SyncError::Config(format!("{} is not set", name)));

        let api_url = require("PAIR_TRACKER_API_URL")?;
        let api_token = require("PAIR_TRACKER_API_TOKEN")?;

        let latitude: f64 = require("PAIR_TRACKER_LATITUDE")?.parse().map_err(|_| {
            SyncError::Config("PAIR_TRACKER_LATITUDE is not a valid coordinate".to_string())
        })?;
        let longitude: f64 = require("PAIR_TRACKER_LONGITUDE")?.parse().map_err(|_| {
            SyncError::Config("PAIR_TRACKER_LONGITUDE is not a valid coordinate".to_string())
        })?;

        let sample_interval = match get("PAIR_TRACKER_SAMPLE_INTERVAL_SECS") {
            Some(value) => Duration::from_secs(value.parse().map_err(|_| {
                SyncError::Config(
                    "PAIR_TRACKER_SAMPLE_INTERVAL_SECS is not a valid number of seconds".to_string(),
                )
            })?),
            None => WORKER_SAMPLE_INTERVAL,
        };

        let push_interval = match get("PAIR_TRACKER_PUSH_INTERVAL_SECS") {
            Some(value) => Duration::from_secs(value.parse().map_err(|_| {
                SyncError::Config(
                    "PAIR_TRACKER_PUSH_INTERVAL_SECS is not a valid number of seconds".to_string(),
                )
            })?),
            None => FOREGROUND_PUSH_INTERVAL,
        };

        let battery_level = match get("PAIR_TRACKER_BATTERY_LEVEL") {
            Some(value) => Some(value.parse().map_err(|_| {
                SyncError::Config("PAIR_TRACKER_BATTERY_LEVEL is not a valid percentage".to_string())
            })?),
            None => None,
        };

        Ok(Self {
            api_url,
            api_token,
            sample_interval,
            push_interval,
            latitude,
            longitude,
            battery_level,
        })
    }
}

#[cfg(test)]
fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |name| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

#[test]
fn load_fills_defaults_for_optional_values() {
    let config = SyncConfig::from_lookup(lookup(&[
        ("PAIR_TRACKER_API_URL", "http://localhost:8080"),
        ("PAIR_TRACKER_API_TOKEN", "secret"),
        ("PAIR_TRACKER_LATITUDE", "55.6761"),
        ("PAIR_TRACKER_LONGITUDE", "12.5683"),
    ]))
    .unwrap();

    assert_eq!(config.api_url, "http://localhost:8080");
    assert_eq!(config.sample_interval, WORKER_SAMPLE_INTERVAL);
    assert_eq!(config.push_interval, FOREGROUND_PUSH_INTERVAL);
    assert_eq!(config.latitude, 55.6761);
    assert_eq!(config.battery_level, None);
}

#[test]
fn explicit_values_override_the_defaults() {
    let config = SyncConfig::from_lookup(lookup(&[
        ("PAIR_TRACKER_API_URL", "http://localhost:8080"),
        ("PAIR_TRACKER_API_TOKEN", "secret"),
        ("PAIR_TRACKER_LATITUDE", "55.6761"),
        ("PAIR_TRACKER_LONGITUDE", "12.5683"),
        ("PAIR_TRACKER_SAMPLE_INTERVAL_SECS", "60"),
        ("PAIR_TRACKER_PUSH_INTERVAL_SECS", "5"),
        ("PAIR_TRACKER_BATTERY_LEVEL", "85"),
    ]))
    .unwrap();

    assert_eq!(config.sample_interval, Duration::from_secs(60));
    assert_eq!(config.push_interval, Duration::from_secs(5));
    assert_eq!(config.battery_level, Some(85));
}

#[test]
fn missing_required_values_are_reported_by_name() {
    let err = SyncConfig::from_lookup(lookup(&[])).unwrap_err();
    assert!(matches!(err, SyncError::Config(message) if message.contains("PAIR_TRACKER_API_URL")));
}

#[test]
fn malformed_numbers_are_rejected() {
    let err = SyncConfig::from_lookup(lookup(&[
        ("PAIR_TRACKER_API_URL", "http://localhost:8080"),
        ("PAIR_TRACKER_API_TOKEN", "secret"),
        ("PAIR_TRACKER_LATITUDE", "north"),
        ("PAIR_TRACKER_LONGITUDE", "12.5683"),
    ]))
    .unwrap_err();
    assert!(matches!(err, SyncError::Config(message) if message.contains("PAIR_TRACKER_LATITUDE")));
}
