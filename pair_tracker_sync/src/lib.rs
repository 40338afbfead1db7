use std::time::Duration;

use const_format::concatcp;
use pair_tracker_lib::permission::Capability;

pub mod bridge;
pub mod bus;
pub mod config;
pub mod controller;
pub mod mirror;
pub mod permissions;
pub mod platform;
pub mod poller;
pub mod remote;
pub mod worker;

#[cfg(test)]
mod testing;

pub use controller::*;

pub const DATA_DIR: &str = "data/";
pub const MIRROR_FILE: &str = concatcp!(DATA_DIR, "settings_mirror.json");

/// How often the background worker samples while tracking.
pub const WORKER_SAMPLE_INTERVAL: Duration = Duration::from_secs(300);
/// How often the foreground poller pushes and refreshes the partner.
pub const FOREGROUND_PUSH_INTERVAL: Duration = Duration::from_secs(30);
/// Upper bound on a single position read from the platform.
pub const GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum SyncError {
    PermissionDenied(Capability),
    Unsupported(Capability),
    Sync(String),
    Registration(String),
    InvalidSample(String),
    InvalidState(String),
    Config(String),
}
