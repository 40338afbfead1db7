use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location_sample::LocationSample;

/// Position payload as it travels between the worker and foreground
/// contexts. Plain latitude/longitude fields, matching the wire table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

/// Message protocol between the background worker and foreground contexts.
///
/// Everything here is fire-and-forget over the shared broadcast bus; the
/// status query runs on a dedicated reply channel instead and so has no
/// variant. Handlers match exhaustively and ignore kinds not addressed to
/// them; an unrecognized tag deserializes to [`WorkerMessage::Unknown`]
/// rather than failing the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "START_TRACKING", rename_all = "camelCase")]
    StartTracking { show_notification: bool },

    #[serde(rename = "STOP_TRACKING")]
    StopTracking,

    #[serde(rename = "REQUEST_LOCATION")]
    RequestLocation,

    #[serde(rename = "LOCATION_UPDATE", rename_all = "camelCase")]
    LocationUpdate {
        position: Position,
        battery_level: Option<u8>,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "TRACKING_STARTED")]
    TrackingStarted {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "TRACKING_STOPPED")]
    TrackingStopped {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "UPDATE_NOTIFICATION_SETTING", rename_all = "camelCase")]
    UpdateNotificationSetting { show_notification: bool },

    #[serde(other)]
    Unknown,
}

impl WorkerMessage {
    /// Builds the delivery message for a gathered sample.
    pub fn location_update(sample: &LocationSample) -> Self {
        WorkerMessage::LocationUpdate {
            position: Position {
                latitude: sample.latitude(),
                longitude: sample.longitude(),
                accuracy: sample.accuracy,
            },
            battery_level: sample.battery_level,
            timestamp: sample.timestamp,
        }
    }
}

/// Reply payload of the status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub is_tracking: bool,
}

#[test]
fn messages_serialize_with_screaming_type_tags() {
    let json = serde_json::to_value(&WorkerMessage::StartTracking { show_notification: true }).unwrap();
    assert_eq!(json["type"], "START_TRACKING");
    assert_eq!(json["showNotification"], true);

    let json = serde_json::to_value(&WorkerMessage::StopTracking).unwrap();
    assert_eq!(json["type"], "STOP_TRACKING");
}

#[test]
fn location_update_round_trips_with_millisecond_timestamps() {
    let timestamp = DateTime::from_timestamp_millis(1_735_000_000_123).unwrap();
    let message = WorkerMessage::LocationUpdate {
        position: Position { latitude: 55.6761, longitude: 12.5683, accuracy: 8.0 },
        battery_level: Some(73),
        timestamp,
    };

    let json = serde_json::to_value(&message).unwrap();
    assert_eq!(json["type"], "LOCATION_UPDATE");
    assert_eq!(json["timestamp"], 1_735_000_000_123i64);
    assert_eq!(json["batteryLevel"], 73);

    let back: WorkerMessage = serde_json::from_value(json).unwrap();
    assert_eq!(back, message);
}

#[test]
fn unrecognized_message_types_become_unknown() {
    let parsed: WorkerMessage =
        serde_json::from_str(r#"{"type":"SOMETHING_NEW","payload":1}"#).unwrap();
    assert_eq!(parsed, WorkerMessage::Unknown);
}
