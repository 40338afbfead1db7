use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence snapshot for one side of the pair as stored by the backend.
/// The partner's copy is what the foreground renders; the field names match
/// the product API, so this doubles as the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerState {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_level: Option<u8>,
    pub last_seen: DateTime<Utc>,
}

impl PartnerState {
    pub fn new(
        name: String,
        latitude: f64,
        longitude: f64,
        battery_level: Option<u8>,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            latitude,
            longitude,
            battery_level,
            last_seen,
        }
    }
}

#[test]
fn wire_shape_is_camel_case() {
    let state = PartnerState::new("Alex".into(), 55.6761, 12.5683, Some(42), Utc::now());
    let json = serde_json::to_value(&state).unwrap();
    assert!(json.get("batteryLevel").is_some());
    assert!(json.get("lastSeen").is_some());
    assert!(json.get("battery_level").is_none());
}
