//! REST envelopes for the remote sync endpoint. The backend is the existing
//! product API, so field names are camelCase on the wire and every response
//! wraps its payload in a `{success, message, ...}` envelope.

use serde::{Deserialize, Serialize};

use crate::partner::PartnerState;
use crate::settings::UserSettings;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub battery_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user: Option<PartnerState>,
}

/// Partial settings write. `None` fields are left out of the request body so
/// the backend only touches what the caller changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_location_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_background_notification: Option<bool>,
}

impl SettingsPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            background_location_enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn notification(show: bool) -> Self {
        Self {
            show_background_notification: Some(show),
            ..Self::default()
        }
    }
}

impl From<UserSettings> for SettingsPatch {
    fn from(settings: UserSettings) -> Self {
        Self {
            background_location_enabled: Some(settings.background_location_enabled),
            show_background_notification: Some(settings.show_background_notification),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub settings: Option<UserSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub partner: Option<PartnerState>,
}

#[test]
fn settings_patch_omits_untouched_fields() {
    let json = serde_json::to_value(SettingsPatch::enabled(false)).unwrap();
    assert_eq!(json["backgroundLocationEnabled"], false);
    assert!(json.get("showBackgroundNotification").is_none());

    let json = serde_json::to_value(SettingsPatch::notification(true)).unwrap();
    assert!(json.get("backgroundLocationEnabled").is_none());
    assert_eq!(json["showBackgroundNotification"], true);
}

#[test]
fn full_settings_become_a_complete_patch() {
    let patch = SettingsPatch::from(UserSettings::new(true, false));
    assert_eq!(patch.background_location_enabled, Some(true));
    assert_eq!(patch.show_background_notification, Some(false));
}

#[test]
fn envelopes_tolerate_missing_optional_fields() {
    let response: SettingsResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
    assert!(!response.success);
    assert!(response.message.is_none());
    assert!(response.settings.is_none());
}
