use serde::{Deserialize, Serialize};

/// The two background-sync preferences. The remote store is the source of
/// truth; anything held locally is a mirror of the last acknowledged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub background_location_enabled: bool,
    pub show_background_notification: bool,
}

impl UserSettings {
    pub fn new(background_location_enabled: bool, show_background_notification: bool) -> Self {
        Self {
            background_location_enabled,
            show_background_notification,
        }
    }
}
