use serde::{Deserialize, Serialize};

/// The four capabilities background sync depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Location,
    Background,
    Battery,
    Notification,
}

/// Authorization state of one capability. `Unsupported` means the platform
/// lacks the API entirely and is permanent, unlike `Denied`, which a user
/// can change their mind about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Unknown,
    Granted,
    Denied,
    Prompt,
    Unsupported,
}

/// Snapshot of all four capabilities, written by the permission manager and
/// read by the tracking controller before it allows tracking on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub location: PermissionStatus,
    pub background: PermissionStatus,
    pub battery: PermissionStatus,
    pub notification: PermissionStatus,
}

impl PermissionState {
    pub fn get(&self, capability: Capability) -> PermissionStatus {
        match capability {
            Capability::Location => self.location,
            Capability::Background => self.background,
            Capability::Battery => self.battery,
            Capability::Notification => self.notification,
        }
    }

    pub fn set(&mut self, capability: Capability, status: PermissionStatus) {
        match capability {
            Capability::Location => self.location = status,
            Capability::Background => self.background = status,
            Capability::Battery => self.battery = status,
            Capability::Notification => self.notification = status,
        }
    }
}

impl Default for PermissionState {
    fn default() -> Self {
        Self {
            location: PermissionStatus::Unknown,
            background: PermissionStatus::Unknown,
            battery: PermissionStatus::Unknown,
            notification: PermissionStatus::Unknown,
        }
    }
}

#[test]
fn get_and_set_cover_every_capability() {
    let mut state = PermissionState::default();
    for capability in [
        Capability::Location,
        Capability::Background,
        Capability::Battery,
        Capability::Notification,
    ] {
        assert_eq!(state.get(capability), PermissionStatus::Unknown);
        state.set(capability, PermissionStatus::Granted);
        assert_eq!(state.get(capability), PermissionStatus::Granted);
    }
}
