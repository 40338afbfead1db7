use std::sync::Arc;

use pair_tracker_lib::permission::{Capability, PermissionState, PermissionStatus};
use tokio::sync::Mutex;

use crate::{
    platform::{GeoOptions, Platform},
    worker::WorkerHost,
};

/// Tracks what the platform lets the subsystem do. Checks are cheap and
/// never prompt; requests may put a dialog in front of the user.
#[derive(Clone)]
pub struct PermissionManager {
    platform: Platform,
    host: WorkerHost,
    state: Arc<Mutex<PermissionState>>,
}

impl PermissionManager {
    pub fn new(platform: Platform, host: WorkerHost) -> Self {
        Self {
            platform,
            host,
            state: Arc::new(Mutex::new(PermissionState::default())),
        }
    }

    /// Last recorded snapshot, without touching the platform.
    pub async fn current(&self) -> PermissionState {
        *self.state.lock().await
    }

    /// Probe every capability without prompting and record the snapshot.
    pub async fn check_permissions(&self) -> PermissionState {
        let mut state = PermissionState::default();

        state.set(
            Capability::Location,
            self.platform
                .geolocation
                .permission_hint()
                .unwrap_or(PermissionStatus::Unknown),
        );

        // Background execution is granted exactly when a worker is in place.
        let background = if self.host.is_registered().await {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Prompt
        };
        state.set(Capability::Background, background);

        let battery = match &self.platform.battery {
            None => PermissionStatus::Unsupported,
            Some(source) => match source.battery_level().await {
                Ok(_) => PermissionStatus::Granted,
                Err(_) => PermissionStatus::Denied,
            },
        };
        state.set(Capability::Battery, battery);

        let notification = match &self.platform.notifier {
            None => PermissionStatus::Unsupported,
            Some(notifier) => notifier.permission(),
        };
        state.set(Capability::Notification, notification);

        *self.state.lock().await = state;
        state
    }

    /// Trigger the platform's location prompt by reading once. Returns
    /// whether access is granted afterwards.
    pub async fn request_location_permission(&self) -> bool {
        let granted = match self.platform.read_position(GeoOptions::sample()).await {
            Ok(_) => true,
            Err(err) => {
                tracing::info!("Location permission request failed: {:?}", err);
                false
            }
        };

        let status = if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        self.state.lock().await.set(Capability::Location, status);
        granted
    }

    /// Ask the platform's notifier for permission. Platforms without one
    /// report unsupported and never prompt.
    pub async fn request_notification_permission(&self) -> bool {
        let Some(notifier) = &self.platform.notifier else {
            self.state
                .lock()
                .await
                .set(Capability::Notification, PermissionStatus::Unsupported);
            return false;
        };

        let status = notifier.request_permission().await;
        self.state.lock().await.set(Capability::Notification, status);
        status == PermissionStatus::Granted
    }
}

#[tokio::test]
async fn check_probes_every_capability() {
    use crate::platform::StaticBattery;
    use crate::{bus::MessageBus, testing};

    let bus = MessageBus::new();
    let host = WorkerHost::new(bus, testing::FakeRemote::new(), None);
    let geo = testing::ScriptedGeo::granted(55.6761, 12.5683);
    let notifier = testing::RecordingNotifier::granting();
    let platform = Platform::new(geo)
        .with_battery(Arc::new(StaticBattery(80)))
        .with_notifier(notifier);

    let manager = PermissionManager::new(platform, host.clone());
    let state = manager.check_permissions().await;

    assert_eq!(state.get(Capability::Location), PermissionStatus::Granted);
    assert_eq!(state.get(Capability::Background), PermissionStatus::Prompt);
    assert_eq!(state.get(Capability::Battery), PermissionStatus::Granted);
    assert_eq!(
        state.get(Capability::Notification),
        PermissionStatus::Prompt
    );
    assert_eq!(manager.current().await, state);

    // A second check without any permission-affecting action in between
    // reports the same snapshot.
    assert_eq!(manager.check_permissions().await, state);

    host.register().await.unwrap();
    let state = manager.check_permissions().await;
    assert_eq!(state.get(Capability::Background), PermissionStatus::Granted);

    host.unregister().await;
}

#[tokio::test]
async fn missing_services_report_unsupported() {
    use crate::{bus::MessageBus, testing};

    let bus = MessageBus::new();
    let host = WorkerHost::new(bus, testing::FakeRemote::new(), None);
    let geo = testing::ScriptedGeo::granted(55.6761, 12.5683);
    let manager = PermissionManager::new(Platform::new(geo), host);

    let state = manager.check_permissions().await;
    assert_eq!(state.get(Capability::Battery), PermissionStatus::Unsupported);
    assert_eq!(
        state.get(Capability::Notification),
        PermissionStatus::Unsupported
    );

    assert!(!manager.request_notification_permission().await);
    assert_eq!(
        manager.current().await.get(Capability::Notification),
        PermissionStatus::Unsupported
    );
}

#[tokio::test]
async fn location_request_follows_the_platform_answer() {
    use crate::{bus::MessageBus, testing};

    let bus = MessageBus::new();
    let host = WorkerHost::new(bus, testing::FakeRemote::new(), None);

    let denied = PermissionManager::new(Platform::new(testing::ScriptedGeo::denied()), host.clone());
    assert!(!denied.request_location_permission().await);
    assert_eq!(
        denied.current().await.get(Capability::Location),
        PermissionStatus::Denied
    );

    let granted = PermissionManager::new(
        Platform::new(testing::ScriptedGeo::granted(55.6761, 12.5683)),
        host,
    );
    assert!(granted.request_location_permission().await);
    assert_eq!(
        granted.current().await.get(Capability::Location),
        PermissionStatus::Granted
    );
}

#[tokio::test]
async fn notification_request_records_the_answer() {
    use crate::{bus::MessageBus, testing};

    let bus = MessageBus::new();
    let host = WorkerHost::new(bus, testing::FakeRemote::new(), None);
    let geo = testing::ScriptedGeo::granted(55.6761, 12.5683);

    let denying = testing::RecordingNotifier::denying();
    let manager = PermissionManager::new(
        Platform::new(geo.clone()).with_notifier(denying),
        host.clone(),
    );
    assert!(!manager.request_notification_permission().await);
    assert_eq!(
        manager.current().await.get(Capability::Notification),
        PermissionStatus::Denied
    );

    let granting = testing::RecordingNotifier::granting();
    let manager = PermissionManager::new(Platform::new(geo).with_notifier(granting), host);
    assert!(manager.request_notification_permission().await);
    assert_eq!(
        manager.current().await.get(Capability::Notification),
        PermissionStatus::Granted
    );
}
