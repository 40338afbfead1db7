use std::sync::Arc;

use pair_tracker_lib::{
    api::SettingsPatch,
    comms::{TrackingStatus, WorkerMessage},
    permission::{Capability, PermissionStatus},
    settings::UserSettings,
};
use tokio::sync::Mutex;

use crate::{
    mirror::SettingsMirror, permissions::PermissionManager, remote::SyncApi, worker::WorkerHost,
    SyncError,
};

/// Where the subsystem believes background tracking currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingSession {
    pub active: bool,
    pub show_notification: bool,
}

/// Orchestrates enabling, disabling and resuming background tracking across
/// the permission gates, the worker, the backend and the local mirror.
///
/// The ordering rules live here. The backend write is the commit point of
/// every flow: the worker only starts once the backend has acknowledged the
/// preference, and a failed write unwinds whatever this call set up.
#[derive(Clone)]
pub struct TrackingController {
    host: WorkerHost,
    permissions: PermissionManager,
    remote: Arc<dyn SyncApi>,
    mirror: SettingsMirror,
    session: Arc<Mutex<TrackingSession>>,
}

impl TrackingController {
    pub fn new(
        host: WorkerHost,
        permissions: PermissionManager,
        remote: Arc<dyn SyncApi>,
        mirror: SettingsMirror,
    ) -> Self {
        Self {
            host,
            permissions,
            remote,
            mirror,
            session: Arc::new(Mutex::new(TrackingSession::default())),
        }
    }

    pub async fn session(&self) -> TrackingSession {
        *self.session.lock().await
    }

    /// Whether the worker's sampling timer is armed right now.
    pub async fn tracking_status(&self) -> TrackingStatus {
        self.host.tracking_status().await
    }

    /// Turn background tracking on. Location permission gates the whole
    /// flow; notification permission only gates the notification itself.
    pub async fn enable_background_tracking(
        &self,
        show_notification: bool,
    ) -> Result<TrackingSession, SyncError> {
        let location = self.permissions.current().await.get(Capability::Location);
        if location != PermissionStatus::Granted
            && !self.permissions.request_location_permission().await
        {
            return Err(SyncError::PermissionDenied(Capability::Location));
        }

        let mut show = show_notification;
        if show {
            let status = self.permissions.current().await.get(Capability::Notification);
            let granted = status == PermissionStatus::Granted
                || self.permissions.request_notification_permission().await;
            if !granted {
                tracing::info!("Notification permission unavailable, tracking continues without it");
                show = false;
            }
        }

        let was_registered = self.host.is_registered().await;
        self.host.register().await?;

        let desired = UserSettings::new(true, show);
        let acknowledged = match self.remote.store_settings(desired.into()).await {
            Ok(settings) => settings,
            Err(err) => {
                // Unwind the registration this call created. A worker that
                // predates the call keeps running.
                if !was_registered {
                    self.host.unregister().await;
                }
                return Err(err);
            }
        };

        self.mirror.store(acknowledged).await;

        let session = {
            let mut slot = self.session.lock().await;
            slot.active = true;
            slot.show_notification = acknowledged.show_background_notification;
            *slot
        };

        self.host.post(WorkerMessage::StartTracking {
            show_notification: session.show_notification,
        });
        tracing::info!("Background tracking enabled");
        Ok(session)
    }

    /// Turn background tracking off. The worker stops before the backend
    /// write, so sampling halts even when the network is down; a failed
    /// write leaves the session marked active so the caller retries.
    pub async fn disable_background_tracking(&self) -> Result<TrackingSession, SyncError> {
        let session = *self.session.lock().await;
        if !session.active && !self.host.is_registered().await {
            return Ok(session);
        }

        self.host.post(WorkerMessage::StopTracking);
        self.host.unregister().await;

        let acknowledged = self.remote.store_settings(SettingsPatch::enabled(false)).await?;
        self.mirror.store(acknowledged).await;

        let session = {
            let mut slot = self.session.lock().await;
            slot.active = false;
            slot.show_notification = acknowledged.show_background_notification;
            *slot
        };

        tracing::info!("Background tracking disabled");
        Ok(session)
    }

    /// Change the per-sample notification preference of an active session.
    pub async fn set_notification_preference(
        &self,
        enabled: bool,
    ) -> Result<TrackingSession, SyncError> {
        if !self.session.lock().await.active {
            return Err(SyncError::InvalidState(
                "Background tracking is not active".to_string(),
            ));
        }

        if enabled {
            let status = self.permissions.current().await.get(Capability::Notification);
            let granted = status == PermissionStatus::Granted
                || self.permissions.request_notification_permission().await;
            if !granted {
                let status = self.permissions.current().await.get(Capability::Notification);
                return Err(if status == PermissionStatus::Unsupported {
                    SyncError::Unsupported(Capability::Notification)
                } else {
                    SyncError::PermissionDenied(Capability::Notification)
                });
            }
        }

        let acknowledged = self
            .remote
            .store_settings(SettingsPatch::notification(enabled))
            .await?;
        self.mirror.store(acknowledged).await;

        let session = {
            let mut slot = self.session.lock().await;
            slot.show_notification = acknowledged.show_background_notification;
            *slot
        };

        self.host.post(WorkerMessage::UpdateNotificationSetting {
            show_notification: session.show_notification,
        });
        Ok(session)
    }

    /// Bring tracking back after a restart. The local mirror answers first
    /// so the worker can start before the network is up; the backend's view
    /// then reconciles any drift in either direction.
    pub async fn resume(&self) -> TrackingSession {
        if let Some(hinted) = self.mirror.load().await {
            if hinted.background_location_enabled {
                match self.host.register().await {
                    Ok(()) => {
                        {
                            let mut slot = self.session.lock().await;
                            slot.active = true;
                            slot.show_notification = hinted.show_background_notification;
                        }
                        self.host.post(WorkerMessage::StartTracking {
                            show_notification: hinted.show_background_notification,
                        });
                        tracing::info!("Resumed background tracking from the local mirror");
                    }
                    Err(err) => {
                        tracing::warn!("Could not resume the worker from the mirror: {:?}", err);
                    }
                }
            }
        }

        match self.remote.fetch_settings().await {
            Ok(settings) => self.apply_remote_settings(settings).await,
            Err(err) => {
                tracing::warn!("Settings reconciliation failed, keeping the local view: {:?}", err);
            }
        }

        *self.session.lock().await
    }

    async fn apply_remote_settings(&self, settings: UserSettings) {
        let session = *self.session.lock().await;

        if settings.background_location_enabled && !session.active {
            match self.host.register().await {
                Ok(()) => {
                    {
                        let mut slot = self.session.lock().await;
                        slot.active = true;
                        slot.show_notification = settings.show_background_notification;
                    }
                    self.host.post(WorkerMessage::StartTracking {
                        show_notification: settings.show_background_notification,
                    });
                    tracing::info!("Backend re-enabled background tracking");
                }
                Err(err) => {
                    tracing::warn!("Could not start the worker for the backend settings: {:?}", err);
                }
            }
        } else if !settings.background_location_enabled && session.active {
            self.host.post(WorkerMessage::StopTracking);
            self.host.unregister().await;
            self.session.lock().await.active = false;
            tracing::info!("Backend disabled background tracking while we were away");
        } else if session.active && session.show_notification != settings.show_background_notification
        {
            self.session.lock().await.show_notification = settings.show_background_notification;
            self.host.post(WorkerMessage::UpdateNotificationSetting {
                show_notification: settings.show_background_notification,
            });
        }

        self.mirror.store(settings).await;
    }
}

#[cfg(test)]
use crate::{
    bus::MessageBus,
    platform::{Notifier, Platform},
    testing,
};

#[cfg(test)]
struct Rig {
    bus: MessageBus,
    remote: Arc<testing::FakeRemote>,
    geo: Arc<testing::ScriptedGeo>,
    host: WorkerHost,
    mirror: SettingsMirror,
    controller: TrackingController,
}

#[cfg(test)]
fn rig(tag: &str) -> Rig {
    rig_with(
        tag,
        testing::ScriptedGeo::granted(55.6761, 12.5683),
        Some(testing::RecordingNotifier::granting()),
    )
}

#[cfg(test)]
fn rig_with(
    tag: &str,
    geo: Arc<testing::ScriptedGeo>,
    notifier: Option<Arc<testing::RecordingNotifier>>,
) -> Rig {
    let bus = MessageBus::new();
    let remote = testing::FakeRemote::new();

    let mut platform = Platform::new(geo.clone());
    if let Some(notifier) = &notifier {
        platform = platform.with_notifier(notifier.clone());
    }

    let worker_notifier = notifier.map(|n| n as Arc<dyn Notifier>);
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        worker_notifier,
        std::time::Duration::from_secs(60),
    );
    let permissions = PermissionManager::new(platform, host.clone());
    let mirror = SettingsMirror::open(testing::temp_mirror_path(tag));
    let controller = TrackingController::new(
        host.clone(),
        permissions,
        remote.clone(),
        mirror.clone(),
    );

    Rig {
        bus,
        remote,
        geo,
        host,
        mirror,
        controller,
    }
}

#[tokio::test]
async fn enable_persists_starts_and_mirrors() {
    let rig = rig("enable_full");
    let mut observer = rig.bus.subscribe();

    let session = rig.controller.enable_background_tracking(true).await.unwrap();
    assert!(session.active);
    assert!(session.show_notification);

    let patch = *rig.remote.patches.lock().unwrap().last().unwrap();
    assert_eq!(patch.background_location_enabled, Some(true));
    assert_eq!(patch.show_background_notification, Some(true));

    assert_eq!(rig.mirror.load().await, Some(UserSettings::new(true, true)));

    testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStarted { .. })
    })
    .await;
    assert!(rig.controller.tracking_status().await.is_tracking);

    rig.host.unregister().await;
}

#[tokio::test]
async fn enable_fails_fast_when_location_is_denied() {
    let rig = rig_with(
        "enable_denied",
        testing::ScriptedGeo::denied(),
        Some(testing::RecordingNotifier::granting()),
    );

    let err = rig.controller.enable_background_tracking(false).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::PermissionDenied(Capability::Location)
    ));

    assert!(!rig.host.is_registered().await);
    assert!(rig.remote.patches.lock().unwrap().is_empty());
    assert_eq!(rig.mirror.load().await, None);
    assert_eq!(rig.geo.read_count(), 1);
}

#[tokio::test]
async fn enable_without_notification_permission_still_enables() {
    let rig = rig_with(
        "enable_quiet",
        testing::ScriptedGeo::granted(55.6761, 12.5683),
        Some(testing::RecordingNotifier::denying()),
    );

    let session = rig.controller.enable_background_tracking(true).await.unwrap();
    assert!(session.active);
    assert!(!session.show_notification);

    let patch = *rig.remote.patches.lock().unwrap().last().unwrap();
    assert_eq!(patch.show_background_notification, Some(false));

    rig.host.unregister().await;
}

#[tokio::test]
async fn enable_rolls_back_registration_when_persist_fails() {
    let rig = rig("enable_rollback");
    rig.remote.fail_settings();

    let err = rig.controller.enable_background_tracking(false).await.unwrap_err();
    assert!(matches!(err, SyncError::Sync(_)));

    assert!(!rig.host.is_registered().await);
    assert!(!rig.controller.session().await.active);
    assert_eq!(rig.mirror.load().await, None);
}

#[tokio::test]
async fn enable_keeps_a_preexisting_worker_on_persist_failure() {
    let rig = rig("enable_keep_worker");
    rig.host.register().await.unwrap();
    rig.remote.fail_settings();

    rig.controller.enable_background_tracking(false).await.unwrap_err();
    assert!(rig.host.is_registered().await);

    rig.host.unregister().await;
}

#[tokio::test]
async fn disable_stops_the_worker_then_persists() {
    let rig = rig("disable_full");
    rig.controller.enable_background_tracking(false).await.unwrap();

    let session = rig.controller.disable_background_tracking().await.unwrap();
    assert!(!session.active);
    assert!(!rig.host.is_registered().await);
    assert!(!rig.controller.tracking_status().await.is_tracking);

    let patch = *rig.remote.patches.lock().unwrap().last().unwrap();
    assert_eq!(patch.background_location_enabled, Some(false));
    assert_eq!(patch.show_background_notification, None);

    let mirrored = rig.mirror.load().await.unwrap();
    assert!(!mirrored.background_location_enabled);
}

#[tokio::test]
async fn disable_without_an_active_session_is_a_noop() {
    let rig = rig("disable_noop");

    let session = rig.controller.disable_background_tracking().await.unwrap();
    assert!(!session.active);
    assert!(rig.remote.patches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_disable_persist_leaves_the_session_active_for_retry() {
    let rig = rig("disable_retry");
    rig.controller.enable_background_tracking(false).await.unwrap();

    rig.remote.fail_settings();
    let err = rig.controller.disable_background_tracking().await.unwrap_err();
    assert!(matches!(err, SyncError::Sync(_)));

    // The worker is already gone, only the preference write is pending.
    assert!(!rig.host.is_registered().await);
    assert!(rig.controller.session().await.active);
    assert!(rig.mirror.load().await.unwrap().background_location_enabled);

    rig.remote.recover_settings();
    let session = rig.controller.disable_background_tracking().await.unwrap();
    assert!(!session.active);
    assert!(!rig.mirror.load().await.unwrap().background_location_enabled);
}

#[tokio::test]
async fn notification_toggle_requires_active_tracking() {
    let rig = rig("toggle_inactive");

    let err = rig.controller.set_notification_preference(true).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidState(_)));
}

#[tokio::test]
async fn notification_toggle_persists_and_reaches_the_worker() {
    let rig = rig("toggle_full");
    rig.controller.enable_background_tracking(false).await.unwrap();

    let mut observer = rig.bus.subscribe();
    let session = rig.controller.set_notification_preference(true).await.unwrap();
    assert!(session.show_notification);

    let patch = *rig.remote.patches.lock().unwrap().last().unwrap();
    assert_eq!(patch.background_location_enabled, None);
    assert_eq!(patch.show_background_notification, Some(true));

    let message = testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::UpdateNotificationSetting { .. })
    })
    .await;
    assert_eq!(
        message,
        WorkerMessage::UpdateNotificationSetting {
            show_notification: true,
        }
    );
    assert!(rig.mirror.load().await.unwrap().show_background_notification);

    rig.host.unregister().await;
}

#[tokio::test]
async fn notification_toggle_reports_unsupported_platforms() {
    let rig = rig_with(
        "toggle_unsupported",
        testing::ScriptedGeo::granted(55.6761, 12.5683),
        None,
    );
    rig.controller.enable_background_tracking(false).await.unwrap();

    let err = rig.controller.set_notification_preference(true).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Unsupported(Capability::Notification)
    ));

    rig.host.unregister().await;
}

#[tokio::test]
async fn notification_toggle_reports_denied_permission() {
    let rig = rig_with(
        "toggle_denied",
        testing::ScriptedGeo::granted(55.6761, 12.5683),
        Some(testing::RecordingNotifier::denying()),
    );
    rig.controller.enable_background_tracking(false).await.unwrap();

    let err = rig.controller.set_notification_preference(true).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::PermissionDenied(Capability::Notification)
    ));

    // The failed toggle wrote nothing: the only patch is the enable itself,
    // and the setting still reads false everywhere.
    assert_eq!(rig.remote.patches.lock().unwrap().len(), 1);
    assert!(!rig.remote.settings.lock().unwrap().show_background_notification);
    assert!(!rig.controller.session().await.show_notification);

    rig.host.unregister().await;
}

#[tokio::test]
async fn resume_restores_tracking_from_the_mirror() {
    let rig = rig("resume_mirror");
    rig.mirror.store(UserSettings::new(true, true)).await;
    rig.remote.set_settings(UserSettings::new(true, true));

    let mut observer = rig.bus.subscribe();
    let session = rig.controller.resume().await;
    assert!(session.active);
    assert!(session.show_notification);

    testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStarted { .. })
    })
    .await;
    assert!(rig.controller.tracking_status().await.is_tracking);

    rig.host.unregister().await;
}

#[tokio::test]
async fn resume_respects_a_backend_disable() {
    let rig = rig("resume_backend_off");
    rig.mirror.store(UserSettings::new(true, false)).await;
    rig.remote.set_settings(UserSettings::new(false, false));

    let session = rig.controller.resume().await;
    assert!(!session.active);
    assert!(!rig.host.is_registered().await);

    // The mirror now carries the backend's view.
    assert!(!rig.mirror.load().await.unwrap().background_location_enabled);
}

#[tokio::test]
async fn resume_keeps_the_mirror_view_when_the_backend_is_unreachable() {
    let rig = rig("resume_offline");
    rig.mirror.store(UserSettings::new(true, false)).await;
    rig.remote.fail_settings();

    let session = rig.controller.resume().await;
    assert!(session.active);
    assert!(rig.host.is_registered().await);

    rig.host.unregister().await;
}

#[tokio::test]
async fn resume_stays_idle_without_mirror_or_backend() {
    let rig = rig("resume_cold");
    rig.remote.fail_settings();

    let session = rig.controller.resume().await;
    assert!(!session.active);
    assert!(!rig.host.is_registered().await);
}

#[tokio::test]
async fn resume_applies_a_backend_enable_when_the_mirror_is_silent() {
    let rig = rig("resume_backend_on");
    rig.remote.set_settings(UserSettings::new(true, true));

    let mut observer = rig.bus.subscribe();
    let session = rig.controller.resume().await;
    assert!(session.active);
    assert!(session.show_notification);

    testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStarted { .. })
    })
    .await;

    rig.host.unregister().await;
}
