//! In-memory stand-ins for the platform and the remote endpoint, shared by
//! the test suites of the other modules.

use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use geo_types::Point;
use pair_tracker_lib::{
    api::{
        PartnerResponse, SettingsPatch, SettingsResponse, UpdateStatusRequest, UpdateStatusResponse,
    },
    comms::WorkerMessage,
    location_sample::LocationSample,
    partner::PartnerState,
    permission::PermissionStatus,
    settings::UserSettings,
};

use crate::{
    bus::BusSubscription,
    platform::{GeoError, GeoFix, GeoOptions, GeolocationSource, Notifier},
    remote::SyncApi,
    SyncError,
};

/// Scriptable in-memory endpoint implementing [`SyncApi`].
pub struct FakeRemote {
    pub settings: Mutex<UserSettings>,
    pub partner: Mutex<Option<PartnerState>>,
    pub pushes: Mutex<Vec<LocationSample>>,
    pub patches: Mutex<Vec<SettingsPatch>>,
    partner_fetches: AtomicUsize,
    settings_broken: AtomicBool,
    pushes_broken: AtomicBool,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            settings: Mutex::new(UserSettings::default()),
            partner: Mutex::new(None),
            pushes: Mutex::new(Vec::new()),
            patches: Mutex::new(Vec::new()),
            partner_fetches: AtomicUsize::new(0),
            settings_broken: AtomicBool::new(false),
            pushes_broken: AtomicBool::new(false),
        })
    }

    pub fn set_settings(&self, settings: UserSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    pub fn set_partner(&self, partner: PartnerState) {
        *self.partner.lock().unwrap() = Some(partner);
    }

    pub fn fail_settings(&self) {
        self.settings_broken.store(true, Ordering::SeqCst);
    }

    pub fn recover_settings(&self) {
        self.settings_broken.store(false, Ordering::SeqCst);
    }

    pub fn fail_pushes(&self) {
        self.pushes_broken.store(true, Ordering::SeqCst);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn partner_fetch_count(&self) -> usize {
        self.partner_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SyncApi for FakeRemote {
    async fn push_location(&self, sample: &LocationSample) -> Result<(), SyncError> {
        if self.pushes_broken.load(Ordering::SeqCst) {
            return Err(SyncError::Sync("push rejected".to_string()));
        }
        self.pushes.lock().unwrap().push(*sample);
        Ok(())
    }

    async fn fetch_settings(&self) -> Result<UserSettings, SyncError> {
        if self.settings_broken.load(Ordering::SeqCst) {
            return Err(SyncError::Sync("settings unavailable".to_string()));
        }
        Ok(*self.settings.lock().unwrap())
    }

    async fn store_settings(&self, patch: SettingsPatch) -> Result<UserSettings, SyncError> {
        if self.settings_broken.load(Ordering::SeqCst) {
            return Err(SyncError::Sync("settings unavailable".to_string()));
        }
        self.patches.lock().unwrap().push(patch);

        let mut settings = self.settings.lock().unwrap();
        if let Some(enabled) = patch.background_location_enabled {
            settings.background_location_enabled = enabled;
        }
        if let Some(show) = patch.show_background_notification {
            settings.show_background_notification = show;
        }
        Ok(*settings)
    }

    async fn fetch_partner(&self) -> Result<Option<PartnerState>, SyncError> {
        self.partner_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.partner.lock().unwrap().clone())
    }
}

/// Geolocation source with a fixed answer and an optional queue of one-shot
/// failures served before it.
pub struct ScriptedGeo {
    base: Result<(Point, f64), GeoError>,
    queued: Mutex<VecDeque<GeoError>>,
    reads: AtomicUsize,
    hint: PermissionStatus,
}

impl ScriptedGeo {
    pub fn granted(latitude: f64, longitude: f64) -> Arc<Self> {
        Arc::new(Self {
            base: Ok((Point::new(longitude, latitude), 25.0)),
            queued: Mutex::new(VecDeque::new()),
            reads: AtomicUsize::new(0),
            hint: PermissionStatus::Granted,
        })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            base: Err(GeoError::PermissionDenied),
            queued: Mutex::new(VecDeque::new()),
            reads: AtomicUsize::new(0),
            hint: PermissionStatus::Denied,
        })
    }

    pub fn queue_failure(&self, error: GeoError) {
        self.queued.lock().unwrap().push_back(error);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GeolocationSource for ScriptedGeo {
    async fn current_position(&self, _options: GeoOptions) -> Result<GeoFix, GeoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.queued.lock().unwrap().pop_front() {
            return Err(error);
        }
        match &self.base {
            Ok((position, accuracy)) => Ok(GeoFix {
                position: *position,
                accuracy: *accuracy,
                timestamp: Utc::now(),
            }),
            Err(error) => Err(error.clone()),
        }
    }

    fn permission_hint(&self) -> Option<PermissionStatus> {
        Some(self.hint)
    }
}

/// Notifier that records what it shows and answers permission requests with
/// a fixed verdict.
pub struct RecordingNotifier {
    permission: Mutex<PermissionStatus>,
    grants: bool,
    pub notifications: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            permission: Mutex::new(PermissionStatus::Prompt),
            grants: true,
            notifications: Mutex::new(Vec::new()),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            permission: Mutex::new(PermissionStatus::Prompt),
            grants: false,
            notifications: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn permission(&self) -> PermissionStatus {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionStatus {
        let status = if self.grants {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        *self.permission.lock().unwrap() = status;
        status
    }

    async fn notify(&self, title: &str, body: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

pub fn sample_at(latitude: f64, longitude: f64, battery_level: Option<u8>) -> LocationSample {
    LocationSample::new(latitude, longitude, 25.0, battery_level, Utc::now())
}

/// Unique mirror path per test. The parent directory does not exist yet.
pub fn temp_mirror_path(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    std::env::temp_dir()
        .join(format!("pair_tracker_{}_{}_{}", std::process::id(), tag, nanos))
        .join("settings_mirror.json")
}

/// Next bus message the predicate accepts, or a panic after two seconds.
pub async fn await_message(
    subscription: &mut BusSubscription,
    accept: impl Fn(&WorkerMessage) -> bool,
) -> WorkerMessage {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let Some(message) = subscription.recv().await else {
                panic!("bus closed while waiting for a message");
            };
            if accept(&message) {
                return message;
            }
        }
    })
    .await
    .expect("timed out waiting for a bus message")
}

/// Poll a condition until it holds, or panic after two seconds.
pub async fn await_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// HTTP fixture mimicking the product API for [`crate::remote::SyncClient`].
#[derive(Default)]
pub struct FakeEndpoint {
    pub pushes: Mutex<Vec<UpdateStatusRequest>>,
    pub settings: Mutex<UserSettings>,
    pub partner: Mutex<Option<PartnerState>>,
    pub last_auth: Mutex<Option<String>>,
    failure: Mutex<Option<String>>,
}

impl FakeEndpoint {
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_partner(&self, partner: PartnerState) {
        *self.partner.lock().unwrap() = Some(partner);
    }

    fn current_failure(&self) -> Option<String> {
        self.failure.lock().unwrap().clone()
    }
}

pub async fn spawn_fake_endpoint() -> (String, Arc<FakeEndpoint>) {
    let state = Arc::new(FakeEndpoint::default());
    let app = Router::new()
        .route("/user/update-status", post(post_status))
        .route("/user/settings", get(get_settings).post(store_settings))
        .route("/user/partner", get(get_partner))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", address), state)
}

async fn post_status(
    State(state): State<Arc<FakeEndpoint>>,
    headers: HeaderMap,
    Json(body): Json<UpdateStatusRequest>,
) -> Json<UpdateStatusResponse> {
    record_auth(&state, &headers);
    if let Some(message) = state.current_failure() {
        return Json(UpdateStatusResponse {
            success: false,
            message: Some(message),
            user: None,
        });
    }

    state.pushes.lock().unwrap().push(body);
    Json(UpdateStatusResponse {
        success: true,
        message: None,
        user: None,
    })
}

async fn get_settings(State(state): State<Arc<FakeEndpoint>>) -> Json<SettingsResponse> {
    if let Some(message) = state.current_failure() {
        return Json(SettingsResponse {
            success: false,
            message: Some(message),
            settings: None,
        });
    }

    Json(SettingsResponse {
        success: true,
        message: None,
        settings: Some(*state.settings.lock().unwrap()),
    })
}

async fn store_settings(
    State(state): State<Arc<FakeEndpoint>>,
    Json(patch): Json<SettingsPatch>,
) -> Json<SettingsResponse> {
    if let Some(message) = state.current_failure() {
        return Json(SettingsResponse {
            success: false,
            message: Some(message),
            settings: None,
        });
    }

    let mut settings = state.settings.lock().unwrap();
    if let Some(enabled) = patch.background_location_enabled {
        settings.background_location_enabled = enabled;
    }
    if let Some(show) = patch.show_background_notification {
        settings.show_background_notification = show;
    }
    Json(SettingsResponse {
        success: true,
        message: None,
        settings: Some(*settings),
    })
}

async fn get_partner(State(state): State<Arc<FakeEndpoint>>) -> Json<PartnerResponse> {
    Json(PartnerResponse {
        success: true,
        message: None,
        partner: state.partner.lock().unwrap().clone(),
    })
}

fn record_auth(state: &FakeEndpoint, headers: &HeaderMap) {
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    *state.last_auth.lock().unwrap() = auth;
}
