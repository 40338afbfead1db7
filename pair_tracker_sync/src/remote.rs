use pair_tracker_lib::{
    api::{PartnerResponse, SettingsPatch, SettingsResponse, UpdateStatusRequest, UpdateStatusResponse},
    location_sample::LocationSample,
    partner::PartnerState,
    settings::UserSettings,
};

use crate::SyncError;

/// Operations the subsystem needs from the remote sync endpoint.
///
/// Everything that talks to the backend goes through this trait, so tests can
/// swap in an in-memory endpoint.
#[async_trait::async_trait]
pub trait SyncApi: Send + Sync {
    /// Push one location sample to the account's live status.
    async fn push_location(&self, sample: &LocationSample) -> Result<(), SyncError>;

    /// Settings as the backend currently has them.
    async fn fetch_settings(&self) -> Result<UserSettings, SyncError>;

    /// Apply a partial settings write. Returns the settings after the write.
    async fn store_settings(&self, patch: SettingsPatch) -> Result<UserSettings, SyncError>;

    /// Latest known state of the paired partner. `None` when unpaired.
    async fn fetch_partner(&self) -> Result<Option<PartnerState>, SyncError>;
}

/// HTTP client for the product API.
#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl SyncClient {
    pub fn new(base_url: &str, api_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl SyncApi for SyncClient {
    async fn push_location(&self, sample: &LocationSample) -> Result<(), SyncError> {
        sample
            .validate()
            .map_err(|reason| SyncError::InvalidSample(reason.to_string()))?;

        let request = UpdateStatusRequest {
            latitude: sample.latitude(),
            longitude: sample.longitude(),
            battery_level: sample.battery_level,
        };

        let response = self
            .http
            .post(format!("{}/user/update-status", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|_| SyncError::Sync("Failed to reach sync endpoint".to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Sync(format!(
                "Status update rejected: {}",
                response.status()
            )));
        }

        let envelope: UpdateStatusResponse = response
            .json()
            .await
            .map_err(|_| SyncError::Sync("Failed to parse status response".to_string()))?;

        if !envelope.success {
            return Err(SyncError::Sync(
                envelope
                    .message
                    .unwrap_or_else(|| "Status update rejected".to_string()),
            ));
        }

        Ok(())
    }

    async fn fetch_settings(&self) -> Result<UserSettings, SyncError> {
        let response = self
            .http
            .get(format!("{}/user/settings", self.base_url))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|_| SyncError::Sync("Failed to reach sync endpoint".to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Sync(format!(
                "Settings fetch rejected: {}",
                response.status()
            )));
        }

        let envelope: SettingsResponse = response
            .json()
            .await
            .map_err(|_| SyncError::Sync("Failed to parse settings response".to_string()))?;

        if !envelope.success {
            return Err(SyncError::Sync(
                envelope
                    .message
                    .unwrap_or_else(|| "Settings fetch rejected".to_string()),
            ));
        }

        envelope
            .settings
            .ok_or_else(|| SyncError::Sync("Settings missing from response".to_string()))
    }

    async fn store_settings(&self, patch: SettingsPatch) -> Result<UserSettings, SyncError> {
        let response = self
            .http
            .post(format!("{}/user/settings", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&patch)
            .send()
            .await
            .map_err(|_| SyncError::Sync("Failed to reach sync endpoint".to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Sync(format!(
                "Settings update rejected: {}",
                response.status()
            )));
        }

        let envelope: SettingsResponse = response
            .json()
            .await
            .map_err(|_| SyncError::Sync("Failed to parse settings response".to_string()))?;

        if !envelope.success {
            return Err(SyncError::Sync(
                envelope
                    .message
                    .unwrap_or_else(|| "Settings update rejected".to_string()),
            ));
        }

        envelope
            .settings
            .ok_or_else(|| SyncError::Sync("Settings missing from response".to_string()))
    }

    async fn fetch_partner(&self) -> Result<Option<PartnerState>, SyncError> {
        let response = self
            .http
            .get(format!("{}/user/partner", self.base_url))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|_| SyncError::Sync("Failed to reach sync endpoint".to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Sync(format!(
                "Partner fetch rejected: {}",
                response.status()
            )));
        }

        let envelope: PartnerResponse = response
            .json()
            .await
            .map_err(|_| SyncError::Sync("Failed to parse partner response".to_string()))?;

        if !envelope.success {
            return Err(SyncError::Sync(
                envelope
                    .message
                    .unwrap_or_else(|| "Partner fetch rejected".to_string()),
            ));
        }

        Ok(envelope.partner)
    }
}

#[tokio::test]
async fn client_pushes_samples_and_reads_the_envelope() {
    let (base_url, endpoint) = crate::testing::spawn_fake_endpoint().await;
    let client = SyncClient::new(&base_url, "test-token");

    let sample = crate::testing::sample_at(55.6761, 12.5683, Some(80));
    client.push_location(&sample).await.unwrap();

    let pushes = endpoint.pushes.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].latitude, 55.6761);
    assert_eq!(pushes[0].longitude, 12.5683);
    assert_eq!(pushes[0].battery_level, Some(80));

    let auth = endpoint.last_auth.lock().unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer test-token"));
}

#[tokio::test]
async fn client_surfaces_envelope_failures() {
    let (base_url, endpoint) = crate::testing::spawn_fake_endpoint().await;
    endpoint.fail_with("sync disabled");

    let client = SyncClient::new(&base_url, "test-token");
    let sample = crate::testing::sample_at(55.6761, 12.5683, None);

    let err = client.push_location(&sample).await.unwrap_err();
    assert!(matches!(err, SyncError::Sync(message) if message == "sync disabled"));

    let err = client.fetch_settings().await.unwrap_err();
    assert!(matches!(err, SyncError::Sync(_)));
}

#[tokio::test]
async fn client_stores_only_the_named_settings() {
    let (base_url, endpoint) = crate::testing::spawn_fake_endpoint().await;
    {
        let mut settings = endpoint.settings.lock().unwrap();
        settings.show_background_notification = true;
    }

    let client = SyncClient::new(&base_url, "test-token");
    let updated = client
        .store_settings(pair_tracker_lib::api::SettingsPatch::enabled(true))
        .await
        .unwrap();

    assert!(updated.background_location_enabled);
    assert!(updated.show_background_notification);

    let fetched = client.fetch_settings().await.unwrap();
    assert_eq!(fetched, updated);
}

#[tokio::test]
async fn client_fetches_partner_state() {
    let (base_url, endpoint) = crate::testing::spawn_fake_endpoint().await;
    let client = SyncClient::new(&base_url, "test-token");

    assert_eq!(client.fetch_partner().await.unwrap(), None);

    endpoint.set_partner(pair_tracker_lib::partner::PartnerState::new(
        "Alex".to_string(),
        55.6761,
        12.5683,
        Some(64),
        chrono::Utc::now(),
    ));

    let partner = client.fetch_partner().await.unwrap().unwrap();
    assert_eq!(partner.name, "Alex");
    assert_eq!(partner.battery_level, Some(64));
}

#[tokio::test]
async fn push_rejects_invalid_samples_before_any_network_io() {
    // Unroutable port. The validation failure must short-circuit the call.
    let client = SyncClient::new("http://127.0.0.1:9", "test-token");
    let sample = crate::testing::sample_at(f64::NAN, 12.5683, None);

    let err = client.push_location(&sample).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidSample(_)));
}
