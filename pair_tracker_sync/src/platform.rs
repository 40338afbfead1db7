use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use geo_types::Point;
use pair_tracker_lib::permission::PermissionStatus;

use crate::GEOLOCATION_TIMEOUT;

/// Battery level assumed for platforms with no battery API at all. Such
/// devices are treated as running on mains power.
pub const ASSUMED_MAINS_BATTERY_LEVEL: u8 = 100;

/// Options for a single position read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the backend may hand back instead of a fresh one.
    pub max_age: Duration,
}

impl GeoOptions {
    /// Options for tracking samples: fresh, accurate, bounded.
    pub fn sample() -> Self {
        Self {
            high_accuracy: true,
            timeout: GEOLOCATION_TIMEOUT,
            max_age: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoError {
    PermissionDenied,
    Unavailable(String),
    Timeout,
}

/// One position fix as reported by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFix {
    pub position: Point,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait GeolocationSource: Send + Sync {
    async fn current_position(&self, options: GeoOptions) -> Result<GeoFix, GeoError>;

    /// Permission state the backend can report without prompting the user.
    fn permission_hint(&self) -> Option<PermissionStatus> {
        None
    }
}

#[async_trait::async_trait]
pub trait BatterySource: Send + Sync {
    async fn battery_level(&self) -> Result<u8, String>;
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn permission(&self) -> PermissionStatus;
    async fn request_permission(&self) -> PermissionStatus;
    async fn notify(&self, title: &str, body: &str);
}

/// Device services available to this process. `None` means the platform has
/// no such capability at all, as opposed to one that exists but is denied.
#[derive(Clone)]
pub struct Platform {
    pub geolocation: Arc<dyn GeolocationSource>,
    pub battery: Option<Arc<dyn BatterySource>>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl Platform {
    pub fn new(geolocation: Arc<dyn GeolocationSource>) -> Self {
        Self {
            geolocation,
            battery: None,
            notifier: None,
        }
    }

    pub fn with_battery(mut self, battery: Arc<dyn BatterySource>) -> Self {
        self.battery = Some(battery);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Read a position with a hard upper bound on how long the backend may
    /// take, independent of whether it honors `options.timeout` itself.
    pub async fn read_position(&self, options: GeoOptions) -> Result<GeoFix, GeoError> {
        match tokio::time::timeout(options.timeout, self.geolocation.current_position(options)).await
        {
            Ok(result) => result,
            Err(_) => Err(GeoError::Timeout),
        }
    }

    /// Battery level to attach to a sample. No battery API counts as mains
    /// power; a failing read yields no level at all.
    pub async fn read_battery(&self) -> Option<u8> {
        let Some(battery) = &self.battery else {
            return Some(ASSUMED_MAINS_BATTERY_LEVEL);
        };

        match battery.battery_level().await {
            Ok(level) => Some(level),
            Err(err) => {
                tracing::debug!("Battery read failed: {}", err);
                None
            }
        }
    }
}

/// Fixed-coordinate source for deployments without a real positioning
/// backend, such as the reference daemon.
pub struct FixedPositionSource {
    position: Point,
    accuracy: f64,
}

impl FixedPositionSource {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            position: Point::new(longitude, latitude),
            accuracy,
        }
    }
}

#[async_trait::async_trait]
impl GeolocationSource for FixedPositionSource {
    async fn current_position(&self, _options: GeoOptions) -> Result<GeoFix, GeoError> {
        Ok(GeoFix {
            position: self.position,
            accuracy: self.accuracy,
            timestamp: Utc::now(),
        })
    }

    fn permission_hint(&self) -> Option<PermissionStatus> {
        Some(PermissionStatus::Granted)
    }
}

/// Constant battery level for hosts that expose none of their own.
pub struct StaticBattery(pub u8);

#[async_trait::async_trait]
impl BatterySource for StaticBattery {
    async fn battery_level(&self) -> Result<u8, String> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn read_position_times_out_when_the_backend_hangs() {
    struct HangingSource;

    #[async_trait::async_trait]
    impl GeolocationSource for HangingSource {
        async fn current_position(&self, _options: GeoOptions) -> Result<GeoFix, GeoError> {
            std::future::pending().await
        }
    }

    let platform = Platform::new(Arc::new(HangingSource));
    let options = GeoOptions {
        timeout: Duration::from_millis(20),
        ..GeoOptions::sample()
    };

    assert_eq!(
        platform.read_position(options).await,
        Err(GeoError::Timeout)
    );
}

#[tokio::test]
async fn missing_battery_api_counts_as_mains_power() {
    let platform = Platform::new(Arc::new(FixedPositionSource::new(55.6, 12.5, 25.0)));
    assert_eq!(
        platform.read_battery().await,
        Some(ASSUMED_MAINS_BATTERY_LEVEL)
    );
}

#[tokio::test]
async fn failing_battery_read_yields_no_level() {
    struct BrokenBattery;

    #[async_trait::async_trait]
    impl BatterySource for BrokenBattery {
        async fn battery_level(&self) -> Result<u8, String> {
            Err("battery service unavailable".to_string())
        }
    }

    let platform = Platform::new(Arc::new(FixedPositionSource::new(55.6, 12.5, 25.0)))
        .with_battery(Arc::new(BrokenBattery));

    assert_eq!(platform.read_battery().await, None);
}

#[tokio::test]
async fn fixed_source_reports_the_configured_coordinates() {
    let platform = Platform::new(Arc::new(FixedPositionSource::new(55.6761, 12.5683, 25.0)));
    let fix = platform.read_position(GeoOptions::sample()).await.unwrap();

    assert_eq!(fix.position.y(), 55.6761);
    assert_eq!(fix.position.x(), 12.5683);
    assert_eq!(fix.accuracy, 25.0);
}
