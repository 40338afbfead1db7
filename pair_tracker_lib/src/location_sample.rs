use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// One position+battery reading. Produced by the device sources, consumed
/// immediately by the sync call that sends it; never queued or retained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// x = longitude, y = latitude.
    pub position: Point,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    /// Charge percentage, `None` when the battery could not be read.
    pub battery_level: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        battery_level: Option<u8>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            position: Point::new(longitude, latitude),
            accuracy,
            battery_level,
            timestamp,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.position.y()
    }

    pub fn longitude(&self) -> f64 {
        self.position.x()
    }

    /// Coordinates must be finite before the sample may go anywhere near the
    /// network. NaN and infinities come out of broken platform readings.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.latitude().is_finite() {
            return Err("latitude is not a finite number");
        }
        if !self.longitude().is_finite() {
            return Err("longitude is not a finite number");
        }
        Ok(())
    }
}

#[test]
fn validate_rejects_non_finite_coordinates() {
    let now = Utc::now();

    assert!(LocationSample::new(55.6761, 12.5683, 12.0, Some(80), now).validate().is_ok());
    assert!(LocationSample::new(f64::NAN, 12.5683, 12.0, None, now).validate().is_err());
    assert!(LocationSample::new(55.6761, f64::INFINITY, 12.0, None, now).validate().is_err());
    assert!(LocationSample::new(f64::NEG_INFINITY, f64::NAN, 12.0, None, now).validate().is_err());
}

#[test]
fn latitude_and_longitude_accessors_match_constructor_order() {
    let sample = LocationSample::new(55.0, 12.0, 5.0, None, Utc::now());
    assert_eq!(sample.latitude(), 55.0);
    assert_eq!(sample.longitude(), 12.0);
}
