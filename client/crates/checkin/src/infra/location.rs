//! Location Sources

use crate::domain::repository::Locator;
use crate::domain::value_objects::GeoPoint;
use crate::error::{CheckinError, CheckinResult};

/// A fixed position, e.g. coordinates passed on the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLocator {
    point: Option<GeoPoint>,
}

impl StaticLocator {
    pub fn new(point: Option<GeoPoint>) -> Self {
        Self { point }
    }

    pub fn at(latitude: f64, longitude: f64) -> CheckinResult<Self> {
        GeoPoint::new(latitude, longitude)
            .map(|point| Self::new(Some(point)))
            .ok_or_else(|| {
                CheckinError::LocationUnavailable(format!(
                    "Invalid coordinates: {latitude}, {longitude}"
                ))
            })
    }
}

impl Locator for StaticLocator {
    async fn current_position(&self) -> CheckinResult<GeoPoint> {
        self.point.ok_or_else(|| {
            CheckinError::LocationUnavailable("No position available".to_string())
        })
    }
}
