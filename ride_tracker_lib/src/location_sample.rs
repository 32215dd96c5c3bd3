use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// A single fix as delivered by the location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Reported ground speed in m/s.
    pub speed: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy: f64,
    pub altitude: f64,
}

impl LocationSample {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, speed: f64, accuracy: f64, altitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            speed,
            accuracy,
            altitude,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }

    pub fn distance_to(&self, other: &LocationSample) -> f64 {
        crate::geodesy::distance_meters(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn point_is_lon_lat() {
        let sample = LocationSample::new(Utc.timestamp_opt(0, 0).unwrap(), 56.1, 10.2, 0., 5., 0.);
        assert_eq!(sample.point().x(), 10.2);
        assert_eq!(sample.point().y(), 56.1);
    }
}
