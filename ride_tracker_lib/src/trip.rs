use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{prelude::*, sqlite::SqliteRow};

use crate::location_sample::LocationSample;

/// A stored trip. Everything but the id and start time stays at its default
/// until the trip is finalized.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Trip {
    pub trip_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub distance_m: f64,
    pub avg_speed_mph: f64,
    pub max_speed_mps: f64,
    pub duration_s: i64,
    pub point_count: i64,
    pub cost_saved: f64,
    pub time_saved_s: i64,
    pub notes: Option<String>,
    pub route: Vec<LocationSample>,
}

#[cfg(feature = "sqlx")]
impl FromRow<'_, SqliteRow> for Trip {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let route_blob: Option<Vec<u8>> = row.try_get("route")?;
        let route = match route_blob {
            Some(bytes) if !bytes.is_empty() => Trip::decode_route(&bytes)
                .map_err(|err| sqlx::Error::Decode(err.into()))?,
            _ => Vec::new(),
        };

        Ok(Self {
            trip_id: row.try_get("trip_id")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            actual_start_time: row.try_get("actual_start_time")?,
            distance_m: row.try_get("distance")?,
            avg_speed_mph: row.try_get("avg_speed")?,
            max_speed_mps: row.try_get("max_speed")?,
            duration_s: row.try_get("duration")?,
            point_count: row.try_get("point_count")?,
            cost_saved: row.try_get("cost_saved")?,
            time_saved_s: row.try_get("time_saved")?,
            notes: row.try_get("notes")?,
            route,
        })
    }
}

impl Trip {
    pub fn new(trip_id: i64, start_time: DateTime<Utc>) -> Self {
        Self {
            trip_id,
            start_time,
            end_time: None,
            actual_start_time: None,
            distance_m: 0.,
            avg_speed_mph: 0.,
            max_speed_mps: 0.,
            duration_s: 0,
            point_count: 0,
            cost_saved: 0.,
            time_saved_s: 0,
            notes: None,
            route: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn encode_route(route: &[LocationSample]) -> Vec<u8> {
        bincode::serialize(route).unwrap_or_default()
    }

    pub fn decode_route(bytes: &[u8]) -> Result<Vec<LocationSample>, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn route_blob() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let route = vec![
            LocationSample::new(t, 56.1, 10.2, 3., 4., 5.),
            LocationSample::new(t, 56.2, 10.3, 3., 4., 5.),
        ];
        let bytes = Trip::encode_route(&route);
        assert_eq!(Trip::decode_route(&bytes).unwrap(), route);
        assert!(Trip::decode_route(&[1, 2, 3]).is_err());
    }

    #[test]
    fn new_trip_is_unfinished() {
        let trip = Trip::new(7, Utc::now());
        assert!(!trip.is_finished());
        assert!(trip.route.is_empty());
    }
}
