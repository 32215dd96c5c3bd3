use serde::{Deserialize, Serialize};

use crate::trip::Trip;

/// Totals over every finished trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripStats {
    pub total_trips: i64,
    pub total_distance_m: f64,
    pub total_duration_s: i64,
    pub total_cost_saved: f64,
    pub total_time_saved_s: i64,
    pub overall_avg_speed_mph: f64,
}

impl TripStats {
    /// Unfinished trips are skipped.
    pub fn from_trips<'a>(trips: impl IntoIterator<Item = &'a Trip>) -> Self {
        let mut stats = TripStats::default();
        let mut speed_sum = 0.;

        for trip in trips.into_iter().filter(|trip| trip.end_time.is_some()) {
            stats.total_trips += 1;
            stats.total_distance_m += trip.distance_m;
            stats.total_duration_s += trip.duration_s;
            stats.total_cost_saved += trip.cost_saved;
            stats.total_time_saved_s += trip.time_saved_s;
            speed_sum += trip.avg_speed_mph;
        }

        if stats.total_trips > 0 {
            stats.overall_avg_speed_mph = speed_sum / stats.total_trips as f64;
        }

        stats
    }
}
