use chrono::{DateTime, Utc};
use ride_tracker_lib::{location_sample::LocationSample, trip_summary::TripSummary};

use crate::DataManagerError;

/// The durable side of a ride: where the tracking engine writes trips and
/// accepted samples.
#[async_trait::async_trait]
pub trait TripStore: Send + Sync {
    async fn create_trip(&self, start_time: DateTime<Utc>) -> Result<i64, DataManagerError>;

    async fn append_sample(&self, trip_id: i64, sample: &LocationSample) -> Result<(), DataManagerError>;

    async fn finalize_trip(&self, trip_id: i64, summary: &TripSummary) -> Result<(), DataManagerError>;

    /// Never called by the engine itself. Used by callers discarding short trips.
    async fn delete_trip(&self, trip_id: i64) -> Result<(), DataManagerError>;
}
