use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ride_tracker_lib::{calculations, geodesy::meters_to_miles, location_sample::LocationSample, stats::TripStats, trip::Trip, trip_summary::TripSummary};

use crate::{database::db::{FinalizedTrip, TripDatabase}, DataManagerError, TripStore, DATABASE_PATH};

#[derive(Clone)]
pub struct DataManager {
    pub(crate) database: TripDatabase,
}

/// The public interface for all ride data.
impl DataManager {
    /// Opens the database under the project data directory.
    pub async fn start() -> Result<Self, DataManagerError> {
        let root: PathBuf = project_root::get_project_root()
            .map_err(|err| DataManagerError::Io(format!("Failed to locate project root: {err}")))?;
        Self::open(&root.join(DATABASE_PATH)).await
    }

    pub async fn open(path: &Path) -> Result<Self, DataManagerError> {
        // Create data dir if it doesn't exist
        if let Some(data_dir) = path.parent() {
            if !data_dir.as_os_str().is_empty() && !data_dir.exists() {
                tokio::fs::create_dir_all(data_dir).await
                    .map_err(|_| DataManagerError::Io(format!("Failed to create data directory: {:?}", data_dir)))?;
            }
        }

        let database = TripDatabase::connect(path).await?;
        tracing::debug!("Opened ride database at {:?}", path);

        Ok(DataManager {
            database,
        })
    }

    pub async fn in_memory() -> Result<Self, DataManagerError> {
        Ok(DataManager {
            database: TripDatabase::connect_in_memory().await?,
        })
    }

    pub async fn create_trip(&self, start_time: DateTime<Utc>) -> Result<i64, DataManagerError> {
        self.database.insert_trip(start_time).await
    }

    pub async fn append_sample(&self, trip_id: i64, sample: &LocationSample) -> Result<(), DataManagerError> {
        self.database.insert_sample(trip_id, sample).await
    }

    /// Stores the summary along with the figures derived from it.
    pub async fn finalize_trip(&self, trip_id: i64, summary: &TripSummary) -> Result<(), DataManagerError> {
        let duration_s = summary.duration_seconds();
        let distance_mi = meters_to_miles(summary.total_distance_m);

        let finalized = FinalizedTrip {
            end_time: summary.actual_end,
            actual_start_time: summary.actual_start,
            distance_m: summary.total_distance_m,
            avg_speed_mph: calculations::calculate_avg_speed_mph(summary.total_distance_m, duration_s),
            max_speed_mps: summary.max_speed_mps,
            duration_s,
            point_count: summary.accepted_sample_count as i64,
            cost_saved: calculations::calculate_ride_cost(duration_s),
            time_saved_s: calculations::calculate_time_saved(distance_mi, duration_s),
            route: summary.route.clone(),
        };

        self.database.finalize_trip(trip_id, &finalized).await?;
        tracing::info!("Finalized trip {} ({:.0} m over {} s)", trip_id, summary.total_distance_m, duration_s);
        Ok(())
    }

    pub async fn delete_trip(&self, trip_id: i64) -> Result<(), DataManagerError> {
        self.database.delete_trip(trip_id).await
    }

    pub async fn set_trip_notes(&self, trip_id: i64, notes: &str) -> Result<(), DataManagerError> {
        self.database.set_trip_notes(trip_id, notes).await
    }

    pub async fn get_trip(&self, trip_id: i64) -> Result<Trip, DataManagerError> {
        self.database.get_trip(trip_id).await
    }

    /// Newest first.
    pub async fn get_trips(&self) -> Result<Vec<Trip>, DataManagerError> {
        self.database.get_trips().await
    }

    pub async fn get_trip_samples(&self, trip_id: i64) -> Result<Vec<LocationSample>, DataManagerError> {
        self.database.get_trip_samples(trip_id).await
    }

    pub async fn get_total_stats(&self) -> Result<TripStats, DataManagerError> {
        let trips = self.database.get_trips().await?;
        Ok(TripStats::from_trips(&trips))
    }
}

#[async_trait::async_trait]
impl TripStore for DataManager {
    async fn create_trip(&self, start_time: DateTime<Utc>) -> Result<i64, DataManagerError> {
        DataManager::create_trip(self, start_time).await
    }

    async fn append_sample(&self, trip_id: i64, sample: &LocationSample) -> Result<(), DataManagerError> {
        DataManager::append_sample(self, trip_id, sample).await
    }

    async fn finalize_trip(&self, trip_id: i64, summary: &TripSummary) -> Result<(), DataManagerError> {
        DataManager::finalize_trip(self, trip_id, summary).await
    }

    async fn delete_trip(&self, trip_id: i64) -> Result<(), DataManagerError> {
        DataManager::delete_trip(self, trip_id).await
    }
}
