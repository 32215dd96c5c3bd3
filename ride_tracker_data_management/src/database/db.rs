use std::{path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use const_format::concatcp;
use sqlx::{query, query_as, sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow}, Executor, Pool, Row, Sqlite, SqlitePool};
use ride_tracker_lib::{location_sample::LocationSample, trip::Trip};

use crate::DataManagerError;

use super::constants::*;

/// Derived values written when a trip is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedTrip {
    pub end_time: DateTime<Utc>,
    pub actual_start_time: DateTime<Utc>,
    pub distance_m: f64,
    pub avg_speed_mph: f64,
    pub max_speed_mps: f64,
    pub duration_s: i64,
    pub point_count: i64,
    pub cost_saved: f64,
    pub time_saved_s: i64,
    pub route: Vec<LocationSample>,
}

#[derive(Clone)]
pub struct TripDatabase {
    pool: Pool<Sqlite>,
}

impl TripDatabase {
    pub async fn connect(path: &Path) -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await
            .map_err(|err| DataManagerError::Database(format!("Failed to connect to database {:?}: {err}", path)))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    /// A private database living as long as the returned handle. Pinned to a
    /// single connection, since every sqlite memory connection is its own database.
    pub async fn connect_in_memory() -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|err| DataManagerError::Database(format!("Invalid in-memory options: {err}")))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options).await
            .map_err(|err| DataManagerError::Database(format!("Failed to open in-memory database: {err}")))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    pub async fn init(&self) -> Result<(), DataManagerError> {
        self.pool.execute(concatcp!("
            CREATE TABLE IF NOT EXISTS ", TRIPS_TABLE_NAME, "(",
                TRIP_ID,           " INTEGER PRIMARY KEY AUTOINCREMENT,",
                START_TIME,        " TIMESTAMP NOT NULL,",
                END_TIME,          " TIMESTAMP,",
                ACTUAL_START_TIME, " TIMESTAMP,",
                DISTANCE,          " REAL NOT NULL DEFAULT 0,",
                AVG_SPEED,         " REAL NOT NULL DEFAULT 0,",
                MAX_SPEED,         " REAL NOT NULL DEFAULT 0,",
                DURATION,          " INTEGER NOT NULL DEFAULT 0,",
                POINT_COUNT,       " INTEGER NOT NULL DEFAULT 0,",
                COST_SAVED,        " REAL NOT NULL DEFAULT 0,",
                TIME_SAVED,        " INTEGER NOT NULL DEFAULT 0,",
                NOTES,             " TEXT,",
                ROUTE,             " BLOB);

            CREATE TABLE IF NOT EXISTS ", GPS_POINTS_TABLE_NAME, "(",
                POINT_ID,  " INTEGER PRIMARY KEY AUTOINCREMENT,",
                TRIP_ID,   " INTEGER NOT NULL,",
                TIMESTAMP, " TIMESTAMP NOT NULL,",
                LATITUDE,  " REAL NOT NULL,",
                LONGITUDE, " REAL NOT NULL,",
                SPEED,     " REAL NOT NULL,",
                ACCURACY,  " REAL NOT NULL,",
                ALTITUDE,  " REAL NOT NULL,
                FOREIGN KEY(", TRIP_ID, ") REFERENCES ", TRIPS_TABLE_NAME, "(", TRIP_ID, ") ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_points_trip_id ON ", GPS_POINTS_TABLE_NAME, "(", TRIP_ID, ");
            CREATE INDEX IF NOT EXISTS idx_points_timestamp ON ", GPS_POINTS_TABLE_NAME, "(", TIMESTAMP, ");
            ")).await
            .map_err(|err| DataManagerError::Database(format!("Failed to create tables: {err}")))
            .map(|_| ())
    }

    pub async fn insert_trip(&self, start_time: DateTime<Utc>) -> Result<i64, DataManagerError> {
        query_as::<_, (i64,)>(concatcp!("
            INSERT INTO ", TRIPS_TABLE_NAME, "(", TRIP_ID, ", ", START_TIME, ")
            VALUES (NULL, ?1) RETURNING ", TRIP_ID))
                .bind(start_time)
                .fetch_one(&self.pool).await
                .map_err(|err| DataManagerError::Database(format!("Failed to insert trip: {err}")))
                .map(|row| row.0)
    }

    pub async fn insert_sample(&self, trip_id: i64, sample: &LocationSample) -> Result<(), DataManagerError> {
        query(concatcp!("
            INSERT INTO ", GPS_POINTS_TABLE_NAME, "(",
            TRIP_ID, ", ", TIMESTAMP, ", ", LATITUDE, ", ", LONGITUDE, ", ", SPEED, ", ", ACCURACY, ", ", ALTITUDE, ")
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"))
                .bind(trip_id)
                .bind(sample.timestamp)
                .bind(sample.latitude)
                .bind(sample.longitude)
                .bind(sample.speed)
                .bind(sample.accuracy)
                .bind(sample.altitude)
                .execute(&self.pool).await
                .map_err(|err| DataManagerError::Database(format!("Failed to insert sample for trip {trip_id}: {err}")))
                .map(|_| ())
    }

    pub async fn finalize_trip(&self, trip_id: i64, trip: &FinalizedTrip) -> Result<(), DataManagerError> {
        let result = query(concatcp!("UPDATE ", TRIPS_TABLE_NAME, " SET ",
            END_TIME, " = ?1, ",
            ACTUAL_START_TIME, " = ?2, ",
            DISTANCE, " = ?3, ",
            AVG_SPEED, " = ?4, ",
            MAX_SPEED, " = ?5, ",
            DURATION, " = ?6, ",
            POINT_COUNT, " = ?7, ",
            COST_SAVED, " = ?8, ",
            TIME_SAVED, " = ?9, ",
            ROUTE, " = ?10 WHERE ", TRIP_ID, " = ?11"))
                .bind(trip.end_time)
                .bind(trip.actual_start_time)
                .bind(trip.distance_m)
                .bind(trip.avg_speed_mph)
                .bind(trip.max_speed_mps)
                .bind(trip.duration_s)
                .bind(trip.point_count)
                .bind(trip.cost_saved)
                .bind(trip.time_saved_s)
                .bind(Trip::encode_route(&trip.route))
                .bind(trip_id)
                .execute(&self.pool).await
                .map_err(|err| DataManagerError::Database(format!("Failed to finalize trip {trip_id}: {err}")))?;

        if result.rows_affected() == 0 {
            return Err(DataManagerError::Database(format!("No trip with id {trip_id}")));
        }

        Ok(())
    }

    pub async fn set_trip_notes(&self, trip_id: i64, notes: &str) -> Result<(), DataManagerError> {
        query(concatcp!("UPDATE ", TRIPS_TABLE_NAME, " SET ", NOTES, " = ?1 WHERE ", TRIP_ID, " = ?2"))
                .bind(notes)
                .bind(trip_id)
                .execute(&self.pool).await
                .map_err(|err| DataManagerError::Database(format!("Failed to update trip notes: {err}")))
                .map(|_| ())
    }

    pub async fn delete_trip(&self, trip_id: i64) -> Result<(), DataManagerError> {
        let result = query(concatcp!("DELETE FROM ", TRIPS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1"))
            .bind(trip_id)
            .execute(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to delete trip {trip_id}: {err}")))?;

        if result.rows_affected() == 0 {
            return Err(DataManagerError::Database(format!("No trip with id {trip_id}")));
        }

        Ok(())
    }

    pub async fn get_trip(&self, trip_id: i64) -> Result<Trip, DataManagerError> {
        query_as::<_, Trip>(concatcp!("SELECT * FROM ", TRIPS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1"))
            .bind(trip_id)
            .fetch_one(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to get trip {trip_id}: {err}")))
    }

    pub async fn get_trips(&self) -> Result<Vec<Trip>, DataManagerError> {
        query_as::<_, Trip>(concatcp!("SELECT * FROM ", TRIPS_TABLE_NAME, " ORDER BY ", START_TIME, " DESC"))
            .fetch_all(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to get trips: {err}")))
    }

    pub async fn get_trip_samples(&self, trip_id: i64) -> Result<Vec<LocationSample>, DataManagerError> {
        query(concatcp!("SELECT * FROM ", GPS_POINTS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1 ORDER BY ", TIMESTAMP, " ASC, ", POINT_ID, " ASC"))
            .bind(trip_id)
            .fetch_all(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to get samples for trip {trip_id}: {err}")))?
            .iter()
            .map(sample_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DataManagerError::Database(format!("Malformed sample row in trip {trip_id}: {err}")))
    }
}

fn sample_from_row(row: &SqliteRow) -> sqlx::Result<LocationSample> {
    Ok(LocationSample {
        timestamp: row.try_get(TIMESTAMP)?,
        latitude: row.try_get(LATITUDE)?,
        longitude: row.try_get(LONGITUDE)?,
        speed: row.try_get(SPEED)?,
        accuracy: row.try_get(ACCURACY)?,
        altitude: row.try_get(ALTITUDE)?,
    })
}
