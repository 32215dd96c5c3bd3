
pub const TRIPS_TABLE_NAME: &str = "Trips";
pub const TRIP_ID: &str = "trip_id";
pub const START_TIME: &str = "start_time";
pub const END_TIME: &str = "end_time";
pub const ACTUAL_START_TIME: &str = "actual_start_time";
pub const DISTANCE: &str = "distance";
pub const AVG_SPEED: &str = "avg_speed";
pub const MAX_SPEED: &str = "max_speed";
pub const DURATION: &str = "duration";
pub const POINT_COUNT: &str = "point_count";
pub const COST_SAVED: &str = "cost_saved";
pub const TIME_SAVED: &str = "time_saved";
pub const NOTES: &str = "notes";
pub const ROUTE: &str = "route";

pub const GPS_POINTS_TABLE_NAME: &str = "GpsPoints";
pub const POINT_ID: &str = "point_id";
// Trip id
pub const TIMESTAMP: &str = "timestamp";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const SPEED: &str = "speed";
pub const ACCURACY: &str = "accuracy";
pub const ALTITUDE: &str = "altitude";
