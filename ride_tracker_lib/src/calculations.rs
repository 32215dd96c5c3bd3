//! Derived ride figures for presentation. None of these hold state.

use crate::geodesy::mps_to_mph;

pub const UNLOCK_FEE: f64 = 1.00;
pub const PER_MINUTE_RATE: f64 = 0.39;
pub const WALKING_SPEED_MPH: f64 = 3.;
pub const HOURLY_WAGE: f64 = 20.;

/// Average speed in mph. Zero for a zero duration.
pub fn calculate_avg_speed_mph(distance_m: f64, duration_s: i64) -> f64 {
    if duration_s <= 0 {
        return 0.;
    }
    mps_to_mph(distance_m / duration_s as f64)
}

/// What the same ride would have cost on a rental scooter.
pub fn calculate_ride_cost(duration_s: i64) -> f64 {
    let minutes = duration_s as f64 / 60.;
    UNLOCK_FEE + minutes * PER_MINUTE_RATE
}

/// Seconds saved compared to walking the distance, never negative.
pub fn calculate_time_saved(distance_mi: f64, duration_s: i64) -> i64 {
    let walking_s = distance_mi / WALKING_SPEED_MPH * 3600.;
    (walking_s - duration_s as f64).max(0.) as i64
}

pub fn calculate_time_savings_value(time_saved_s: i64) -> f64 {
    let minutes = time_saved_s as f64 / 60.;
    minutes * (HOURLY_WAGE / 60.)
}

pub fn format_duration(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

pub fn format_distance(miles: f64) -> String {
    if miles < 0.1 {
        format!("{:.0} ft", miles * 5280.)
    } else {
        format!("{miles:.2} mi")
    }
}

pub fn format_currency(amount: f64) -> String {
    format!("${amount:.2}")
}
