pub const EARTH_RADIUS_M: f64 = 6_371_000.;
pub const METERS_PER_MILE: f64 = 1609.344;
pub const MPH_PER_MPS: f64 = 2.23694;

/// Great-circle distance in meters (haversine).
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let a = f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2);
    let c = 2. * f64::atan2(a.sqrt(), (1. - a).sqrt());

    EARTH_RADIUS_M * c
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPH_PER_MPS
}
