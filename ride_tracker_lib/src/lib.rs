pub mod calculations;
pub mod geodesy;
pub mod location_sample;
pub mod stats;
pub mod trip;
pub mod trip_summary;
