use const_format::concatcp;

pub mod database;
mod gpx_util;
mod data_manager;
mod store;

pub use data_manager::*;
pub use gpx_util::{import_gpx, write_gpx};
pub use store::TripStore;

pub const DATA_DIR: &str = "data/";
pub const DATABASE_PATH: &str = concatcp!(DATA_DIR, "rides.db");

#[derive(Debug, thiserror::Error)]
pub enum DataManagerError {
    #[error("database error: {0}")]
    Database(String),
    #[error("gpx error: {0}")]
    Gpx(String),
    #[error("io error: {0}")]
    Io(String),
}
