pub mod config;
pub mod engine;
pub mod error;
pub mod sample_source;
pub mod session;

pub use config::{ClockMode, TrackerConfig};
pub use engine::{SessionHandle, Tracker};
pub use error::{TrackerError, TrackerResult};
pub use session::TripPhase;
