use ride_tracker_data_management::DataManagerError;

use crate::session::TripPhase;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The location source could not be started. Fatal to the session.
    #[error("location source unavailable: {0}")]
    PermissionDenied(String),
    /// A sample or finalize write failed. Running totals are not rolled back.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("cannot {action} while {from:?}")]
    InvalidStateTransition { from: TripPhase, action: &'static str },
}

impl From<DataManagerError> for TrackerError {
    fn from(err: DataManagerError) -> Self {
        TrackerError::PersistenceFailure(err.to_string())
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
