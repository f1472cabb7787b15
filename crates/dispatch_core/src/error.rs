//! Error taxonomy for the matching core.
//!
//! [`SearchError`] covers synchronous rejections of session operations and
//! input validation. [`ProviderError`] covers failures of external
//! collaborators (driver directory, zone tables, event notifier); those are
//! recovered locally by the scheduler and never surface to a caller waiting
//! on a session operation.

use std::time::Duration;

use thiserror::Error;

use crate::session::{DriverId, SearchId, UserId};

pub type SearchResult<T> = Result<T, SearchError>;

/// Synchronous rejection of a search operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },

    #[error("invalid search radius: {0} km")]
    InvalidRadius(f64),

    #[error("invalid max wait time: {0:?}")]
    InvalidWaitTime(Duration),

    #[error("user {0} already has an active search")]
    AlreadySearching(UserId),

    #[error("concurrent search capacity of {0} reached")]
    CapacityExceeded(usize),

    #[error("search {0} not found")]
    NotFound(SearchId),

    #[error("search {0} belongs to a different user")]
    Unauthorized(SearchId),

    #[error("search {0} is not active")]
    NotActive(SearchId),

    #[error("search {0} has no matched driver to confirm")]
    NoDriverAvailable(SearchId),

    #[error("driver {requested} is not the matched driver {matched}")]
    DriverMismatch {
        requested: DriverId,
        matched: DriverId,
    },
}

/// Failure of an external collaborator call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("collaborator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("record not found")]
    NotFound,
}
