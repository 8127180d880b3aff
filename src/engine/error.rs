use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// The exclusion constraint: another booking on the same accommodation
    /// intersects the requested closed date range.
    #[error("exclusion constraint violated: overlaps booking {existing} on accommodation {accommodation_id}")]
    Overlap { accommodation_id: Ulid, existing: Ulid },
    #[error("range lower bound must be less than or equal to range upper bound ({start} > {end})")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("booking request {id} is already {}", .status.as_str())]
    InvalidTransition { id: Ulid, status: BookingStatus },
    #[error("amenity name already taken: {0}")]
    DuplicateName(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}
