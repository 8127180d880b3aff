use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, EngineError> {
    if start > end {
        return Err(EngineError::InvalidRange { start, end });
    }
    Ok(DateRange::new(start, end))
}

pub(crate) fn validate_guest_name(guest_name: &str) -> Result<(), EngineError> {
    let len = guest_name.trim().chars().count();
    if len == 0 {
        return Err(EngineError::Validation("guest_name can't be blank".into()));
    }
    if len < MIN_GUEST_NAME_LEN {
        return Err(EngineError::Validation(format!(
            "guest_name is too short (minimum is {MIN_GUEST_NAME_LEN} characters)"
        )));
    }
    if guest_name.len() > MAX_GUEST_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest_name too long"));
    }
    Ok(())
}

/// The exclusion constraint. No two bookings on one accommodation may share a
/// day. `ignore` skips the booking being rewritten by an update.
pub(crate) fn check_no_overlap(
    rs: &AccommodationState,
    range: &DateRange,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    match rs.overlapping(range).find(|b| Some(b.id) != ignore) {
        Some(existing) => Err(EngineError::Overlap {
            accommodation_id: rs.info.id,
            existing: existing.id,
        }),
        None => Ok(()),
    }
}

/// The resolver's pre-check query. Looser than the constraint on endpoints.
pub(crate) fn find_overlap_strict(rs: &AccommodationState, range: &DateRange) -> Option<Ulid> {
    rs.bookings
        .iter()
        .take_while(|b| b.start_date < range.end)
        .find(|b| b.range().overlaps_strict(range))
        .map(|b| b.id)
}
