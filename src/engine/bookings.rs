use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, validate_guest_name, validate_range};
use super::{apply_to_accommodation, Engine, EngineError};

/// Partial update of a committed booking. The accommodation never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub guest_name: Option<String>,
}

impl Engine {
    /// Commit a booking. The overlap check and the insert happen under the
    /// accommodation's write lock, so two racing commits for intersecting
    /// ranges cannot both land.
    pub async fn confirm_booking(
        &self,
        id: Ulid,
        accommodation_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        guest_name: String,
    ) -> Result<Booking, EngineError> {
        let range = validate_range(start_date, end_date)?;
        validate_guest_name(&guest_name)?;
        let _gate = self.gate().await;
        let rs = self
            .get_accommodation(&accommodation_id)
            .ok_or(EngineError::not_found("accommodation", accommodation_id))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::not_found("accommodation", accommodation_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ACCOMMODATION {
            return Err(EngineError::LimitExceeded("too many bookings on accommodation"));
        }
        if self.booking_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        check_no_overlap(&guard, &range, None)?;

        let event = Event::BookingConfirmed {
            id,
            accommodation_id,
            start_date,
            end_date,
            guest_name,
        };
        self.wal_append(&event).await?;
        apply_to_accommodation(&mut guard, &event, &self.booking_index);
        metrics::counter!(crate::observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))
    }

    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        let _gate = self.gate().await;
        let accommodation_id = self
            .accommodation_for_booking(&id)
            .ok_or(EngineError::not_found("booking", id))?;
        let rs = self
            .get_accommodation(&accommodation_id)
            .ok_or(EngineError::not_found("booking", id))?;
        let mut guard = rs.write().await;
        // Re-check under the lock: the booking may have been cancelled while
        // we waited.
        let current = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))?;

        let start_date = patch.start_date.unwrap_or(current.start_date);
        let end_date = patch.end_date.unwrap_or(current.end_date);
        let guest_name = patch.guest_name.unwrap_or(current.guest_name);
        let range = validate_range(start_date, end_date)?;
        validate_guest_name(&guest_name)?;
        check_no_overlap(&guard, &range, Some(id))?;

        let event = Event::BookingUpdated {
            id,
            accommodation_id,
            start_date,
            end_date,
            guest_name,
        };
        self.wal_append(&event).await?;
        apply_to_accommodation(&mut guard, &event, &self.booking_index);
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.gate().await;
        let accommodation_id = self
            .accommodation_for_booking(&id)
            .ok_or(EngineError::not_found("booking", id))?;
        let rs = self
            .get_accommodation(&accommodation_id)
            .ok_or(EngineError::not_found("booking", id))?;
        let mut guard = rs.write().await;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))?;

        let event = Event::BookingCancelled { id, accommodation_id };
        self.wal_append(&event).await?;
        apply_to_accommodation(&mut guard, &event, &self.booking_index);
        Ok(booking)
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let accommodation_id = self.accommodation_for_booking(id)?;
        let rs = self.get_accommodation(&accommodation_id)?;
        let guard = rs.read().await;
        guard.booking(*id).cloned()
    }

    pub async fn bookings_for(&self, accommodation_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_accommodation(&accommodation_id)
            .ok_or(EngineError::not_found("accommodation", accommodation_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::not_found("accommodation", accommodation_id));
        }
        Ok(guard.bookings.clone())
    }

    /// Every committed booking, ordered by id.
    pub async fn list_bookings(&self) -> Vec<Booking> {
        let shared: Vec<_> = self.accommodations.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in shared {
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().cloned());
        }
        out.sort_by_key(|b| b.id);
        out
    }
}
