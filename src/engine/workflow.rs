//! Booking request records: created pending at intake, moved exactly once to
//! success or failed by the resolver.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_overlap_strict, now};
use super::{apply_to_request, Engine, EngineError};

/// Keys every booking request must carry, non-blank. Their contents are not
/// interpreted until resolution.
pub const REQUIRED_PARAMS: [&str; 3] = ["start_date", "end_date", "guest_name"];

fn validate_params(params: &BookingParams) -> Result<(), EngineError> {
    if params.is_empty() {
        return Err(EngineError::Validation("params can't be blank".into()));
    }
    if params.len() > MAX_PARAMS {
        return Err(EngineError::LimitExceeded("too many params"));
    }
    for (key, value) in params {
        if key.len() > MAX_PARAM_KEY_LEN {
            return Err(EngineError::LimitExceeded("param key too long"));
        }
        if value.len() > MAX_PARAM_VALUE_LEN {
            return Err(EngineError::LimitExceeded("param value too long"));
        }
    }
    for key in REQUIRED_PARAMS {
        if params.get(key).is_none_or(|v| v.trim().is_empty()) {
            return Err(EngineError::Validation(format!("{key} can't be blank")));
        }
    }
    Ok(())
}

impl Engine {
    /// Record a new pending booking request. Params are stored verbatim.
    pub async fn create_booking_request(
        &self,
        accommodation_id: Ulid,
        params: BookingParams,
    ) -> Result<BookingRequest, EngineError> {
        let _gate = self.gate().await;
        let rs = self
            .get_accommodation(&accommodation_id)
            .ok_or(EngineError::not_found("accommodation", accommodation_id))?;
        // Held until the request is in place so a concurrent delete cannot
        // slip between the existence check and the append.
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::not_found("accommodation", accommodation_id));
        }
        validate_params(&params)?;

        let id = Ulid::new();
        let requested_at = now();
        let event = Event::BookingRequested {
            id,
            accommodation_id,
            params: params.clone(),
            requested_at,
        };
        self.wal_append(&event).await?;
        let request = BookingRequest::new(id, accommodation_id, params, requested_at);
        self.requests.insert(id, Arc::new(RwLock::new(request.clone())));
        drop(guard);
        Ok(request)
    }

    pub async fn booking_request(&self, id: &Ulid) -> Option<BookingRequest> {
        let shared = self.get_request(id)?;
        let guard = shared.read().await;
        Some(guard.clone())
    }

    /// All booking requests, oldest first.
    pub async fn list_booking_requests(&self) -> Vec<BookingRequest> {
        let shared: Vec<_> = self.requests.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for request in shared {
            out.push(request.read().await.clone());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// `(request id, accommodation id)` of every request still pending,
    /// oldest first.
    pub async fn pending_requests(&self) -> Vec<(Ulid, Ulid)> {
        let mut pending: Vec<_> = self
            .list_booking_requests()
            .await
            .into_iter()
            .filter(|r| r.status == BookingStatus::Pending)
            .map(|r| (r.id, r.accommodation_id))
            .collect();
        pending.sort();
        pending
    }

    pub async fn mark_request_succeeded(&self, id: Ulid, booking_id: Ulid) -> Result<BookingRequest, EngineError> {
        self.transition_request(id, |performed_at| Event::BookingRequestSucceeded {
            id,
            booking_id,
            performed_at,
        })
        .await
    }

    pub async fn mark_request_failed(&self, id: Ulid, reason: String) -> Result<BookingRequest, EngineError> {
        self.transition_request(id, |performed_at| Event::BookingRequestFailed {
            id,
            reason,
            performed_at,
        })
        .await
    }

    /// pending → terminal, at most once.
    async fn transition_request(
        &self,
        id: Ulid,
        event_at: impl FnOnce(DateTime<Utc>) -> Event,
    ) -> Result<BookingRequest, EngineError> {
        let _gate = self.gate().await;
        let shared = self
            .get_request(&id)
            .ok_or(EngineError::not_found("booking request", id))?;
        let mut guard = shared.write().await;
        if guard.status.is_terminal() {
            return Err(EngineError::InvalidTransition { id, status: guard.status });
        }
        let event = event_at(now());
        self.wal_append(&event).await?;
        apply_to_request(&mut guard, &event);
        metrics::counter!(
            crate::observability::BOOKING_REQUESTS_RESOLVED_TOTAL,
            "status" => guard.status.as_str()
        )
        .increment(1);
        Ok(guard.clone())
    }

    /// Pre-check query: a committed booking with
    /// `start_date < range.end AND end_date > range.start`.
    pub async fn find_overlapping_booking(
        &self,
        accommodation_id: Ulid,
        range: &DateRange,
    ) -> Result<Option<Ulid>, EngineError> {
        let rs = self
            .get_accommodation(&accommodation_id)
            .ok_or(EngineError::not_found("accommodation", accommodation_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::not_found("accommodation", accommodation_id));
        }
        Ok(find_overlap_strict(&guard, range))
    }
}
