//! Turns a queued booking request into a committed booking or a recorded
//! failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::RESOLUTIONS_TOTAL;
use crate::queue::{BookingJob, JobHandler};

pub const OVERLAP_REASON: &str = "Constraint violation: booking overlap";
pub const UNKNOWN_REASON_PREFIX: &str = "Unknown error: ";

/// Dates in the params bag are ISO `YYYY-MM-DD` only; looser formats such as
/// `10/09/2025` or `Sep 10 2025` fail resolution.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// The storage operations the resolver needs.
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    async fn find_booking_request(&self, id: Ulid) -> Option<BookingRequest>;

    /// Committed booking by id. A booking made for a request carries the
    /// request's id.
    async fn find_booking(&self, id: Ulid) -> Option<Booking>;

    /// Any committed booking with `start_date < range.end AND end_date > range.start`.
    async fn find_overlapping_booking(
        &self,
        accommodation_id: Ulid,
        range: &DateRange,
    ) -> Result<Option<Ulid>, EngineError>;

    /// Insert a booking. Rejected with `EngineError::Overlap` when the closed
    /// range intersects an existing booking, and with `AlreadyExists` when
    /// `id` is taken.
    async fn create_booking(
        &self,
        id: Ulid,
        accommodation_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        guest_name: String,
    ) -> Result<Booking, EngineError>;

    async fn mark_success(&self, id: Ulid, booking_id: Ulid) -> Result<BookingRequest, EngineError>;

    async fn mark_failed(&self, id: Ulid, reason: String) -> Result<BookingRequest, EngineError>;
}

#[async_trait]
impl BookingStore for Engine {
    async fn find_booking_request(&self, id: Ulid) -> Option<BookingRequest> {
        self.booking_request(&id).await
    }

    async fn find_booking(&self, id: Ulid) -> Option<Booking> {
        self.get_booking(&id).await
    }

    async fn find_overlapping_booking(
        &self,
        accommodation_id: Ulid,
        range: &DateRange,
    ) -> Result<Option<Ulid>, EngineError> {
        Engine::find_overlapping_booking(self, accommodation_id, range).await
    }

    async fn create_booking(
        &self,
        id: Ulid,
        accommodation_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        guest_name: String,
    ) -> Result<Booking, EngineError> {
        self.confirm_booking(id, accommodation_id, start_date, end_date, guest_name)
            .await
    }

    async fn mark_success(&self, id: Ulid, booking_id: Ulid) -> Result<BookingRequest, EngineError> {
        self.mark_request_succeeded(id, booking_id).await
    }

    async fn mark_failed(&self, id: Ulid, reason: String) -> Result<BookingRequest, EngineError> {
        self.mark_request_failed(id, reason).await
    }
}

/// Outcome of one resolver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Success(Booking),
    /// Rejected by the pre-check or the exclusion constraint.
    Overlap,
    /// Anything else. Holds the message without the "Unknown error: " prefix.
    Failure(String),
    /// The request was already terminal; nothing was touched.
    AlreadyTerminal(BookingStatus),
}

impl Resolution {
    fn label(&self) -> &'static str {
        match self {
            Resolution::Success(_) => "success",
            Resolution::Overlap => "overlap",
            Resolution::Failure(_) => "failure",
            Resolution::AlreadyTerminal(_) => "already_terminal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The queue and the store disagree. Never retried.
    #[error("booking request not found: {0}")]
    RequestNotFound(Ulid),
    #[error("could not record resolution: {0}")]
    Store(#[from] EngineError),
}

/// Parsed view of the params bag.
struct Intent {
    start_date: NaiveDate,
    end_date: NaiveDate,
    guest_name: String,
}

fn param<'a>(params: &'a BookingParams, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| format!("missing param {key}"))
}

fn parse_date(params: &BookingParams, key: &str) -> Result<NaiveDate, String> {
    let raw = param(params, key)?;
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| format!("invalid date {raw:?} for {key}: {e}"))
}

fn parse_intent(params: &BookingParams) -> Result<Intent, String> {
    Ok(Intent {
        start_date: parse_date(params, "start_date")?,
        end_date: parse_date(params, "end_date")?,
        guest_name: param(params, "guest_name")?.to_string(),
    })
}

pub struct Resolver<S> {
    store: Arc<S>,
}

impl<S: BookingStore> Resolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, booking_request_id: Ulid, accommodation_id: Ulid) -> Result<Resolution, ResolveError> {
        let request = self
            .store
            .find_booking_request(booking_request_id)
            .await
            .ok_or(ResolveError::RequestNotFound(booking_request_id))?;
        if request.status.is_terminal() {
            debug!("booking request {booking_request_id} already {}", request.status.as_str());
            return Ok(Resolution::AlreadyTerminal(request.status));
        }
        if request.accommodation_id != accommodation_id {
            warn!(
                "job for booking request {booking_request_id} names accommodation {accommodation_id}, request has {}",
                request.accommodation_id
            );
        }

        // A booking under the request's id means an earlier run committed it
        // but never recorded the outcome.
        let resolution = match self.store.find_booking(booking_request_id).await {
            Some(booking) => {
                info!("booking request {booking_request_id} already has booking {}", booking.id);
                Resolution::Success(booking)
            }
            None => self.attempt(booking_request_id, &request.params, accommodation_id).await,
        };
        let recorded = match &resolution {
            Resolution::Success(booking) => self.store.mark_success(booking_request_id, booking.id).await,
            Resolution::Overlap => self.store.mark_failed(booking_request_id, OVERLAP_REASON.into()).await,
            Resolution::Failure(message) => {
                self.store
                    .mark_failed(booking_request_id, format!("{UNKNOWN_REASON_PREFIX}{message}"))
                    .await
            }
            Resolution::AlreadyTerminal(status) => return Ok(Resolution::AlreadyTerminal(*status)),
        };
        match recorded {
            Ok(_) => {}
            // Someone else finished it between our load and our write.
            Err(EngineError::InvalidTransition { status, .. }) => return Ok(Resolution::AlreadyTerminal(status)),
            Err(e) => return Err(e.into()),
        }

        metrics::counter!(RESOLUTIONS_TOTAL, "outcome" => resolution.label()).increment(1);
        info!("booking request {booking_request_id} resolved: {}", resolution.label());
        Ok(resolution)
    }

    async fn attempt(&self, booking_request_id: Ulid, params: &BookingParams, accommodation_id: Ulid) -> Resolution {
        let intent = match parse_intent(params) {
            Ok(intent) => intent,
            Err(message) => return Resolution::Failure(message),
        };

        // Inverted ranges are left to the store, which rejects them.
        if intent.start_date <= intent.end_date {
            let range = DateRange::new(intent.start_date, intent.end_date);
            match self.store.find_overlapping_booking(accommodation_id, &range).await {
                Ok(Some(existing)) => {
                    debug!("pre-check: accommodation {accommodation_id} overlaps booking {existing}");
                    return Resolution::Overlap;
                }
                Ok(None) => {}
                Err(e) => return Resolution::Failure(e.to_string()),
            }
        }

        match self
            .store
            .create_booking(
                booking_request_id,
                accommodation_id,
                intent.start_date,
                intent.end_date,
                intent.guest_name,
            )
            .await
        {
            Ok(booking) => Resolution::Success(booking),
            Err(EngineError::Overlap { .. }) => Resolution::Overlap,
            Err(EngineError::AlreadyExists(id)) => match self.store.find_booking(id).await {
                Some(booking) => Resolution::Success(booking),
                None => Resolution::Failure(EngineError::AlreadyExists(id).to_string()),
            },
            Err(e) => Resolution::Failure(e.to_string()),
        }
    }
}

#[async_trait]
impl<S: BookingStore> JobHandler for Resolver<S> {
    async fn perform(&self, job: BookingJob) -> Result<(), ResolveError> {
        self.resolve(job.booking_request_id, job.accommodation_id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewAccommodation;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_resolver");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn params(start: &str, end: &str, guest: &str) -> BookingParams {
        let mut p = BookingParams::new();
        p.insert("start_date".into(), start.into());
        p.insert("end_date".into(), end.into());
        p.insert("guest_name".into(), guest.into());
        p
    }

    async fn setup(name: &str) -> (Arc<Engine>, Ulid) {
        let engine = Arc::new(Engine::new(test_wal_path(name)).unwrap());
        let id = Ulid::new();
        engine
            .create_accommodation(
                id,
                NewAccommodation {
                    kind: AccommodationKind::Apartment,
                    hotel_id: None,
                    details: AccommodationDetails {
                        name: "Loft".into(),
                        description: "Sunny".into(),
                        location: "Lisbon".into(),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        (engine, id)
    }

    async fn request(engine: &Engine, accommodation_id: Ulid, p: BookingParams) -> Ulid {
        engine.create_booking_request(accommodation_id, p).await.unwrap().id
    }

    #[tokio::test]
    async fn disjoint_requests_both_succeed() {
        let (engine, acc) = setup("disjoint.wal").await;
        let resolver = Resolver::new(engine.clone());
        let a = request(&engine, acc, params("2025-09-10", "2025-09-12", "John Doe")).await;
        let b = request(&engine, acc, params("2025-09-13", "2025-09-15", "Jane Roe")).await;

        assert!(matches!(resolver.resolve(a, acc).await.unwrap(), Resolution::Success(_)));
        assert!(matches!(resolver.resolve(b, acc).await.unwrap(), Resolution::Success(_)));
        assert_eq!(engine.bookings_for(acc).await.unwrap().len(), 2);
        for id in [a, b] {
            let r = engine.booking_request(&id).await.unwrap();
            assert_eq!(r.status, BookingStatus::Success);
            assert!(r.booking_id.is_some());
        }
    }

    #[tokio::test]
    async fn overlapping_request_fails_on_precheck() {
        let (engine, acc) = setup("overlap.wal").await;
        let resolver = Resolver::new(engine.clone());
        let a = request(&engine, acc, params("2025-09-10", "2025-09-12", "John Doe")).await;
        let b = request(&engine, acc, params("2025-09-11", "2025-09-13", "Jane Roe")).await;

        let Resolution::Success(booking) = resolver.resolve(a, acc).await.unwrap() else {
            panic!("first request should succeed");
        };
        assert_eq!(resolver.resolve(b, acc).await.unwrap(), Resolution::Overlap);

        let failed = engine.booking_request(&b).await.unwrap();
        assert_eq!(failed.status, BookingStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some(OVERLAP_REASON));
        assert!(failed.booking_id.is_none());
        let bookings = engine.bookings_for(acc).await.unwrap();
        assert_eq!(bookings, vec![booking]);
    }

    #[tokio::test]
    async fn touching_endpoint_is_caught_by_constraint() {
        // The pre-check misses a range starting on the existing end date; the
        // closed-range constraint still rejects it with the same reason.
        let (engine, acc) = setup("touching.wal").await;
        let resolver = Resolver::new(engine.clone());
        engine
            .confirm_booking(Ulid::new(), acc, day("2025-09-10"), day("2025-09-12"), "John Doe".into())
            .await
            .unwrap();
        let b = request(&engine, acc, params("2025-09-12", "2025-09-14", "Jane Roe")).await;
        assert_eq!(resolver.resolve(b, acc).await.unwrap(), Resolution::Overlap);
        let failed = engine.booking_request(&b).await.unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some(OVERLAP_REASON));
    }

    #[tokio::test]
    async fn malformed_date_is_unknown_error() {
        let (engine, acc) = setup("malformed.wal").await;
        let resolver = Resolver::new(engine.clone());
        let id = request(&engine, acc, params("10/09/2025", "2025-09-12", "John Doe")).await;
        assert!(matches!(resolver.resolve(id, acc).await.unwrap(), Resolution::Failure(_)));
        let failed = engine.booking_request(&id).await.unwrap();
        assert_eq!(failed.status, BookingStatus::Failed);
        assert!(failed.failure_reason.unwrap().starts_with(UNKNOWN_REASON_PREFIX));
    }

    #[tokio::test]
    async fn only_iso_dates_resolve() {
        let (engine, acc) = setup("iso_only.wal").await;
        let resolver = Resolver::new(engine.clone());
        for (n, start) in ["Sep 10 2025", "2025/09/10", "20250910"].into_iter().enumerate() {
            let end = format!("2025-10-{:02}", n + 1);
            let id = request(&engine, acc, params(start, &end, "John Doe")).await;
            assert!(matches!(resolver.resolve(id, acc).await.unwrap(), Resolution::Failure(_)), "{start}");
        }
        // padded ISO is still ISO
        let id = request(&engine, acc, params(" 2025-09-10 ", "2025-09-12", "John Doe")).await;
        assert!(matches!(resolver.resolve(id, acc).await.unwrap(), Resolution::Success(_)));
        assert_eq!(engine.bookings_for(acc).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inverted_range_is_unknown_error() {
        let (engine, acc) = setup("inverted.wal").await;
        let resolver = Resolver::new(engine.clone());
        let id = request(&engine, acc, params("2025-09-12", "2025-09-10", "John Doe")).await;
        resolver.resolve(id, acc).await.unwrap();
        let reason = engine.booking_request(&id).await.unwrap().failure_reason.unwrap();
        assert!(reason.starts_with("Unknown error: range lower bound"), "{reason}");
    }

    #[tokio::test]
    async fn short_guest_name_is_unknown_error() {
        let (engine, acc) = setup("short_guest.wal").await;
        let resolver = Resolver::new(engine.clone());
        let id = request(&engine, acc, params("2025-09-10", "2025-09-12", "J")).await;
        resolver.resolve(id, acc).await.unwrap();
        let reason = engine.booking_request(&id).await.unwrap().failure_reason.unwrap();
        assert!(reason.starts_with(UNKNOWN_REASON_PREFIX));
        assert!(reason.contains("guest_name"));
        assert!(engine.bookings_for(acc).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_request_is_left_alone() {
        let (engine, acc) = setup("idempotent.wal").await;
        let resolver = Resolver::new(engine.clone());
        let id = request(&engine, acc, params("2025-09-10", "2025-09-12", "John Doe")).await;
        resolver.resolve(id, acc).await.unwrap();
        let first = engine.booking_request(&id).await.unwrap();

        let again = resolver.resolve(id, acc).await.unwrap();
        assert_eq!(again, Resolution::AlreadyTerminal(BookingStatus::Success));
        assert_eq!(engine.booking_request(&id).await.unwrap(), first);
        assert_eq!(engine.bookings_for(acc).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_request_is_fatal() {
        let (engine, acc) = setup("missing.wal").await;
        let resolver = Resolver::new(engine);
        let err = resolver.resolve(Ulid::new(), acc).await.unwrap_err();
        assert!(matches!(err, ResolveError::RequestNotFound(_)));
    }

    /// Delegates to the engine but can be told to fail booking creation, or
    /// to fail the first `mark_success` after the booking is committed.
    struct FaultyStore {
        inner: Arc<Engine>,
        fail_create: AtomicBool,
        fail_next_success: AtomicBool,
    }

    impl FaultyStore {
        fn new(inner: Arc<Engine>) -> Self {
            Self {
                inner,
                fail_create: AtomicBool::new(false),
                fail_next_success: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl BookingStore for FaultyStore {
        async fn find_booking_request(&self, id: Ulid) -> Option<BookingRequest> {
            self.inner.find_booking_request(id).await
        }

        async fn find_booking(&self, id: Ulid) -> Option<Booking> {
            self.inner.find_booking(id).await
        }

        async fn find_overlapping_booking(
            &self,
            accommodation_id: Ulid,
            range: &DateRange,
        ) -> Result<Option<Ulid>, EngineError> {
            BookingStore::find_overlapping_booking(&*self.inner, accommodation_id, range).await
        }

        async fn create_booking(
            &self,
            id: Ulid,
            accommodation_id: Ulid,
            start_date: NaiveDate,
            end_date: NaiveDate,
            guest_name: String,
        ) -> Result<Booking, EngineError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(EngineError::WalError("disk on fire".into()));
            }
            self.inner
                .create_booking(id, accommodation_id, start_date, end_date, guest_name)
                .await
        }

        async fn mark_success(&self, id: Ulid, booking_id: Ulid) -> Result<BookingRequest, EngineError> {
            if self.fail_next_success.swap(false, Ordering::SeqCst) {
                return Err(EngineError::WalError("fsync failed".into()));
            }
            self.inner.mark_success(id, booking_id).await
        }

        async fn mark_failed(&self, id: Ulid, reason: String) -> Result<BookingRequest, EngineError> {
            self.inner.mark_failed(id, reason).await
        }
    }

    #[tokio::test]
    async fn unexpected_store_error_is_recorded() {
        let (engine, acc) = setup("faulty.wal").await;
        let store = FaultyStore::new(engine.clone());
        store.fail_create.store(true, Ordering::SeqCst);
        let resolver = Resolver::new(Arc::new(store));
        let id = request(&engine, acc, params("2025-09-10", "2025-09-12", "John Doe")).await;

        let resolution = resolver.resolve(id, acc).await.unwrap();
        assert_eq!(resolution, Resolution::Failure("WAL error: disk on fire".into()));
        let failed = engine.booking_request(&id).await.unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("Unknown error: WAL error: disk on fire"));
        assert!(engine.bookings_for(acc).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rerun_after_unrecorded_success_links_committed_booking() {
        let (engine, acc) = setup("unrecorded_success.wal").await;
        let store = FaultyStore::new(engine.clone());
        store.fail_next_success.store(true, Ordering::SeqCst);
        let resolver = Resolver::new(Arc::new(store));
        let id = request(&engine, acc, params("2025-09-10", "2025-09-12", "John Doe")).await;

        // the booking lands, recording the outcome does not
        let err = resolver.resolve(id, acc).await.unwrap_err();
        assert!(matches!(err, ResolveError::Store(EngineError::WalError(_))));
        assert_eq!(engine.pending_requests().await, vec![(id, acc)]);
        assert_eq!(engine.bookings_for(acc).await.unwrap().len(), 1);

        // what startup recovery does with the still-pending request
        let Resolution::Success(booking) = resolver.resolve(id, acc).await.unwrap() else {
            panic!("re-run should adopt the committed booking");
        };
        assert_eq!(booking.id, id);
        let done = engine.booking_request(&id).await.unwrap();
        assert_eq!(done.status, BookingStatus::Success);
        assert_eq!(done.booking_id, Some(id));
        assert!(done.failure_reason.is_none());
        assert_eq!(engine.bookings_for(acc).await.unwrap(), vec![booking]);
    }

    #[tokio::test]
    async fn booking_takes_the_request_id() {
        let (engine, acc) = setup("booking_id.wal").await;
        let resolver = Resolver::new(engine.clone());
        let id = request(&engine, acc, params("2025-09-10", "2025-09-12", "John Doe")).await;
        let Resolution::Success(booking) = resolver.resolve(id, acc).await.unwrap() else {
            panic!("request should succeed");
        };
        assert_eq!(booking.id, id);
        assert_eq!(engine.get_booking(&id).await, Some(booking));
    }
}
