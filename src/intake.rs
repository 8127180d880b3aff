use std::sync::Arc;

use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::BookingParams;
use crate::observability::BOOKING_REQUESTS_CREATED_TOTAL;
use crate::queue::{BookingQueue, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("accommodation not found: {0}")]
    NotFound(Ulid),
    #[error("{0}")]
    ValidationFailed(String),
    #[error("{0}")]
    Storage(EngineError),
    /// The request was stored but could not be queued. It stays pending and is
    /// picked up again at the next startup.
    #[error("booking request {id} stored but not queued: {source}")]
    Enqueue { id: Ulid, source: QueueError },
}

impl From<EngineError> for IntakeError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound { id, .. } => IntakeError::NotFound(id),
            EngineError::Validation(message) => IntakeError::ValidationFailed(message),
            other => IntakeError::Storage(other),
        }
    }
}

/// Accepts booking intents: stores a pending request and queues its
/// resolution without waiting for it.
#[derive(Clone)]
pub struct BookingIntake {
    engine: Arc<Engine>,
    queue: BookingQueue,
}

impl BookingIntake {
    pub fn new(engine: Arc<Engine>, queue: BookingQueue) -> Self {
        Self { engine, queue }
    }

    pub fn queue(&self) -> &BookingQueue {
        &self.queue
    }

    pub async fn request_booking(&self, accommodation_id: Ulid, params: BookingParams) -> Result<Ulid, IntakeError> {
        let request = self
            .engine
            .create_booking_request(accommodation_id, params)
            .await
            .inspect_err(|e| warn!("booking request for accommodation {accommodation_id} rejected: {e}"))?;
        metrics::counter!(BOOKING_REQUESTS_CREATED_TOTAL).increment(1);

        self.queue
            .enqueue(request.id, request.accommodation_id)
            .await
            .map_err(|source| IntakeError::Enqueue { id: request.id, source })?;
        info!("booking request {} created for accommodation {accommodation_id}", request.id);
        Ok(request.id)
    }

    /// Queue every request still pending, e.g. after replaying the WAL.
    /// Returns how many were queued.
    pub async fn recover_pending(&self) -> Result<usize, QueueError> {
        let pending = self.engine.pending_requests().await;
        for (request_id, accommodation_id) in &pending {
            self.queue.enqueue(*request_id, *accommodation_id).await?;
        }
        if !pending.is_empty() {
            info!("re-queued {} pending booking requests", pending.len());
        }
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewAccommodation;
    use crate::model::*;
    use crate::queue::{BookingJob, JobHandler, QueueConfig};
    use crate::resolver::ResolveError;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_intake");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<BookingJob>>);

    #[async_trait]
    impl JobHandler for Recorder {
        async fn perform(&self, job: BookingJob) -> Result<(), ResolveError> {
            self.0.lock().await.push(job);
            Ok(())
        }
    }

    async fn setup(name: &str) -> (Arc<Engine>, BookingIntake, Arc<Recorder>, Ulid) {
        let engine = Arc::new(Engine::new(test_wal_path(name)).unwrap());
        let recorder = Arc::new(Recorder::default());
        let (queue, _) = BookingQueue::start(QueueConfig::default(), recorder.clone());
        let id = Ulid::new();
        engine
            .create_accommodation(
                id,
                NewAccommodation {
                    kind: AccommodationKind::Accommodation,
                    hotel_id: None,
                    details: AccommodationDetails {
                        name: "Cabin".into(),
                        description: "Quiet".into(),
                        location: "Woods".into(),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        (engine.clone(), BookingIntake::new(engine, queue), recorder, id)
    }

    fn params() -> BookingParams {
        let mut p = BookingParams::new();
        p.insert("start_date".into(), "2025-09-10".into());
        p.insert("end_date".into(), "2025-09-12".into());
        p.insert("guest_name".into(), "John Doe".into());
        p
    }

    #[tokio::test]
    async fn creates_pending_request_and_enqueues() {
        let (engine, intake, recorder, acc) = setup("creates.wal").await;
        let id = intake.request_booking(acc, params()).await.unwrap();
        intake.queue().wait_idle().await;

        let jobs = recorder.0.lock().await.clone();
        assert_eq!(
            jobs,
            vec![BookingJob {
                booking_request_id: id,
                accommodation_id: acc
            }]
        );
        // the recorder does not resolve anything
        let request = engine.booking_request(&id).await.unwrap();
        assert_eq!(request.status, BookingStatus::Pending);
        assert_eq!(request.params, params());
    }

    #[tokio::test]
    async fn recover_pending_requeues_open_requests() {
        let (engine, intake, recorder, acc) = setup("recover.wal").await;
        let first = engine.create_booking_request(acc, params()).await.unwrap();
        let second = engine.create_booking_request(acc, params()).await.unwrap();
        engine.mark_request_failed(second.id, "gone".into()).await.unwrap();

        assert_eq!(intake.recover_pending().await.unwrap(), 1);
        intake.queue().wait_idle().await;
        let jobs = recorder.0.lock().await.clone();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].booking_request_id, first.id);
    }

    #[tokio::test]
    async fn unknown_accommodation_enqueues_nothing() {
        let (engine, intake, recorder, _) = setup("unknown.wal").await;
        let err = intake.request_booking(Ulid::new(), params()).await.unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
        assert_eq!(intake.queue().stats().enqueued, 0);
        assert!(recorder.0.lock().await.is_empty());
        assert!(engine.list_booking_requests().await.is_empty());
    }

    #[tokio::test]
    async fn missing_field_is_validation_failure() {
        let (_, intake, _, acc) = setup("missing_field.wal").await;
        let mut p = params();
        p.insert("end_date".into(), " ".into());
        let err = intake.request_booking(acc, p).await.unwrap_err();
        assert_eq!(err.to_string(), "end_date can't be blank");
        assert_eq!(intake.queue().stats().enqueued, 0);
    }
}
