//! In-process job queue for booking resolution.
//!
//! Jobs are deduplicated by accommodation while executing: at most one job per
//! accommodation runs at a time. A job that arrives for a busy accommodation is
//! coalesced, either dropped or put back on the queue after a delay. Failed jobs
//! are never retried.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::observability::{
    JOBS_COALESCED_TOTAL, JOBS_ENQUEUED_TOTAL, JOBS_FAILED_TOTAL, JOBS_IN_FLIGHT, RESOLUTION_DURATION_SECONDS,
};
use crate::resolver::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingJob {
    pub booking_request_id: Ulid,
    pub accommodation_id: Ulid,
}

impl BookingJob {
    /// Only the accommodation counts. Two requests for the same accommodation
    /// share a key even though their request ids differ.
    pub fn dedup_key(&self) -> Ulid {
        self.accommodation_id
    }
}

/// What to do with a job whose accommodation already has a job executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    /// Discard it. Its booking request stays pending.
    #[default]
    Drop,
    /// Put it back on the queue after `QueueConfig::reschedule_delay`.
    Reschedule,
}

impl FromStr for OnConflict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(OnConflict::Drop),
            "reschedule" => Ok(OnConflict::Reschedule),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

impl OnConflict {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnConflict::Drop => "drop",
            OnConflict::Reschedule => "reschedule",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Jobs running at once, across all accommodations.
    pub workers: usize,
    /// Bound of the submission channel.
    pub capacity: usize,
    pub on_conflict: OnConflict,
    pub reschedule_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            capacity: 1024,
            on_conflict: OnConflict::Drop,
            reschedule_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

/// Executes one job. An `Err` is logged and counted, never retried.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn perform(&self, job: BookingJob) -> Result<(), ResolveError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub executed: u64,
    pub coalesced: u64,
    pub failed: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct QueueShared {
    /// Accommodation id → booking request id of the job holding it.
    executing: DashMap<Ulid, Ulid>,
    /// Jobs enqueued and not yet finished, dropped or abandoned.
    outstanding: AtomicUsize,
    idle: Notify,
    enqueued: AtomicU64,
    executed: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
}

impl QueueShared {
    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Ownership of a dedup key. Dropping it releases the key, including when
/// the job panics.
struct KeyClaim {
    shared: Arc<QueueShared>,
    key: Ulid,
}

impl KeyClaim {
    fn try_claim(shared: &Arc<QueueShared>, job: &BookingJob) -> Option<Self> {
        match shared.executing.entry(job.dedup_key()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(job.booking_request_id);
            }
        }
        metrics::gauge!(JOBS_IN_FLIGHT).increment(1.0);
        Some(Self {
            shared: shared.clone(),
            key: job.dedup_key(),
        })
    }
}

impl Drop for KeyClaim {
    fn drop(&mut self) {
        self.shared.executing.remove(&self.key);
        metrics::gauge!(JOBS_IN_FLIGHT).decrement(1.0);
        self.shared.finish_one();
    }
}

/// Handle for submitting jobs. Cheap to clone.
#[derive(Clone)]
pub struct BookingQueue {
    tx: mpsc::Sender<BookingJob>,
    shared: Arc<QueueShared>,
}

impl BookingQueue {
    /// Start the dispatcher. It runs until every `BookingQueue` clone is dropped.
    pub fn start<H: JobHandler>(config: QueueConfig, handler: Arc<H>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let shared = Arc::new(QueueShared::default());
        info!(
            "booking queue started: {} workers, on_conflict={}",
            config.workers,
            config.on_conflict.as_str()
        );
        let dispatcher = tokio::spawn(dispatch_loop(rx, tx.downgrade(), shared.clone(), handler, config));
        (Self { tx, shared }, dispatcher)
    }

    /// Schedule resolution of a booking request. Returns once the job is on
    /// the queue, never waits for it to run.
    pub async fn enqueue(&self, booking_request_id: Ulid, accommodation_id: Ulid) -> Result<(), QueueError> {
        let job = BookingJob {
            booking_request_id,
            accommodation_id,
        };
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(job).await.is_err() {
            self.shared.finish_one();
            return Err(QueueError::Closed);
        }
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(JOBS_ENQUEUED_TOTAL).increment(1);
        debug!("enqueued booking request {booking_request_id} for accommodation {accommodation_id}");
        Ok(())
    }

    /// Resolves once no job is queued, executing, or waiting to be rescheduled.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// `wait_idle` bounded by `timeout`. Returns false if jobs were still
    /// outstanding when time ran out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            executed: self.shared.executed.load(Ordering::Relaxed),
            coalesced: self.shared.coalesced.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            in_flight: self.shared.executing.len(),
        }
    }

    /// Whether a job for this accommodation is executing right now.
    pub fn is_executing(&self, accommodation_id: &Ulid) -> bool {
        self.shared.executing.contains_key(accommodation_id)
    }
}

async fn dispatch_loop<H: JobHandler>(
    mut rx: mpsc::Receiver<BookingJob>,
    requeue: mpsc::WeakSender<BookingJob>,
    shared: Arc<QueueShared>,
    handler: Arc<H>,
    config: QueueConfig,
) {
    let permits = Arc::new(Semaphore::new(config.workers.max(1)));
    while let Some(job) = rx.recv().await {
        // Wait for a worker before looking at the key, so the check happens
        // right before the job would start.
        let Ok(permit) = permits.clone().acquire_owned().await else { break };
        let Some(claim) = KeyClaim::try_claim(&shared, &job) else {
            drop(permit);
            coalesce(job, &shared, &requeue, &config);
            continue;
        };
        let handler = handler.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let _claim = claim;
            let started = Instant::now();
            match handler.perform(job).await {
                Ok(()) => debug!("booking request {} resolved", job.booking_request_id),
                Err(e) => {
                    error!("booking job for request {} failed: {e}", job.booking_request_id);
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(JOBS_FAILED_TOTAL).increment(1);
                }
            }
            metrics::histogram!(RESOLUTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
            shared.executed.fetch_add(1, Ordering::Relaxed);
        });
    }
    debug!("booking queue dispatcher stopped");
}

fn coalesce(job: BookingJob, shared: &Arc<QueueShared>, requeue: &mpsc::WeakSender<BookingJob>, config: &QueueConfig) {
    shared.coalesced.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(JOBS_COALESCED_TOTAL, "policy" => config.on_conflict.as_str()).increment(1);
    match config.on_conflict {
        OnConflict::Drop => {
            warn!(
                "dropping booking request {}: accommodation {} already has a job executing",
                job.booking_request_id, job.accommodation_id
            );
            shared.finish_one();
        }
        OnConflict::Reschedule => {
            debug!(
                "rescheduling booking request {}: accommodation {} busy",
                job.booking_request_id, job.accommodation_id
            );
            let requeue = requeue.clone();
            let shared = shared.clone();
            let delay = config.reschedule_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let sent = match requeue.upgrade() {
                    Some(tx) => tx.send(job).await.is_ok(),
                    None => false,
                };
                if !sent {
                    warn!("queue closed, abandoning booking request {}", job.booking_request_id);
                    shared.finish_one();
                }
            });
        }
    }
}
