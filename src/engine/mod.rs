mod bookings;
mod catalog;
mod compact;
mod conflict;
mod error;
mod queries;
mod workflow;

pub use bookings::BookingPatch;
pub use catalog::{AmenityChange, NewAccommodation};
pub use error::EngineError;
pub use queries::AvailabilityFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedAccommodation = Arc<RwLock<AccommodationState>>;
pub type SharedBookingRequest = Arc<RwLock<BookingRequest>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued, then
/// does a single fsync for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Non-append commands run after the batch they interrupted.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        flush_and_respond(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes don't leak into
    // the next batch; the callers of this one are told it failed.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// The storage engine: every table lives in memory, every mutation is an
/// event made durable in the WAL before it is applied.
///
/// Lock order for writers: `commit_gate` (read) → `catalog_lock` →
/// accommodation locks (sorted by id) → booking request lock. Compaction
/// takes `commit_gate` for writing so it sees a state no writer is halfway
/// through.
pub struct Engine {
    hotels: DashMap<Ulid, Hotel>,
    amenities: DashMap<Ulid, Amenity>,
    amenity_names: DashMap<String, Ulid>,
    accommodations: DashMap<Ulid, SharedAccommodation>,
    /// Hotel → room ids.
    rooms: DashMap<Ulid, Vec<Ulid>>,
    /// Reverse lookup: booking id → accommodation id.
    booking_index: DashMap<Ulid, Ulid>,
    requests: DashMap<Ulid, SharedBookingRequest>,
    catalog_lock: Mutex<()>,
    commit_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an accommodation-scoped event. Caller holds the write lock.
fn apply_to_accommodation(rs: &mut AccommodationState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AccommodationUpdated { details, .. } => {
            rs.info.details = details.clone();
        }
        Event::AccommodationAmenityLinked { amenity_id, .. } => {
            if !rs.info.amenity_ids.contains(amenity_id) {
                rs.info.amenity_ids.push(*amenity_id);
            }
        }
        Event::AccommodationAmenityUnlinked { amenity_id, .. } => {
            rs.info.amenity_ids.retain(|a| a != amenity_id);
        }
        Event::BookingConfirmed {
            id,
            accommodation_id,
            start_date,
            end_date,
            guest_name,
        }
        | Event::BookingUpdated {
            id,
            accommodation_id,
            start_date,
            end_date,
            guest_name,
        } => {
            rs.remove_booking(*id);
            rs.insert_booking(Booking {
                id: *id,
                accommodation_id: *accommodation_id,
                start_date: *start_date,
                end_date: *end_date,
                guest_name: guest_name.clone(),
            });
            booking_index.insert(*id, *accommodation_id);
        }
        Event::BookingCancelled { id, .. } => {
            rs.remove_booking(*id);
            booking_index.remove(id);
        }
        _ => {}
    }
}

/// Apply a terminal transition. Caller holds the write lock.
fn apply_to_request(request: &mut BookingRequest, event: &Event) {
    match event {
        Event::BookingRequestSucceeded {
            booking_id,
            performed_at,
            ..
        } => {
            request.status = BookingStatus::Success;
            request.booking_id = Some(*booking_id);
            request.performed_at = Some(*performed_at);
        }
        Event::BookingRequestFailed {
            reason,
            performed_at,
            ..
        } => {
            request.status = BookingStatus::Failed;
            request.failure_reason = Some(reason.clone());
            request.performed_at = Some(*performed_at);
        }
        _ => {}
    }
}

fn event_accommodation_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AccommodationUpdated { id, .. } => Some(*id),
        Event::AccommodationAmenityLinked { accommodation_id, .. }
        | Event::AccommodationAmenityUnlinked { accommodation_id, .. }
        | Event::BookingConfirmed { accommodation_id, .. }
        | Event::BookingUpdated { accommodation_id, .. }
        | Event::BookingCancelled { accommodation_id, .. } => Some(*accommodation_id),
        _ => None,
    }
}

fn uncontended<T>(lock: &RwLock<T>) -> io::Result<RwLockWriteGuard<'_, T>> {
    lock.try_write()
        .map_err(|_| io::Error::other("replay: lock unexpectedly contended"))
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            hotels: DashMap::new(),
            amenities: DashMap::new(),
            amenity_names: DashMap::new(),
            accommodations: DashMap::new(),
            rooms: DashMap::new(),
            booking_index: DashMap::new(),
            requests: DashMap::new(),
            catalog_lock: Mutex::new(()),
            commit_gate: RwLock::new(()),
            wal_tx,
        };

        // Sole owner during replay: try_write always succeeds. Never block
        // here, this runs inside the async runtime.
        for event in &events {
            engine.replay_event(event)?;
        }
        tracing::info!(
            "replayed {} events: {} accommodations, {} bookings, {} booking requests",
            events.len(),
            engine.accommodations.len(),
            engine.booking_index.len(),
            engine.requests.len()
        );
        Ok(engine)
    }

    fn replay_event(&self, event: &Event) -> io::Result<()> {
        match event {
            Event::AccommodationDeleted { id } => {
                if let Some(rs) = self.get_accommodation(id) {
                    let mut guard = uncontended(&rs)?;
                    self.detach_accommodation(&mut guard);
                }
            }
            Event::HotelDeleted { id } => {
                let rooms: Vec<SharedAccommodation> = self
                    .room_ids(id)
                    .iter()
                    .filter_map(|rid| self.get_accommodation(rid))
                    .collect();
                for rs in &rooms {
                    let mut guard = uncontended(rs)?;
                    self.detach_accommodation(&mut guard);
                }
                self.hotels.remove(id);
                self.rooms.remove(id);
            }
            Event::BookingRequested {
                id,
                accommodation_id,
                params,
                requested_at,
            } => {
                let request = BookingRequest::new(*id, *accommodation_id, params.clone(), *requested_at);
                self.requests.insert(*id, Arc::new(RwLock::new(request)));
            }
            Event::BookingRequestSucceeded { id, .. } | Event::BookingRequestFailed { id, .. } => {
                if let Some(request) = self.get_request(id) {
                    apply_to_request(&mut *uncontended(&request)?, event);
                }
            }
            other => match event_accommodation_id(other) {
                Some(accommodation_id) => {
                    if let Some(rs) = self.get_accommodation(&accommodation_id) {
                        apply_to_accommodation(&mut *uncontended(&rs)?, other, &self.booking_index);
                    }
                }
                None => self.apply_catalog(other),
            },
        }
        Ok(())
    }

    /// Apply a catalog-level event (amenities, hotels, accommodation creation).
    fn apply_catalog(&self, event: &Event) {
        match event {
            Event::AmenityCreated { id, name } => {
                self.amenities.insert(*id, Amenity { id: *id, name: name.clone() });
                self.amenity_names.insert(name.clone(), *id);
            }
            Event::AmenityRenamed { id, name } => {
                if let Some(mut amenity) = self.amenities.get_mut(id) {
                    self.amenity_names.remove(&amenity.name);
                    amenity.name = name.clone();
                    self.amenity_names.insert(name.clone(), *id);
                }
            }
            Event::HotelCreated { id, name, address } => {
                self.hotels.insert(
                    *id,
                    Hotel {
                        id: *id,
                        name: name.clone(),
                        address: address.clone(),
                        amenity_ids: Vec::new(),
                    },
                );
            }
            Event::HotelUpdated { id, name, address } => {
                if let Some(mut hotel) = self.hotels.get_mut(id) {
                    hotel.name = name.clone();
                    hotel.address = address.clone();
                }
            }
            Event::HotelAmenityLinked { hotel_id, amenity_id } => {
                if let Some(mut hotel) = self.hotels.get_mut(hotel_id)
                    && !hotel.amenity_ids.contains(amenity_id)
                {
                    hotel.amenity_ids.push(*amenity_id);
                }
            }
            Event::HotelAmenityUnlinked { hotel_id, amenity_id } => {
                if let Some(mut hotel) = self.hotels.get_mut(hotel_id) {
                    hotel.amenity_ids.retain(|a| a != amenity_id);
                }
            }
            Event::AccommodationCreated {
                id,
                kind,
                hotel_id,
                details,
            } => {
                let info = Accommodation {
                    id: *id,
                    kind: *kind,
                    hotel_id: *hotel_id,
                    details: details.clone(),
                    amenity_ids: Vec::new(),
                };
                self.accommodations
                    .insert(*id, Arc::new(RwLock::new(AccommodationState::new(info))));
                if let Some(hid) = hotel_id {
                    self.rooms.entry(*hid).or_default().push(*id);
                }
            }
            _ => {}
        }
    }

    /// Drop an accommodation and its bookings from every index. Caller holds
    /// its write lock.
    fn detach_accommodation(&self, rs: &mut AccommodationState) {
        rs.deleted = true;
        for booking in rs.bookings.drain(..) {
            self.booking_index.remove(&booking.id);
        }
        if let Some(hid) = rs.info.hotel_id
            && let Some(mut kids) = self.rooms.get_mut(&hid)
        {
            kids.retain(|k| *k != rs.info.id);
        }
        self.accommodations.remove(&rs.info.id);
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Shared side of the commit gate. Every mutation holds it from
    /// validation until its event is applied.
    async fn gate(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    pub fn get_accommodation(&self, id: &Ulid) -> Option<SharedAccommodation> {
        self.accommodations.get(id).map(|e| e.value().clone())
    }

    pub fn get_request(&self, id: &Ulid) -> Option<SharedBookingRequest> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    pub fn accommodation_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    pub fn room_ids(&self, hotel_id: &Ulid) -> Vec<Ulid> {
        self.rooms
            .get(hotel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn hotel_exists(&self, id: &Ulid) -> bool {
        self.hotels.contains_key(id)
    }
}
