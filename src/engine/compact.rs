use tokio::sync::oneshot;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Rewrite the WAL with only the events needed to rebuild the current state.
    /// Holds the commit gate exclusively, so the snapshot never contains half
    /// of a mutation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    /// Amenities, then hotels, then accommodations with their bookings, then
    /// booking requests. Replay needs parents before children.
    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        for amenity in self.list_amenities() {
            events.push(Event::AmenityCreated {
                id: amenity.id,
                name: amenity.name,
            });
        }

        for hotel in self.list_hotels() {
            events.push(Event::HotelCreated {
                id: hotel.id,
                name: hotel.name,
                address: hotel.address,
            });
            for amenity_id in hotel.amenity_ids {
                events.push(Event::HotelAmenityLinked {
                    hotel_id: hotel.id,
                    amenity_id,
                });
            }
        }

        let mut shared: Vec<_> = self.accommodations.iter().map(|e| (*e.key(), e.value().clone())).collect();
        shared.sort_by_key(|(id, _)| *id);
        for (_, rs) in shared {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            let info = &guard.info;
            events.push(Event::AccommodationCreated {
                id: info.id,
                kind: info.kind,
                hotel_id: info.hotel_id,
                details: info.details.clone(),
            });
            for amenity_id in &info.amenity_ids {
                events.push(Event::AccommodationAmenityLinked {
                    accommodation_id: info.id,
                    amenity_id: *amenity_id,
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingConfirmed {
                    id: booking.id,
                    accommodation_id: booking.accommodation_id,
                    start_date: booking.start_date,
                    end_date: booking.end_date,
                    guest_name: booking.guest_name.clone(),
                });
            }
        }

        for request in self.list_booking_requests().await {
            events.push(Event::BookingRequested {
                id: request.id,
                accommodation_id: request.accommodation_id,
                params: request.params,
                requested_at: request.requested_at,
            });
            let Some(performed_at) = request.performed_at else { continue };
            match (request.status, request.booking_id, request.failure_reason) {
                (BookingStatus::Success, Some(booking_id), _) => events.push(Event::BookingRequestSucceeded {
                    id: request.id,
                    booking_id,
                    performed_at,
                }),
                (BookingStatus::Failed, _, reason) => events.push(Event::BookingRequestFailed {
                    id: request.id,
                    reason: reason.unwrap_or_default(),
                    performed_at,
                }),
                _ => {}
            }
        }

        events
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
