use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedAccommodation};

/// Read-side filter for the hotel and apartment listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityFilter {
    /// Only keep inventory with no booking intersecting this closed range.
    pub range: Option<DateRange>,
    /// Every name must be present (exact match).
    pub amenities: Vec<String>,
}

impl AvailabilityFilter {
    pub fn is_empty(&self) -> bool {
        self.range.is_none() && self.amenities.is_empty()
    }
}

fn is_free(rs: &AccommodationState, range: &Option<DateRange>) -> bool {
    match range {
        Some(range) => rs.overlapping(range).next().is_none(),
        None => true,
    }
}

impl Engine {
    fn shared_accommodations(&self) -> Vec<SharedAccommodation> {
        self.accommodations.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn accommodation(&self, id: &Ulid) -> Option<Accommodation> {
        let rs = self.get_accommodation(id)?;
        let guard = rs.read().await;
        (!guard.deleted).then(|| guard.info.clone())
    }

    /// Accommodations of one kind (or all of them), ordered by id.
    pub async fn list_accommodations(&self, kind: Option<AccommodationKind>) -> Vec<Accommodation> {
        let mut out = Vec::new();
        for rs in self.shared_accommodations() {
            let guard = rs.read().await;
            if !guard.deleted && kind.is_none_or(|k| guard.info.kind == k) {
                out.push(guard.info.clone());
            }
        }
        out.sort_by_key(|a| a.id);
        out
    }

    pub async fn list_rooms(&self, hotel_id: Ulid) -> Result<Vec<Accommodation>, EngineError> {
        if !self.hotel_exists(&hotel_id) {
            return Err(EngineError::not_found("hotel", hotel_id));
        }
        let mut out = Vec::new();
        for rid in self.room_ids(&hotel_id) {
            if let Some(room) = self.accommodation(&rid).await {
                out.push(room);
            }
        }
        out.sort_by_key(|a| a.id);
        Ok(out)
    }

    pub fn list_hotels(&self) -> Vec<Hotel> {
        let mut out: Vec<Hotel> = self.hotels.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|h| h.id);
        out
    }

    pub fn list_amenities(&self) -> Vec<Amenity> {
        let mut out: Vec<Amenity> = self.amenities.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|a| a.id);
        out
    }

    /// Resolve amenity ids to records, skipping ids that no longer exist.
    pub fn amenities_by_id(&self, ids: &[Ulid]) -> Vec<Amenity> {
        ids.iter().filter_map(|id| self.get_amenity(id)).collect()
    }

    fn has_all_amenities(&self, ids: &[Ulid], wanted: &[String]) -> bool {
        let have: HashSet<String> = self.amenities_by_id(ids).into_iter().map(|a| a.name).collect();
        wanted.iter().all(|name| have.contains(name))
    }

    /// Apartments with no booking intersecting the range and carrying every
    /// requested amenity.
    pub async fn search_apartments(&self, filter: &AvailabilityFilter) -> Vec<Accommodation> {
        let mut out = Vec::new();
        for rs in self.shared_accommodations() {
            let guard = rs.read().await;
            if guard.deleted || guard.info.kind != AccommodationKind::Apartment {
                continue;
            }
            if is_free(&guard, &filter.range) && self.has_all_amenities(&guard.info.amenity_ids, &filter.amenities) {
                out.push(guard.info.clone());
            }
        }
        out.sort_by_key(|a| a.id);
        out
    }

    /// Hotels with at least one room free over the range. The amenity filter
    /// passes when either the hotel's own amenities or the union of its
    /// rooms' amenities cover every requested name.
    pub async fn search_hotels(&self, filter: &AvailabilityFilter) -> Vec<Hotel> {
        let mut out = Vec::new();
        for hotel in self.list_hotels() {
            let mut any_free = false;
            let mut room_amenities = Vec::new();
            for rid in self.room_ids(&hotel.id) {
                let Some(rs) = self.get_accommodation(&rid) else { continue };
                let guard = rs.read().await;
                if guard.deleted {
                    continue;
                }
                any_free |= is_free(&guard, &filter.range);
                room_amenities.extend(guard.info.amenity_ids.iter().copied());
            }
            if filter.range.is_some() && !any_free {
                continue;
            }
            if !filter.amenities.is_empty()
                && !self.has_all_amenities(&hotel.amenity_ids, &filter.amenities)
                && !self.has_all_amenities(&room_amenities, &filter.amenities)
            {
                continue;
            }
            out.push(hotel);
        }
        out
    }
}
