//! Hotels, amenities and accommodations: the plain CRUD side of the store.

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{apply_to_accommodation, Engine, EngineError};

/// Input for `create_accommodation`.
#[derive(Debug, Clone)]
pub struct NewAccommodation {
    pub kind: AccommodationKind,
    pub hotel_id: Option<Ulid>,
    pub details: AccommodationDetails,
}

/// One entry of a nested amenities update.
///
/// - `id` + `destroy`: unlink that amenity.
/// - `id` + `name`: rename the amenity and make sure it is linked.
/// - `id` alone: link an existing amenity.
/// - `name` alone: find-or-create by name, then link.
///
/// Entries with a blank name and no id are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmenityChange {
    pub id: Option<Ulid>,
    pub name: Option<String>,
    pub destroy: bool,
}

impl AmenityChange {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn unlink(id: Ulid) -> Self {
        Self {
            id: Some(id),
            destroy: true,
            ..Default::default()
        }
    }
}

enum AmenityLink {
    Link(Ulid),
    Unlink(Ulid),
}

fn non_blank(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

fn validate_name(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} can't be blank")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_details(details: &AccommodationDetails) -> Result<(), EngineError> {
    validate_name("name", &details.name)?;
    for (field, value) in [("description", &details.description), ("location", &details.location)] {
        if value.trim().is_empty() {
            return Err(EngineError::Validation(format!("{field} can't be blank")));
        }
        if value.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("text field too long"));
        }
    }
    if details.address.as_ref().is_some_and(|a| a.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded("address too long"));
    }
    if details.price_cents.is_some_and(|p| p < 0) {
        return Err(EngineError::Validation("price must be greater than or equal to 0".into()));
    }
    Ok(())
}

impl Engine {
    // ── Amenities ────────────────────────────────────────────

    /// Exact, case-sensitive lookup.
    pub fn find_amenity_by_name(&self, name: &str) -> Option<Amenity> {
        let id = *self.amenity_names.get(name)?;
        self.amenities.get(&id).map(|a| a.clone())
    }

    pub fn get_amenity(&self, id: &Ulid) -> Option<Amenity> {
        self.amenities.get(id).map(|a| a.clone())
    }

    pub async fn find_or_create_amenity(&self, name: &str) -> Result<Amenity, EngineError> {
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        self.find_or_create_amenity_locked(name).await
    }

    /// Caller holds `catalog_lock`, which serializes name uniqueness checks.
    async fn find_or_create_amenity_locked(&self, name: &str) -> Result<Amenity, EngineError> {
        validate_name("amenity name", name)?;
        if let Some(existing) = self.find_amenity_by_name(name) {
            return Ok(existing);
        }
        let event = Event::AmenityCreated {
            id: Ulid::new(),
            name: name.to_string(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        self.find_amenity_by_name(name)
            .ok_or_else(|| EngineError::WalError("amenity vanished after create".into()))
    }

    /// Turn nested amenity changes into link/unlink actions, creating or
    /// renaming amenities on the way. Caller holds `catalog_lock`.
    async fn resolve_amenity_changes(&self, changes: &[AmenityChange]) -> Result<Vec<AmenityLink>, EngineError> {
        let mut links = Vec::with_capacity(changes.len());
        for change in changes {
            let name = non_blank(change.name.as_deref());
            match (change.id, name) {
                (Some(id), _) if change.destroy => links.push(AmenityLink::Unlink(id)),
                (Some(id), Some(name)) => {
                    let current = self
                        .get_amenity(&id)
                        .ok_or(EngineError::not_found("amenity", id))?;
                    if current.name != name {
                        validate_name("amenity name", name)?;
                        if self.amenity_names.contains_key(name) {
                            return Err(EngineError::DuplicateName(name.to_string()));
                        }
                        let event = Event::AmenityRenamed { id, name: name.to_string() };
                        self.wal_append(&event).await?;
                        self.apply_catalog(&event);
                    }
                    links.push(AmenityLink::Link(id));
                }
                (Some(id), None) => {
                    if !self.amenities.contains_key(&id) {
                        return Err(EngineError::not_found("amenity", id));
                    }
                    links.push(AmenityLink::Link(id));
                }
                (None, Some(name)) if !change.destroy => {
                    let amenity = self.find_or_create_amenity_locked(name).await?;
                    links.push(AmenityLink::Link(amenity.id));
                }
                (None, _) => {}
            }
        }
        Ok(links)
    }

    // ── Hotels ───────────────────────────────────────────────

    pub fn get_hotel(&self, id: &Ulid) -> Option<Hotel> {
        self.hotels.get(id).map(|h| h.clone())
    }

    pub async fn create_hotel(&self, id: Ulid, name: String, address: Option<String>) -> Result<Hotel, EngineError> {
        validate_name("name", &name)?;
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.hotels.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::HotelCreated { id, name, address };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        self.get_hotel(&id).ok_or(EngineError::not_found("hotel", id))
    }

    pub async fn update_hotel(
        &self,
        id: Ulid,
        name: Option<String>,
        address: Option<String>,
    ) -> Result<Hotel, EngineError> {
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        let current = self.get_hotel(&id).ok_or(EngineError::not_found("hotel", id))?;
        let name = name.unwrap_or(current.name);
        validate_name("name", &name)?;
        let address = address.or(current.address);
        let event = Event::HotelUpdated { id, name, address };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        self.get_hotel(&id).ok_or(EngineError::not_found("hotel", id))
    }

    /// Delete a hotel together with its rooms and their bookings.
    pub async fn delete_hotel(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        if !self.hotels.contains_key(&id) {
            return Err(EngineError::not_found("hotel", id));
        }
        let mut room_ids = self.room_ids(&id);
        room_ids.sort();
        let mut guards = Vec::with_capacity(room_ids.len());
        for rid in &room_ids {
            if let Some(rs) = self.get_accommodation(rid) {
                guards.push(rs.write_owned().await);
            }
        }

        let event = Event::HotelDeleted { id };
        self.wal_append(&event).await?;
        for guard in &mut guards {
            self.detach_accommodation(guard);
        }
        self.hotels.remove(&id);
        self.rooms.remove(&id);
        Ok(())
    }

    pub async fn change_hotel_amenities(&self, hotel_id: Ulid, changes: &[AmenityChange]) -> Result<Hotel, EngineError> {
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        let hotel = self
            .get_hotel(&hotel_id)
            .ok_or(EngineError::not_found("hotel", hotel_id))?;
        let mut linked = hotel.amenity_ids.len();
        for link in self.resolve_amenity_changes(changes).await? {
            let event = match link {
                AmenityLink::Link(amenity_id) => {
                    if self.get_hotel(&hotel_id).is_some_and(|h| h.amenity_ids.contains(&amenity_id)) {
                        continue;
                    }
                    linked += 1;
                    if linked > MAX_AMENITIES_PER_OWNER {
                        return Err(EngineError::LimitExceeded("too many amenities"));
                    }
                    Event::HotelAmenityLinked { hotel_id, amenity_id }
                }
                AmenityLink::Unlink(amenity_id) => Event::HotelAmenityUnlinked { hotel_id, amenity_id },
            };
            self.wal_append(&event).await?;
            self.apply_catalog(&event);
        }
        self.get_hotel(&hotel_id).ok_or(EngineError::not_found("hotel", hotel_id))
    }

    // ── Accommodations ───────────────────────────────────────

    pub async fn create_accommodation(&self, id: Ulid, new: NewAccommodation) -> Result<Accommodation, EngineError> {
        validate_details(&new.details)?;
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        match (new.kind, new.hotel_id) {
            (AccommodationKind::Room, None) => {
                return Err(EngineError::Validation("hotel must exist".into()));
            }
            (_, Some(hid)) if !self.hotels.contains_key(&hid) => {
                return Err(EngineError::Validation("hotel must exist".into()));
            }
            _ => {}
        }
        if self.accommodations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::AccommodationCreated {
            id,
            kind: new.kind,
            hotel_id: new.hotel_id,
            details: new.details,
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        self.accommodation(&id)
            .await
            .ok_or(EngineError::not_found("accommodation", id))
    }

    pub async fn update_accommodation(&self, id: Ulid, patch: &DetailsPatch) -> Result<Accommodation, EngineError> {
        let _gate = self.gate().await;
        let rs = self
            .get_accommodation(&id)
            .ok_or(EngineError::not_found("accommodation", id))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::not_found("accommodation", id));
        }
        let mut details = guard.info.details.clone();
        patch.apply(&mut details);
        validate_details(&details)?;

        let event = Event::AccommodationUpdated { id, details };
        self.wal_append(&event).await?;
        apply_to_accommodation(&mut guard, &event, &self.booking_index);
        Ok(guard.info.clone())
    }

    /// Delete an accommodation and all of its bookings. Booking requests that
    /// referenced it are kept as history.
    pub async fn delete_accommodation(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        let rs = self
            .get_accommodation(&id)
            .ok_or(EngineError::not_found("accommodation", id))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::not_found("accommodation", id));
        }
        let event = Event::AccommodationDeleted { id };
        self.wal_append(&event).await?;
        self.detach_accommodation(&mut guard);
        Ok(())
    }

    pub async fn change_accommodation_amenities(
        &self,
        accommodation_id: Ulid,
        changes: &[AmenityChange],
    ) -> Result<Accommodation, EngineError> {
        let _gate = self.gate().await;
        let _catalog = self.catalog_lock.lock().await;
        let rs = self
            .get_accommodation(&accommodation_id)
            .ok_or(EngineError::not_found("accommodation", accommodation_id))?;
        let links = self.resolve_amenity_changes(changes).await?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::not_found("accommodation", accommodation_id));
        }
        for link in links {
            let event = match link {
                AmenityLink::Link(amenity_id) => {
                    if guard.info.amenity_ids.contains(&amenity_id) {
                        continue;
                    }
                    if guard.info.amenity_ids.len() >= MAX_AMENITIES_PER_OWNER {
                        return Err(EngineError::LimitExceeded("too many amenities"));
                    }
                    Event::AccommodationAmenityLinked { accommodation_id, amenity_id }
                }
                AmenityLink::Unlink(amenity_id) => Event::AccommodationAmenityUnlinked { accommodation_id, amenity_id },
            };
            self.wal_append(&event).await?;
            apply_to_accommodation(&mut guard, &event, &self.booking_index);
        }
        Ok(guard.info.clone())
    }
}
