use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Closed calendar range `[start, end]`. Both endpoints are booked days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Closed-interval intersection. This is the exclusion constraint the
    /// engine enforces on committed bookings.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The resolver's pre-check comparison:
    /// `existing.start < new.end AND existing.end > new.start`.
    /// Ranges that only touch on an endpoint do not match here, but do
    /// match `overlaps`.
    pub fn overlaps_strict(&self, other: &DateRange) -> bool {
        self.start < other.end && self.end > other.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccommodationKind {
    Accommodation,
    Room,
    Apartment,
}

impl AccommodationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccommodationKind::Accommodation => "accommodation",
            AccommodationKind::Room => "room",
            AccommodationKind::Apartment => "apartment",
        }
    }
}

/// Descriptive columns shared by every accommodation kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccommodationDetails {
    pub name: String,
    pub description: String,
    pub price_cents: Option<i64>,
    pub location: String,
    pub capacity: Option<u32>,
    pub address: Option<String>,
}

/// Partial update of `AccommodationDetails`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub address: Option<String>,
}

impl DetailsPatch {
    pub fn apply(&self, details: &mut AccommodationDetails) {
        if let Some(name) = &self.name {
            details.name = name.clone();
        }
        if let Some(description) = &self.description {
            details.description = description.clone();
        }
        if self.price_cents.is_some() {
            details.price_cents = self.price_cents;
        }
        if let Some(location) = &self.location {
            details.location = location.clone();
        }
        if self.capacity.is_some() {
            details.capacity = self.capacity;
        }
        if self.address.is_some() {
            details.address = self.address.clone();
        }
    }

    /// Build full details from a patch, for creation. Missing required
    /// fields become empty strings and fail validation downstream.
    pub fn into_details(self) -> AccommodationDetails {
        AccommodationDetails {
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            price_cents: self.price_cents,
            location: self.location.unwrap_or_default(),
            capacity: self.capacity,
            address: self.address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenity {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: Ulid,
    pub name: String,
    pub address: Option<String>,
    pub amenity_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub accommodation_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub guest_name: String,
}

impl Booking {
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Success,
    Failed,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Success => "success",
            BookingStatus::Failed => "failed",
        }
    }
}

/// Raw booking parameters, stored verbatim and interpreted only by the resolver.
pub type BookingParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: Ulid,
    pub accommodation_id: Ulid,
    pub params: BookingParams,
    pub status: BookingStatus,
    pub requested_at: DateTime<Utc>,
    pub performed_at: Option<DateTime<Utc>>,
    pub booking_id: Option<Ulid>,
    pub failure_reason: Option<String>,
}

impl BookingRequest {
    pub fn new(id: Ulid, accommodation_id: Ulid, params: BookingParams, requested_at: DateTime<Utc>) -> Self {
        Self {
            id,
            accommodation_id,
            params,
            status: BookingStatus::Pending,
            requested_at,
            performed_at: None,
            booking_id: None,
            failure_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accommodation {
    pub id: Ulid,
    pub kind: AccommodationKind,
    pub hotel_id: Option<Ulid>,
    pub details: AccommodationDetails,
    pub amenity_ids: Vec<Ulid>,
}

/// An accommodation and its committed bookings.
#[derive(Debug, Clone)]
pub struct AccommodationState {
    pub info: Accommodation,
    /// Committed bookings, sorted by `start_date`.
    pub bookings: Vec<Booking>,
    /// Set under the write lock when the accommodation is destroyed, so a
    /// writer that fetched the Arc before removal cannot commit into it.
    pub deleted: bool,
}

impl AccommodationState {
    pub fn new(info: Accommodation) -> Self {
        Self {
            info,
            bookings: Vec::new(),
            deleted: false,
        }
    }

    /// Insert booking maintaining sort order by start_date.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start_date, |b| b.start_date)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose closed range intersects `query`.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start_date <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end_date >= query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AmenityCreated {
        id: Ulid,
        name: String,
    },
    AmenityRenamed {
        id: Ulid,
        name: String,
    },
    HotelCreated {
        id: Ulid,
        name: String,
        address: Option<String>,
    },
    HotelUpdated {
        id: Ulid,
        name: String,
        address: Option<String>,
    },
    /// Cascades to the hotel's rooms and their bookings.
    HotelDeleted {
        id: Ulid,
    },
    HotelAmenityLinked {
        hotel_id: Ulid,
        amenity_id: Ulid,
    },
    HotelAmenityUnlinked {
        hotel_id: Ulid,
        amenity_id: Ulid,
    },
    AccommodationCreated {
        id: Ulid,
        kind: AccommodationKind,
        hotel_id: Option<Ulid>,
        details: AccommodationDetails,
    },
    AccommodationUpdated {
        id: Ulid,
        details: AccommodationDetails,
    },
    /// Cascades to the accommodation's bookings.
    AccommodationDeleted {
        id: Ulid,
    },
    AccommodationAmenityLinked {
        accommodation_id: Ulid,
        amenity_id: Ulid,
    },
    AccommodationAmenityUnlinked {
        accommodation_id: Ulid,
        amenity_id: Ulid,
    },
    BookingConfirmed {
        id: Ulid,
        accommodation_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        guest_name: String,
    },
    BookingUpdated {
        id: Ulid,
        accommodation_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        guest_name: String,
    },
    BookingCancelled {
        id: Ulid,
        accommodation_id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        accommodation_id: Ulid,
        params: BookingParams,
        requested_at: DateTime<Utc>,
    },
    BookingRequestSucceeded {
        id: Ulid,
        booking_id: Ulid,
        performed_at: DateTime<Utc>,
    },
    BookingRequestFailed {
        id: Ulid,
        reason: String,
        performed_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(day(a), day(b))
    }

    fn booking(start: &str, end: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            accommodation_id: Ulid::nil(),
            start_date: day(start),
            end_date: day(end),
            guest_name: "Guest".into(),
        }
    }

    fn state() -> AccommodationState {
        AccommodationState::new(Accommodation {
            id: Ulid::new(),
            kind: AccommodationKind::Apartment,
            hotel_id: None,
            details: AccommodationDetails::default(),
            amenity_ids: Vec::new(),
        })
    }

    #[test]
    fn closed_overlap_includes_touching_endpoints() {
        let a = range("2025-09-10", "2025-09-12");
        let b = range("2025-09-12", "2025-09-14");
        let c = range("2025-09-13", "2025-09-14");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn strict_overlap_ignores_touching_endpoints() {
        let existing = range("2025-09-10", "2025-09-12");
        let touching = range("2025-09-12", "2025-09-14");
        let inside = range("2025-09-11", "2025-09-13");
        assert!(!existing.overlaps_strict(&touching));
        assert!(existing.overlaps_strict(&inside));
        assert!(existing.overlaps_strict(&existing));
    }

    #[test]
    fn strict_overlap_single_day_ranges() {
        // A one-day booking never strictly overlaps an identical one-day booking
        let d = range("2025-09-10", "2025-09-10");
        assert!(!d.overlaps_strict(&d));
        assert!(d.overlaps(&d));
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut rs = state();
        rs.insert_booking(booking("2025-09-20", "2025-09-21"));
        rs.insert_booking(booking("2025-09-01", "2025-09-02"));
        rs.insert_booking(booking("2025-09-10", "2025-09-11"));
        let starts: Vec<_> = rs.bookings.iter().map(|b| b.start_date).collect();
        assert_eq!(starts, vec![day("2025-09-01"), day("2025-09-10"), day("2025-09-20")]);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut rs = state();
        let b = booking("2025-09-01", "2025-09-02");
        let id = b.id;
        rs.insert_booking(b);
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.remove_booking(id).map(|b| b.id), Some(id));
        assert!(rs.bookings.is_empty());
    }

    #[test]
    fn overlapping_uses_closed_ranges() {
        let mut rs = state();
        rs.insert_booking(booking("2025-09-01", "2025-09-05"));
        rs.insert_booking(booking("2025-09-10", "2025-09-12"));
        rs.insert_booking(booking("2025-09-20", "2025-09-25"));

        let hits: Vec<_> = rs.overlapping(&range("2025-09-05", "2025-09-10")).collect();
        assert_eq!(hits.len(), 2);

        let none: Vec<_> = rs.overlapping(&range("2025-09-13", "2025-09-19")).collect();
        assert!(none.is_empty());
    }

    #[test]
    fn details_patch_only_touches_given_fields() {
        let mut details = AccommodationDetails {
            name: "Loft".into(),
            description: "Sunny".into(),
            price_cents: Some(12_000),
            location: "Lisbon".into(),
            capacity: Some(2),
            address: None,
        };
        let patch = DetailsPatch {
            name: Some("Big Loft".into()),
            capacity: Some(4),
            ..Default::default()
        };
        patch.apply(&mut details);
        assert_eq!(details.name, "Big Loft");
        assert_eq!(details.capacity, Some(4));
        assert_eq!(details.description, "Sunny");
        assert_eq!(details.price_cents, Some(12_000));
    }

    #[test]
    fn status_terminality() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(BookingStatus::Success.is_terminal());
        assert!(BookingStatus::Failed.is_terminal());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let mut params = BookingParams::new();
        params.insert("start_date".into(), "2025-09-10".into());
        let event = Event::BookingRequested {
            id: Ulid::new(),
            accommodation_id: Ulid::new(),
            params,
            requested_at: Utc::now(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
