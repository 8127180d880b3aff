//! Hard limits applied at the storage boundary.

/// Max length of a hotel, accommodation or amenity name.
pub const MAX_NAME_LEN: usize = 255;

/// Max length of free-text fields (description, location, address).
pub const MAX_TEXT_LEN: usize = 10_000;

/// Guest names shorter than this are rejected.
pub const MIN_GUEST_NAME_LEN: usize = 2;

pub const MAX_GUEST_NAME_LEN: usize = 255;

/// Max number of keys in a booking request's parameter bag.
pub const MAX_PARAMS: usize = 16;

pub const MAX_PARAM_KEY_LEN: usize = 64;

pub const MAX_PARAM_VALUE_LEN: usize = 1024;

pub const MAX_BOOKINGS_PER_ACCOMMODATION: usize = 100_000;

pub const MAX_AMENITIES_PER_OWNER: usize = 256;

/// Upper bound for `per_page` on index endpoints.
pub const MAX_PER_PAGE: usize = 100;
