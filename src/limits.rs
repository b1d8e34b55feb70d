/// Longest bookable range, in days (inclusive count).
pub const MAX_BOOKING_DAYS: i64 = 366;

pub const MAX_BOOKINGS_PER_VEHICLE: usize = 10_000;

/// Upper bound for any free-text field (notes, customer fields).
pub const MAX_TEXT_LEN: usize = 512;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Calendar views and bookings outside these years are rejected.
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 9999;

/// Largest day rate or override accepted, in the smallest currency unit.
/// Bounded so a full-length booking total stays far from overflow.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;
