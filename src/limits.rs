/// Longest stay that can be priced or held.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Widest window accepted by availability queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Calendar events a single villa may carry.
pub const MAX_EVENTS_PER_VILLA: usize = 10_000;

/// Ranges in one bulk block request.
pub const MAX_BATCH_SIZE: usize = 500;

pub const MAX_NOTE_LEN: usize = 1_000;

/// Bookings expired per sweep pass; the rest wait for the next tick.
pub const MAX_EXPIRE_PER_SWEEP: usize = 1_000;
