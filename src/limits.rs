use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_BATCH_SIZE: usize = 500;
pub const MAX_INVOICE_LINES: usize = 100;

/// 2000-01-01T00:00:00Z. Bookings before this are typos, not history.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest rental a single booking may cover (366 days).
pub const MAX_BOOKING_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const DEFAULT_REPLICATION_ATTEMPTS: u32 = 3;
pub const DEFAULT_REPLICATION_BACKOFF_MS: u64 = 50;
