use crate::model::Ms;

pub const HOUR_MS: Ms = 3_600_000;
pub const MINUTE_MS: Ms = 60_000;

/// Students may not cancel once the slot is this close.
pub const STUDENT_CANCELLATION_WINDOW_MS: Ms = 8 * HOUR_MS;

pub const MAX_REASON_LEN: usize = 500;
pub const MAX_SUBJECT_LEN: usize = 100;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TEAM_ID_LEN: usize = 255;
pub const MAX_EXTERNAL_ID_LEN: usize = 255;

pub const MAX_SLOTS_PER_FACULTY: usize = 10_000;
pub const MAX_SLOT_DURATION_MS: Ms = 24 * HOUR_MS;
pub const MAX_BULK_WINDOW_MS: Ms = 24 * HOUR_MS;

pub const ALLOWED_SLOT_MINUTES: [i64; 3] = [5, 10, 15];
pub const ALLOWED_BREAK_MINUTES: [i64; 4] = [0, 5, 10, 15];

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Request-layer retry policy for `Contention`.
pub const CONTENTION_RETRIES: u32 = 3;
pub const CONTENTION_BACKOFF_BASE_MS: u64 = 10;
