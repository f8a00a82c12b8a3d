//! Guard-rail limits. Requests past these fail with `LimitExceeded` rather
//! than growing state without bound.

/// Upper bound on distinct slots stored for one professional-day.
pub const MAX_SLOTS_PER_DAY: usize = 288; // 24h at 5-minute granularity

/// Upper bound on appointments stored for one professional-day.
pub const MAX_APPOINTMENTS_PER_DAY: usize = 512;

/// Widest date window a single bulk-provisioning call may cover.
pub const MAX_PROVISION_DAYS: u32 = 366;

/// Longest appointment a service may define.
pub const MAX_DURATION_MINUTES: u32 = 8 * 60;

pub const MAX_NOTES_LEN: usize = 1024;

/// Bounded retries of the slot claim on a transient storage failure.
pub const CLAIM_RETRY_LIMIT: u32 = 1;
