use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Overlap Validator ─────────────────────────────────────────────

/// Find an appointment conflicting with `proposed` among `existing`.
///
/// Two ranges `[a,b)` and `[c,d)` conflict iff `a < d && c < b` — the
/// half-open test, so back-to-back appointments never conflict. Cancelled
/// appointments are excluded from the conflict set.
pub fn find_conflict(existing: &[Appointment], proposed: &TimeRange) -> Option<Ulid> {
    existing
        .iter()
        .find(|a| a.blocks_time() && a.range().overlaps(proposed))
        .map(|a| a.id)
}

pub fn has_conflict(existing: &[Appointment], proposed: &TimeRange) -> bool {
    find_conflict(existing, proposed).is_some()
}

/// Check raw bounds and build the half-open range. Never construct a
/// `TimeRange` from unvalidated wire input.
pub(crate) fn validate_range(start: Minute, end: Minute) -> Result<TimeRange, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidRange("end must be after start"));
    }
    if end > MINUTES_PER_DAY {
        return Err(EngineError::InvalidRange("end is past midnight"));
    }
    if end - start > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(TimeRange::new(start, end))
}

pub(crate) fn validate_duration(start: Minute, duration_minutes: u32) -> Result<(), EngineError> {
    if duration_minutes == 0 {
        return Err(EngineError::Validation("duration must be positive"));
    }
    if duration_minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    if start + duration_minutes > MINUTES_PER_DAY {
        return Err(EngineError::InvalidRange("appointment runs past midnight"));
    }
    Ok(())
}

pub(crate) fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}
