use crate::model::*;

use super::EngineError;

// ── Slot Calendar ─────────────────────────────────────────────────

/// Produce the canonical ordered slot times from `start` inclusive to
/// `end` exclusive, stepping by `interval_minutes`.
pub fn generate_slots(
    start: Minute,
    end: Minute,
    interval_minutes: u32,
) -> Result<Vec<Minute>, EngineError> {
    if interval_minutes == 0 {
        return Err(EngineError::InvalidRange("interval must be positive"));
    }
    if end <= start {
        return Err(EngineError::InvalidRange("end must be after start"));
    }
    if end > MINUTES_PER_DAY {
        return Err(EngineError::InvalidRange("end is past midnight"));
    }
    let mut times = Vec::with_capacity(((end - start) / interval_minutes) as usize + 1);
    let mut t = start;
    while t < end {
        times.push(t);
        t += interval_minutes;
    }
    Ok(times)
}

/// Locate the slot for `time`, inserting one with
/// `available = default_available` if absent. This is the single chokepoint
/// for the default-availability policy — callers decide the default per
/// call site.
pub fn ensure_slot(day: &mut DayAvailability, time: Minute, default_available: bool) -> &mut Slot {
    let pos = match day.slots.binary_search_by_key(&time, |s| s.time) {
        Ok(pos) => pos,
        Err(pos) => {
            day.slots.insert(pos, Slot { time, available: default_available });
            pos
        }
    };
    &mut day.slots[pos]
}

/// Materialize the full bookable-day view: every grid time, with stored
/// slot state overriding the available-by-default policy.
pub fn materialize(grid: &SlotGrid, day: Option<&DayAvailability>) -> Vec<Slot> {
    let mut out = Vec::new();
    let mut t = grid.open;
    while t < grid.close {
        let available = day.and_then(|d| d.slot(t)).is_none_or(|s| s.available);
        out.push(Slot { time: t, available });
        t += grid.slot_minutes;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn day() -> DayAvailability {
        DayAvailability::new(Ulid::new(), NaiveDate::from_ymd_opt(2025, 6, 10).unwrap())
    }

    // ── generate_slots ────────────────────────────────────

    #[test]
    fn generate_business_day() {
        let times = generate_slots(parse_hm("09:00").unwrap(), parse_hm("17:00").unwrap(), 30).unwrap();
        assert_eq!(times.len(), 16);
        assert_eq!(format_hm(times[0]), "09:00");
        assert_eq!(format_hm(*times.last().unwrap()), "16:30");
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn generate_end_exclusive() {
        let times = generate_slots(540, 600, 30).unwrap();
        assert_eq!(times, vec![540, 570]); // 10:00 itself excluded
    }

    #[test]
    fn generate_uneven_tail() {
        // 09:00–09:50 at 20-minute steps: last slot starts 09:40
        let times = generate_slots(540, 590, 20).unwrap();
        assert_eq!(times, vec![540, 560, 580]);
    }

    #[test]
    fn generate_rejects_empty_range() {
        assert!(matches!(
            generate_slots(600, 600, 30),
            Err(EngineError::InvalidRange(_))
        ));
        assert!(matches!(
            generate_slots(600, 540, 30),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn generate_rejects_zero_interval() {
        assert!(matches!(
            generate_slots(540, 600, 0),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn generate_rejects_past_midnight() {
        assert!(matches!(
            generate_slots(1410, MINUTES_PER_DAY + 30, 30),
            Err(EngineError::InvalidRange(_))
        ));
    }

    // ── ensure_slot ───────────────────────────────────────

    #[test]
    fn ensure_creates_with_default() {
        let mut d = day();
        let slot = ensure_slot(&mut d, 600, true);
        assert!(slot.available);
        let slot = ensure_slot(&mut d, 630, false);
        assert!(!slot.available);
        assert_eq!(d.slots.len(), 2);
    }

    #[test]
    fn ensure_returns_existing_untouched() {
        let mut d = day();
        ensure_slot(&mut d, 600, true).available = false;
        // A different default must not resurrect the claimed slot.
        let slot = ensure_slot(&mut d, 600, true);
        assert!(!slot.available);
        assert_eq!(d.slots.len(), 1);
    }

    #[test]
    fn ensure_keeps_order() {
        let mut d = day();
        ensure_slot(&mut d, 630, true);
        ensure_slot(&mut d, 540, true);
        ensure_slot(&mut d, 600, true);
        let times: Vec<Minute> = d.slots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![540, 600, 630]);
    }

    // ── materialize ───────────────────────────────────────

    #[test]
    fn materialize_defaults_open() {
        let grid = SlotGrid::default();
        let slots = materialize(&grid, None);
        assert_eq!(slots.len(), 16);
        assert!(slots.iter().all(|s| s.available));
    }

    #[test]
    fn materialize_overlays_stored_state() {
        let grid = SlotGrid::default();
        let mut d = day();
        ensure_slot(&mut d, 600, true).available = false;
        let slots = materialize(&grid, Some(&d));
        assert_eq!(slots.len(), 16);
        let ten = slots.iter().find(|s| s.time == 600).unwrap();
        assert!(!ten.available);
        assert!(slots.iter().filter(|s| s.time != 600).all(|s| s.available));
    }
}
