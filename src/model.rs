use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight — the only time-of-day type.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Duration applied when neither the request nor the service names one.
pub const DEFAULT_DURATION_MINUTES: u32 = 30;

/// Parse a wire time (`"HH:MM"`, 24h) into minutes since midnight.
pub fn parse_hm(s: &str) -> Option<Minute> {
    let t = NaiveTime::parse_from_str(s, "%H:%M").ok()?;
    Some(t.num_seconds_from_midnight() / 60)
}

/// Format minutes since midnight as `"HH:MM"`.
pub fn format_hm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse a wire date (`"YYYY-MM-DD"`). Dates carry no timezone.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Half-open interval `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minute,
    pub end: Minute,
}

impl TimeRange {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u32 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }
}

/// The booking grid a deployment is configured with: slots open at `open`,
/// the last slot starts before `close`, stepping by `slot_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrid {
    pub open: Minute,
    pub close: Minute,
    pub slot_minutes: u32,
}

impl SlotGrid {
    pub fn new(open: Minute, close: Minute, slot_minutes: u32) -> Option<Self> {
        if open >= close || close > MINUTES_PER_DAY || slot_minutes == 0 {
            return None;
        }
        Some(Self { open, close, slot_minutes })
    }

    /// A bookable time must sit on the grid: inside `[open, close)` and
    /// aligned to `slot_minutes` from `open`.
    pub fn is_on_grid(&self, time: Minute) -> bool {
        time >= self.open && time < self.close && (time - self.open) % self.slot_minutes == 0
    }
}

impl Default for SlotGrid {
    fn default() -> Self {
        Self { open: 9 * 60, close: 17 * 60, slot_minutes: 30 }
    }
}

/// A discrete bookable unit on a professional's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub time: Minute,
    pub available: bool,
}

/// Key of a day aggregate: one professional, one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayKey {
    pub professional_id: Ulid,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(professional_id: Ulid, date: NaiveDate) -> Self {
        Self { professional_id, date }
    }
}

/// All slots for one `(professional, date)` pair, ordered by time and
/// unique per time. Slots are created lazily; absence means
/// available-by-default.
#[derive(Debug, Clone)]
pub struct DayAvailability {
    pub professional_id: Ulid,
    pub date: NaiveDate,
    /// Sorted by `time`.
    pub slots: Vec<Slot>,
}

impl DayAvailability {
    pub fn new(professional_id: Ulid, date: NaiveDate) -> Self {
        Self { professional_id, date, slots: Vec::new() }
    }

    pub fn slot(&self, time: Minute) -> Option<&Slot> {
        self.slots
            .binary_search_by_key(&time, |s| s.time)
            .ok()
            .map(|pos| &self.slots[pos])
    }

    pub fn slot_mut(&mut self, time: Minute) -> Option<&mut Slot> {
        match self.slots.binary_search_by_key(&time, |s| s.time) {
            Ok(pos) => Some(&mut self.slots[pos]),
            Err(_) => None,
        }
    }

    /// Insert slot maintaining sort order by time. Caller guarantees no
    /// slot exists for that time yet.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.time, |s| s.time)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }
}

/// Appointment lifecycle. Transitions are guarded by an explicit table —
/// `pending → confirmed|cancelled`, `confirmed → completed|cancelled` —
/// never by ad hoc string writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn can_transition(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

/// A client's reservation of a professional's time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start: Minute,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    /// Grid slot claimed at creation. `None` for range-model bookings —
    /// cancellation releases exactly what was claimed.
    pub slot_time: Option<Minute>,
}

impl Appointment {
    /// Construction is the only place defaults are applied: every new
    /// appointment starts `pending` and falls back to the default duration.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: Ulid,
        professional_id: Ulid,
        service_id: Option<Ulid>,
        date: NaiveDate,
        start: Minute,
        duration_minutes: Option<u32>,
        notes: Option<String>,
        slot_time: Option<Minute>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            client_id,
            professional_id,
            service_id,
            date,
            start,
            duration_minutes: duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
            status: AppointmentStatus::Pending,
            notes,
            slot_time,
        }
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.start + self.duration_minutes)
    }

    /// Whether this appointment still occupies its time in the conflict set.
    pub fn blocks_time(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotClaimed {
        professional_id: Ulid,
        date: NaiveDate,
        time: Minute,
    },
    SlotReleased {
        professional_id: Ulid,
        date: NaiveDate,
        time: Minute,
    },
    SlotsBlocked {
        professional_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
        interval_minutes: u32,
    },
    AppointmentCreated {
        id: Ulid,
        client_id: Ulid,
        professional_id: Ulid,
        service_id: Option<Ulid>,
        date: NaiveDate,
        start: Minute,
        duration_minutes: u32,
        notes: Option<String>,
        slot_time: Option<Minute>,
    },
    AppointmentTransitioned {
        id: Ulid,
        professional_id: Ulid,
        status: AppointmentStatus,
    },
}

impl Event {
    /// The professional whose calendar this event belongs to — the
    /// notification routing key.
    pub fn professional_id(&self) -> Ulid {
        match self {
            Event::SlotClaimed { professional_id, .. }
            | Event::SlotReleased { professional_id, .. }
            | Event::SlotsBlocked { professional_id, .. }
            | Event::AppointmentCreated { professional_id, .. }
            | Event::AppointmentTransitioned { professional_id, .. } => *professional_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn hm_roundtrip() {
        assert_eq!(parse_hm("09:00"), Some(540));
        assert_eq!(parse_hm("00:00"), Some(0));
        assert_eq!(parse_hm("23:59"), Some(1439));
        assert_eq!(format_hm(540), "09:00");
        assert_eq!(format_hm(1439), "23:59");
    }

    #[test]
    fn hm_rejects_malformed() {
        assert_eq!(parse_hm("24:00"), None);
        assert_eq!(parse_hm("9am"), None);
        assert_eq!(parse_hm("09:60"), None);
        assert_eq!(parse_hm(""), None);
    }

    #[test]
    fn date_parse() {
        assert!(parse_date("2025-06-10").is_some());
        assert_eq!(parse_date("2025-02-30"), None);
        assert_eq!(parse_date("10/06/2025"), None);
    }

    #[test]
    fn range_overlap() {
        let a = TimeRange::new(540, 570); // 09:00–09:30
        let b = TimeRange::new(555, 585); // 09:15–09:45
        let c = TimeRange::new(570, 600); // 09:30–10:00
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, not overlapping
        assert!(b.overlaps(&c));
    }

    #[test]
    fn range_contains() {
        let r = TimeRange::new(540, 570);
        assert!(r.contains(540));
        assert!(r.contains(569));
        assert!(!r.contains(570)); // half-open
    }

    #[test]
    fn grid_alignment() {
        let grid = SlotGrid::default();
        assert!(grid.is_on_grid(540)); // 09:00
        assert!(grid.is_on_grid(990)); // 16:30, last slot
        assert!(!grid.is_on_grid(1020)); // 17:00, past close
        assert!(!grid.is_on_grid(555)); // 09:15, off-grid
        assert!(!grid.is_on_grid(480)); // 08:00, before open
    }

    #[test]
    fn grid_rejects_degenerate() {
        assert!(SlotGrid::new(540, 540, 30).is_none());
        assert!(SlotGrid::new(600, 540, 30).is_none());
        assert!(SlotGrid::new(540, 1020, 0).is_none());
        assert!(SlotGrid::new(540, MINUTES_PER_DAY + 1, 30).is_none());
    }

    #[test]
    fn slot_ordering() {
        let mut day = DayAvailability::new(Ulid::new(), date("2025-06-10"));
        day.insert_slot(Slot { time: 600, available: false });
        day.insert_slot(Slot { time: 540, available: true });
        day.insert_slot(Slot { time: 570, available: false });
        let times: Vec<Minute> = day.slots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![540, 570, 600]);
    }

    #[test]
    fn slot_lookup() {
        let mut day = DayAvailability::new(Ulid::new(), date("2025-06-10"));
        day.insert_slot(Slot { time: 540, available: false });
        assert!(day.slot(540).is_some());
        assert!(day.slot(570).is_none());
        day.slot_mut(540).unwrap().available = true;
        assert!(day.slot(540).unwrap().available);
    }

    #[test]
    fn status_transition_table() {
        use AppointmentStatus::*;
        assert!(Pending.can_transition(Confirmed));
        assert!(Pending.can_transition(Cancelled));
        assert!(Confirmed.can_transition(Completed));
        assert!(Confirmed.can_transition(Cancelled));

        assert!(!Pending.can_transition(Completed));
        assert!(!Cancelled.can_transition(Pending));
        assert!(!Cancelled.can_transition(Confirmed));
        assert!(!Completed.can_transition(Cancelled));
        assert!(!Confirmed.can_transition(Pending));
    }

    #[test]
    fn appointment_defaults() {
        let appt = Appointment::new(
            Ulid::new(),
            Ulid::new(),
            None,
            date("2025-06-10"),
            600,
            None,
            None,
            Some(600),
        );
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert_eq!(appt.range(), TimeRange::new(600, 630));
        assert!(appt.blocks_time());
    }

    #[test]
    fn cancelled_appointment_frees_time() {
        let mut appt = Appointment::new(
            Ulid::new(),
            Ulid::new(),
            None,
            date("2025-06-10"),
            600,
            Some(60),
            None,
            None,
        );
        appt.status = AppointmentStatus::Cancelled;
        assert!(!appt.blocks_time());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentCreated {
            id: Ulid::new(),
            client_id: Ulid::new(),
            professional_id: Ulid::new(),
            service_id: None,
            date: date("2025-06-10"),
            start: 600,
            duration_minutes: 30,
            notes: Some("first visit".into()),
            slot_time: Some(600),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
