use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{calendar, Engine};

impl Engine {
    /// The full slot list for `(professional, date)` over the configured
    /// grid, with `available` flags — what a client UI renders as bookable
    /// times. Unstored grid slots are available-by-default.
    pub async fn day_schedule(&self, professional_id: Ulid, date: NaiveDate) -> Vec<Slot> {
        match self.day(professional_id, date) {
            Some(day) => {
                let guard = day.read().await;
                calendar::materialize(&self.grid, Some(&*guard))
            }
            None => calendar::materialize(&self.grid, None),
        }
    }

    /// Snapshot of all appointments for one professional-day, in creation
    /// order.
    pub(super) async fn day_appointments(&self, key: &DayKey) -> Vec<Appointment> {
        let ids = self.day_appointment_ids(key);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(appt) = self.appointment(&id) {
                out.push(appt.read().await.clone());
            }
        }
        out
    }

    pub async fn appointments_for_day(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
    ) -> Vec<Appointment> {
        self.day_appointments(&DayKey::new(professional_id, date)).await
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        match self.appointment(&id) {
            Some(appt) => Some(appt.read().await.clone()),
            None => None,
        }
    }
}
