use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, validate_duration, validate_notes, validate_range};
use super::{calendar, Engine, EngineError};

/// A booking request as the orchestrator receives it: identity resolved
/// upstream, date/time already parsed off the wire.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub client_id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Option<Ulid>,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

fn appointment_created_event(appt: &Appointment) -> Event {
    Event::AppointmentCreated {
        id: appt.id,
        client_id: appt.client_id,
        professional_id: appt.professional_id,
        service_id: appt.service_id,
        date: appt.date,
        start: appt.start,
        duration_minutes: appt.duration_minutes,
        notes: appt.notes.clone(),
        slot_time: appt.slot_time,
    }
}

impl Engine {
    // ── Availability Store ───────────────────────────────────

    /// Atomically claim the slot: verify it is available (creating it
    /// available-by-default if absent) and flip it to unavailable. The
    /// day's write lock makes check-and-flip a single step — two
    /// concurrent claims for the same `(professional, date, time)` resolve
    /// to exactly one success.
    pub async fn claim_slot(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
        time: Minute,
    ) -> Result<Slot, EngineError> {
        if !self.grid.is_on_grid(time) {
            return Err(EngineError::Validation("time is not on the booking grid"));
        }
        let day = self.day_entry(professional_id, date);
        let mut guard = day.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many slots on this day"));
        }
        if !calendar::ensure_slot(&mut guard, time, true).available {
            return Err(EngineError::SlotUnavailable { date, time });
        }
        let event = Event::SlotClaimed { professional_id, date, time };
        self.persist_and_apply_slot(&mut guard, &event).await?;
        Ok(Slot { time, available: false })
    }

    /// Set the slot back to available. Idempotent: releasing a missing or
    /// already-available slot is a no-op and writes no event.
    pub async fn release_slot(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
        time: Minute,
    ) -> Result<(), EngineError> {
        let Some(day) = self.day(professional_id, date) else {
            return Ok(());
        };
        let mut guard = day.write().await;
        let claimed = matches!(guard.slot(time), Some(slot) if !slot.available);
        if !claimed {
            return Ok(());
        }
        let event = Event::SlotReleased { professional_id, date, time };
        self.persist_and_apply_slot(&mut guard, &event).await
    }

    /// Bulk-provision unavailability: for each date in the range and each
    /// generated slot time, ensure the slot exists and mark it unavailable.
    /// Returns the number of slots that actually changed state, so a
    /// repeated invocation returns 0. Dates with no changes write no event.
    pub async fn block_slots(
        &self,
        professional_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start: Minute,
        end: Minute,
        interval_minutes: u32,
    ) -> Result<u64, EngineError> {
        if end_date < start_date {
            return Err(EngineError::InvalidRange("end date before start date"));
        }
        let span_days = (end_date - start_date).num_days() as u64 + 1;
        if span_days > u64::from(MAX_PROVISION_DAYS) {
            return Err(EngineError::LimitExceeded("provision window too wide"));
        }
        let times = calendar::generate_slots(start, end, interval_minutes)?;
        if times.len() > MAX_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many slots per day"));
        }

        let mut affected = 0u64;
        let mut date = start_date;
        loop {
            let day = self.day_entry(professional_id, date);
            let mut guard = day.write().await;
            let changed = times
                .iter()
                .filter(|t| guard.slot(**t).is_none_or(|s| s.available))
                .count() as u64;
            if changed > 0 {
                let event = Event::SlotsBlocked {
                    professional_id,
                    date,
                    start,
                    end,
                    interval_minutes,
                };
                self.persist_and_apply_slot(&mut guard, &event).await?;
                affected += changed;
            }
            drop(guard);

            if date == end_date {
                break;
            }
            date = date
                .succ_opt()
                .ok_or(EngineError::InvalidRange("date out of range"))?;
        }
        Ok(affected)
    }

    // ── Booking Orchestrator ─────────────────────────────────

    /// The single entry point for slot-model bookings: validate, resolve
    /// the service, claim the slot, persist the appointment. A claim
    /// conflict surfaces as a booking conflict with no appointment created;
    /// a persistence failure after a successful claim rolls the claim back
    /// before the error returns.
    pub async fn create_booking(
        &self,
        req: NewBooking,
        time: Minute,
    ) -> Result<Appointment, EngineError> {
        validate_notes(req.notes.as_deref())?;
        if !self.directory.is_professional(req.professional_id).await {
            return Err(EngineError::NotFound(req.professional_id));
        }
        let duration = self.resolve_duration(req.service_id, time).await?;
        let key = DayKey::new(req.professional_id, req.date);
        if self.day_appointment_ids(&key).len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this day"));
        }

        // The claim is the only step eligible for a retry: a transient
        // storage failure is not a semantic conflict.
        let mut attempts = 0;
        loop {
            match self.claim_slot(req.professional_id, req.date, time).await {
                Ok(_) => break,
                Err(EngineError::SlotUnavailable { date, time }) => {
                    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                    return Err(EngineError::BookingConflict { date, time });
                }
                Err(EngineError::Storage(e)) if attempts < CLAIM_RETRY_LIMIT => {
                    attempts += 1;
                    tracing::warn!("retrying slot claim after storage error: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        let appt = Appointment::new(
            req.client_id,
            req.professional_id,
            req.service_id,
            req.date,
            time,
            Some(duration),
            req.notes,
            Some(time),
        );
        let event = appointment_created_event(&appt);
        match self.persist_appointment(&event).await {
            Ok(()) => {
                metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
                Ok(appt)
            }
            Err(e) => {
                // The claim must not outlive the failed booking.
                match self.release_slot(req.professional_id, req.date, time).await {
                    Ok(()) => Err(e),
                    Err(release_err) => {
                        tracing::error!(
                            professional = %req.professional_id,
                            date = %req.date,
                            time = %format_hm(time),
                            "compensating release failed: {release_err} (booking error: {e})"
                        );
                        Err(EngineError::CompensationFailed { date: req.date, time })
                    }
                }
            }
        }
    }

    /// Range-model booking: conflict check and appointment insert happen
    /// under the same day write lock, so a read-then-write race between two
    /// overlapping requests is impossible.
    pub async fn create_range_booking(
        &self,
        req: NewBooking,
        start: Minute,
        end: Minute,
    ) -> Result<Appointment, EngineError> {
        validate_notes(req.notes.as_deref())?;
        let range = validate_range(start, end)?;
        if !self.directory.is_professional(req.professional_id).await {
            return Err(EngineError::NotFound(req.professional_id));
        }
        if let Some(sid) = req.service_id {
            if self.catalog.resolve(sid).await.is_none() {
                return Err(EngineError::NotFound(sid));
            }
        }

        let day = self.day_entry(req.professional_id, req.date);
        let _guard = day.write().await;

        let key = DayKey::new(req.professional_id, req.date);
        if self.day_appointment_ids(&key).len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this day"));
        }
        let existing = self.day_appointments(&key).await;
        if let Some(conflicting) = find_conflict(&existing, &range) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(conflicting));
        }

        let appt = Appointment::new(
            req.client_id,
            req.professional_id,
            req.service_id,
            req.date,
            start,
            Some(range.duration_minutes()),
            req.notes,
            None,
        );
        let event = appointment_created_event(&appt);
        self.persist_appointment(&event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        Ok(appt)
    }

    /// `pending → confirmed`.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition_booking(id, AppointmentStatus::Confirmed).await
    }

    /// `confirmed → completed`.
    pub async fn complete_booking(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition_booking(id, AppointmentStatus::Completed).await
    }

    /// Cancel and free the calendar: slot-model bookings release their
    /// claimed slot so it becomes bookable again; range bookings claimed
    /// nothing.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let updated = self.transition_booking(id, AppointmentStatus::Cancelled).await?;
        if let Some(time) = updated.slot_time {
            self.release_slot(updated.professional_id, updated.date, time).await?;
        }
        Ok(updated)
    }

    async fn transition_booking(
        &self,
        id: Ulid,
        next: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let appt = self.appointment(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = appt.write().await;
        if !guard.status.can_transition(next) {
            return Err(EngineError::InvalidTransition { from: guard.status, to: next });
        }
        let event = Event::AppointmentTransitioned {
            id,
            professional_id: guard.professional_id,
            status: next,
        };
        self.wal_append(&event).await?;
        guard.status = next;
        self.notify.send(guard.professional_id, &event);
        Ok(guard.clone())
    }

    async fn persist_appointment(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_appointment_created(event);
        self.notify.send(event.professional_id(), event);
        Ok(())
    }

    async fn resolve_duration(
        &self,
        service_id: Option<Ulid>,
        start: Minute,
    ) -> Result<u32, EngineError> {
        let duration = match service_id {
            Some(sid) => self
                .catalog
                .resolve(sid)
                .await
                .ok_or(EngineError::NotFound(sid))?
                .duration_minutes
                .unwrap_or(DEFAULT_DURATION_MINUTES),
            None => DEFAULT_DURATION_MINUTES,
        };
        validate_duration(start, duration)?;
        Ok(duration)
    }
}
