mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use calendar::{ensure_slot, generate_slots, materialize};
pub use conflict::{find_conflict, has_conflict};
pub use error::EngineError;
pub use mutations::NewBooking;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::catalog::{ProfessionalDirectory, ServiceCatalog};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedDay = Arc<RwLock<DayAvailability>>;
pub type SharedAppointment = Arc<RwLock<Appointment>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The availability/booking engine: all state lives here, every mutation
/// goes through the WAL before it is applied in memory.
pub struct Engine {
    /// The deployment's booking grid.
    pub grid: SlotGrid,
    pub notify: Arc<NotifyHub>,
    days: DashMap<DayKey, SharedDay>,
    appointments: DashMap<Ulid, SharedAppointment>,
    /// (professional, date) → appointment ids, in creation order.
    day_index: DashMap<DayKey, Vec<Ulid>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub(crate) catalog: Arc<dyn ServiceCatalog>,
    pub(crate) directory: Arc<dyn ProfessionalDirectory>,
}

/// Apply a slot event directly to a DayAvailability (no locking — caller
/// holds the lock).
fn apply_slot_event(day: &mut DayAvailability, event: &Event) {
    match event {
        Event::SlotClaimed { time, .. } => {
            calendar::ensure_slot(day, *time, true).available = false;
        }
        Event::SlotReleased { time, .. } => {
            // Releasing a slot that was never materialized stays a no-op.
            if let Some(slot) = day.slot_mut(*time) {
                slot.available = true;
            }
        }
        Event::SlotsBlocked { start, end, interval_minutes, .. } => {
            // Validated before the event was written; an empty expansion on
            // replay means a corrupt entry and affects nothing.
            let times =
                calendar::generate_slots(*start, *end, *interval_minutes).unwrap_or_default();
            for t in times {
                calendar::ensure_slot(day, t, false).available = false;
            }
        }
        Event::AppointmentCreated { .. } | Event::AppointmentTransitioned { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        grid: SlotGrid,
        catalog: Arc<dyn ServiceCatalog>,
        directory: Arc<dyn ProfessionalDirectory>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            grid,
            notify,
            days: DashMap::new(),
            appointments: DashMap::new(),
            day_index: DashMap::new(),
            wal_tx,
            catalog,
            directory,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::SlotClaimed { professional_id, date, .. }
                | Event::SlotReleased { professional_id, date, .. }
                | Event::SlotsBlocked { professional_id, date, .. } => {
                    let day = engine.day_entry(*professional_id, *date);
                    let mut guard = day.try_write().expect("replay: uncontended write");
                    apply_slot_event(&mut guard, event);
                }
                Event::AppointmentCreated { .. } => engine.apply_appointment_created(event),
                Event::AppointmentTransitioned { id, status, .. } => {
                    if let Some(appt) = engine.appointment(id) {
                        appt.try_write().expect("replay: uncontended write").status = *status;
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Fetch the day aggregate if it was ever written.
    pub fn day(&self, professional_id: Ulid, date: chrono::NaiveDate) -> Option<SharedDay> {
        self.days
            .get(&DayKey::new(professional_id, date))
            .map(|e| e.value().clone())
    }

    /// Fetch or create the day aggregate for `(professional, date)`.
    pub fn day_entry(&self, professional_id: Ulid, date: chrono::NaiveDate) -> SharedDay {
        self.days
            .entry(DayKey::new(professional_id, date))
            .or_insert_with(|| Arc::new(RwLock::new(DayAvailability::new(professional_id, date))))
            .value()
            .clone()
    }

    pub fn appointment(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub(super) fn day_appointment_ids(&self, key: &DayKey) -> Vec<Ulid> {
        self.day_index.get(key).map(|e| e.value().clone()).unwrap_or_default()
    }

    /// Insert the appointment described by an AppointmentCreated event into
    /// the in-memory maps and index.
    pub(super) fn apply_appointment_created(&self, event: &Event) {
        let Event::AppointmentCreated {
            id,
            client_id,
            professional_id,
            service_id,
            date,
            start,
            duration_minutes,
            notes,
            slot_time,
        } = event
        else {
            return;
        };
        let appt = Appointment {
            id: *id,
            client_id: *client_id,
            professional_id: *professional_id,
            service_id: *service_id,
            date: *date,
            start: *start,
            duration_minutes: *duration_minutes,
            status: AppointmentStatus::Pending,
            notes: notes.clone(),
            slot_time: *slot_time,
        };
        self.appointments.insert(*id, Arc::new(RwLock::new(appt)));
        self.day_index
            .entry(DayKey::new(*professional_id, *date))
            .or_default()
            .push(*id);
    }

    /// WAL-append + apply + notify for a slot event, with the day write
    /// lock held by the caller. In-memory state only changes after the
    /// append succeeds, so a failed or timed-out append never leaves a
    /// slot claimed.
    pub(super) async fn persist_and_apply_slot(
        &self,
        day: &mut DayAvailability,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_slot_event(day, event);
        self.notify.send(event.professional_id(), event);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one SlotClaimed per unavailable slot,
    /// one AppointmentCreated (plus a transition) per appointment.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.days.iter() {
            let day = entry.value().clone();
            let guard = day.try_read().expect("compact: uncontended read");
            for slot in &guard.slots {
                // Explicitly-available slots equal absent slots under the
                // available-by-default policy; drop them.
                if !slot.available {
                    events.push(Event::SlotClaimed {
                        professional_id: guard.professional_id,
                        date: guard.date,
                        time: slot.time,
                    });
                }
            }
        }

        for entry in self.appointments.iter() {
            let appt = entry.value().clone();
            let guard = appt.try_read().expect("compact: uncontended read");
            events.push(Event::AppointmentCreated {
                id: guard.id,
                client_id: guard.client_id,
                professional_id: guard.professional_id,
                service_id: guard.service_id,
                date: guard.date,
                start: guard.start,
                duration_minutes: guard.duration_minutes,
                notes: guard.notes.clone(),
                slot_time: guard.slot_time,
            });
            if guard.status != AppointmentStatus::Pending {
                events.push(Event::AppointmentTransitioned {
                    id: guard.id,
                    professional_id: guard.professional_id,
                    status: guard.status,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
