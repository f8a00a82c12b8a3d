use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{format_hm, AppointmentStatus, Minute};

#[derive(Debug)]
pub enum EngineError {
    Validation(&'static str),
    InvalidRange(&'static str),
    NotFound(Ulid),
    SlotUnavailable { date: NaiveDate, time: Minute },
    BookingConflict { date: NaiveDate, time: Minute },
    Conflict(Ulid),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    Storage(String),
    CompensationFailed { date: NaiveDate, time: Minute },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::InvalidRange(msg) => write!(f, "invalid range: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::SlotUnavailable { date, time } => {
                write!(f, "slot {date} {} is not available", format_hm(*time))
            }
            EngineError::BookingConflict { date, time } => {
                write!(
                    f,
                    "this time slot is already booked: {date} {}",
                    format_hm(*time)
                )
            }
            EngineError::Conflict(id) => write!(f, "conflicts with appointment: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(
                    f,
                    "invalid status transition: {} -> {}",
                    from.as_str(),
                    to.as_str()
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
            EngineError::CompensationFailed { date, time } => {
                write!(
                    f,
                    "failed to release slot {date} {} after a booking error",
                    format_hm(*time)
                )
            }
        }
    }
}

impl std::error::Error for EngineError {}
