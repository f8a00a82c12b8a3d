use serde::Deserialize;
use serde_json::{json, Value};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// Parsed request from one wire line. Tagged by `op`; dates and times stay
/// strings here — the wire layer parses them so a malformed value turns
/// into a validation error, not a dropped connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Book {
        client_id: Ulid,
        professional_id: Ulid,
        #[serde(default)]
        service_id: Option<Ulid>,
        date: String,
        time: String,
        #[serde(default)]
        notes: Option<String>,
    },
    BookRange {
        client_id: Ulid,
        professional_id: Ulid,
        #[serde(default)]
        service_id: Option<Ulid>,
        date: String,
        start: String,
        end: String,
        #[serde(default)]
        notes: Option<String>,
    },
    Cancel {
        appointment_id: Ulid,
    },
    Confirm {
        appointment_id: Ulid,
    },
    Complete {
        appointment_id: Ulid,
    },
    Availability {
        professional_id: Ulid,
        date: String,
    },
    Block {
        professional_id: Ulid,
        start_date: String,
        end_date: String,
        start: String,
        end: String,
        #[serde(default)]
        interval_minutes: Option<u32>,
    },
    Release {
        professional_id: Ulid,
        date: String,
        time: String,
    },
    Appointments {
        professional_id: Ulid,
        date: String,
    },
    Watch {
        professional_id: Ulid,
    },
}

#[derive(Debug)]
pub enum ProtoError {
    Empty,
    Parse(String),
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::Empty => write!(f, "empty request"),
            ProtoError::Parse(msg) => write!(f, "malformed request: {msg}"),
        }
    }
}

impl std::error::Error for ProtoError {}

pub fn parse_request(line: &str) -> Result<Request, ProtoError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtoError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| ProtoError::Parse(e.to_string()))
}

// ── Response rendering ──────────────────────────────────────────

pub fn ok_line(mut body: Value) -> String {
    if let Value::Object(map) = &mut body {
        map.insert("ok".into(), Value::Bool(true));
    }
    body.to_string()
}

pub fn error_line(kind: &str, message: &str) -> String {
    json!({ "ok": false, "error": { "kind": kind, "message": message } }).to_string()
}

/// Map an engine error onto the wire taxonomy. Conflict and validation
/// errors carry their actionable message; transient and internal failures
/// return a generic retry message with no internal detail.
pub fn engine_error_body(err: &EngineError) -> (&'static str, String) {
    let kind = match err {
        EngineError::Validation(_) | EngineError::InvalidRange(_) | EngineError::LimitExceeded(_) => {
            "validation"
        }
        EngineError::NotFound(_) => "not_found",
        EngineError::SlotUnavailable { .. }
        | EngineError::BookingConflict { .. }
        | EngineError::Conflict(_)
        | EngineError::InvalidTransition { .. } => "conflict",
        EngineError::Storage(_) => "transient",
        EngineError::CompensationFailed { .. } => "internal",
    };
    let message = match kind {
        "transient" => "temporarily unavailable, try again".to_string(),
        "internal" => "internal error, try again".to_string(),
        _ => err.to_string(),
    };
    (kind, message)
}

pub fn appointment_json(appt: &Appointment) -> Value {
    json!({
        "id": appt.id.to_string(),
        "client_id": appt.client_id.to_string(),
        "professional_id": appt.professional_id.to_string(),
        "service_id": appt.service_id.map(|s| s.to_string()),
        "date": appt.date.to_string(),
        "time": format_hm(appt.start),
        "end_time": format_hm(appt.start + appt.duration_minutes),
        "duration_minutes": appt.duration_minutes,
        "status": appt.status.as_str(),
        "notes": appt.notes,
    })
}

pub fn schedule_json(date: chrono::NaiveDate, slots: &[Slot]) -> Value {
    json!({
        "date": date.to_string(),
        "slots": slots
            .iter()
            .map(|s| json!({ "time": format_hm(s.time), "available": s.available }))
            .collect::<Vec<_>>(),
    })
}

/// Watch-stream rendering of a committed event.
pub fn event_json(event: &Event) -> Value {
    match event {
        Event::SlotClaimed { professional_id, date, time } => json!({
            "event": "slot_claimed",
            "professional_id": professional_id.to_string(),
            "date": date.to_string(),
            "time": format_hm(*time),
        }),
        Event::SlotReleased { professional_id, date, time } => json!({
            "event": "slot_released",
            "professional_id": professional_id.to_string(),
            "date": date.to_string(),
            "time": format_hm(*time),
        }),
        Event::SlotsBlocked { professional_id, date, start, end, interval_minutes } => json!({
            "event": "slots_blocked",
            "professional_id": professional_id.to_string(),
            "date": date.to_string(),
            "start": format_hm(*start),
            "end": format_hm(*end),
            "interval_minutes": interval_minutes,
        }),
        Event::AppointmentCreated { id, professional_id, date, start, duration_minutes, .. } => {
            json!({
                "event": "appointment_created",
                "appointment_id": id.to_string(),
                "professional_id": professional_id.to_string(),
                "date": date.to_string(),
                "time": format_hm(*start),
                "duration_minutes": duration_minutes,
            })
        }
        Event::AppointmentTransitioned { id, professional_id, status } => json!({
            "event": "appointment_transitioned",
            "appointment_id": id.to_string(),
            "professional_id": professional_id.to_string(),
            "status": status.as_str(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parse_book() {
        let client = Ulid::new();
        let professional = Ulid::new();
        let line = format!(
            r#"{{"op":"book","client_id":"{client}","professional_id":"{professional}","date":"2025-06-10","time":"10:00"}}"#
        );
        let req = parse_request(&line).unwrap();
        assert_eq!(
            req,
            Request::Book {
                client_id: client,
                professional_id: professional,
                service_id: None,
                date: "2025-06-10".into(),
                time: "10:00".into(),
                notes: None,
            }
        );
    }

    #[test]
    fn parse_block_with_default_interval() {
        let professional = Ulid::new();
        let line = format!(
            r#"{{"op":"block","professional_id":"{professional}","start_date":"2025-07-01","end_date":"2025-07-14","start":"09:00","end":"17:00"}}"#
        );
        let req = parse_request(&line).unwrap();
        assert!(matches!(req, Request::Block { interval_minutes: None, .. }));
    }

    #[test]
    fn parse_missing_field_fails() {
        let line = r#"{"op":"book","date":"2025-06-10","time":"10:00"}"#;
        assert!(matches!(parse_request(line), Err(ProtoError::Parse(_))));
    }

    #[test]
    fn parse_unknown_op_fails() {
        let line = r#"{"op":"teleport","professional_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV"}"#;
        assert!(matches!(parse_request(line), Err(ProtoError::Parse(_))));
    }

    #[test]
    fn parse_empty_line() {
        assert!(matches!(parse_request("   "), Err(ProtoError::Empty)));
    }

    #[test]
    fn parse_non_json_fails() {
        assert!(matches!(parse_request("SELECT 1"), Err(ProtoError::Parse(_))));
    }

    #[test]
    fn error_bodies_follow_taxonomy() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let (kind, msg) = engine_error_body(&EngineError::BookingConflict { date, time: 600 });
        assert_eq!(kind, "conflict");
        assert!(msg.contains("already booked"));

        let (kind, msg) = engine_error_body(&EngineError::Storage("fsync failed".into()));
        assert_eq!(kind, "transient");
        assert!(!msg.contains("fsync")); // no internal detail

        let (kind, _) = engine_error_body(&EngineError::Validation("bad time"));
        assert_eq!(kind, "validation");

        let (kind, _) = engine_error_body(&EngineError::NotFound(Ulid::new()));
        assert_eq!(kind, "not_found");
    }

    #[test]
    fn appointment_renders_wire_shapes() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let appt = Appointment::new(
            Ulid::new(),
            Ulid::new(),
            None,
            date,
            600,
            Some(45),
            None,
            Some(600),
        );
        let v = appointment_json(&appt);
        assert_eq!(v["date"], "2025-06-10");
        assert_eq!(v["time"], "10:00");
        assert_eq!(v["end_time"], "10:45");
        assert_eq!(v["status"], "pending");
    }

    #[test]
    fn ok_line_tags_body() {
        let line = ok_line(json!({ "count": 3 }));
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["count"], 3);
    }
}
