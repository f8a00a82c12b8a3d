use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, NewBooking};
use crate::model::{parse_date, parse_hm};
use crate::observability;
use crate::proto::{self, Request};

const MAX_LINE_LEN: usize = 64 * 1024;

/// Serve one client connection: one JSON request per line, one JSON reply
/// per line, with watch notifications pushed in between.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    // Watch forwarders fan in here; the connection is the single writer.
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
    let mut watches: HashMap<Ulid, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            line = framed.next() => {
                let Some(line) = line else { break };
                let line = line?;
                let reply = handle_line(&engine, &line, &push_tx, &mut watches).await;
                framed.send(reply).await?;
            }
            Some(push) = push_rx.recv() => {
                framed.send(push).await?;
            }
        }
    }

    for (_, handle) in watches.drain() {
        handle.abort();
        metrics::gauge!(observability::WATCHES_ACTIVE).decrement(1.0);
    }
    Ok(())
}

async fn handle_line(
    engine: &Arc<Engine>,
    line: &str,
    push_tx: &mpsc::UnboundedSender<String>,
    watches: &mut HashMap<Ulid, JoinHandle<()>>,
) -> String {
    let req = match proto::parse_request(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "parse", "status" => "error")
                .increment(1);
            return proto::error_line("validation", &e.to_string());
        }
    };

    let label = observability::op_label(&req);
    let start = Instant::now();
    let result = dispatch(engine, req, push_tx, watches).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => label)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(body) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => "ok")
                .increment(1);
            proto::ok_line(body)
        }
        Err(err) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => "error")
                .increment(1);
            let (kind, message) = proto::engine_error_body(&err);
            proto::error_line(kind, &message)
        }
    }
}

fn wire_date(s: &str) -> Result<chrono::NaiveDate, EngineError> {
    parse_date(s).ok_or(EngineError::Validation("invalid date, expected YYYY-MM-DD"))
}

fn wire_time(s: &str) -> Result<crate::model::Minute, EngineError> {
    parse_hm(s).ok_or(EngineError::Validation("invalid time, expected HH:MM"))
}

async fn dispatch(
    engine: &Arc<Engine>,
    req: Request,
    push_tx: &mpsc::UnboundedSender<String>,
    watches: &mut HashMap<Ulid, JoinHandle<()>>,
) -> Result<Value, EngineError> {
    match req {
        Request::Book { client_id, professional_id, service_id, date, time, notes } => {
            let date = wire_date(&date)?;
            let time = wire_time(&time)?;
            let appt = engine
                .create_booking(
                    NewBooking { client_id, professional_id, service_id, date, notes },
                    time,
                )
                .await?;
            Ok(json!({ "appointment": proto::appointment_json(&appt) }))
        }
        Request::BookRange { client_id, professional_id, service_id, date, start, end, notes } => {
            let date = wire_date(&date)?;
            let start = wire_time(&start)?;
            let end = wire_time(&end)?;
            let appt = engine
                .create_range_booking(
                    NewBooking { client_id, professional_id, service_id, date, notes },
                    start,
                    end,
                )
                .await?;
            Ok(json!({ "appointment": proto::appointment_json(&appt) }))
        }
        Request::Cancel { appointment_id } => {
            let appt = engine.cancel_booking(appointment_id).await?;
            Ok(json!({ "appointment": proto::appointment_json(&appt) }))
        }
        Request::Confirm { appointment_id } => {
            let appt = engine.confirm_booking(appointment_id).await?;
            Ok(json!({ "appointment": proto::appointment_json(&appt) }))
        }
        Request::Complete { appointment_id } => {
            let appt = engine.complete_booking(appointment_id).await?;
            Ok(json!({ "appointment": proto::appointment_json(&appt) }))
        }
        Request::Availability { professional_id, date } => {
            let date = wire_date(&date)?;
            let slots = engine.day_schedule(professional_id, date).await;
            Ok(proto::schedule_json(date, &slots))
        }
        Request::Block { professional_id, start_date, end_date, start, end, interval_minutes } => {
            let start_date = wire_date(&start_date)?;
            let end_date = wire_date(&end_date)?;
            let start = wire_time(&start)?;
            let end = wire_time(&end)?;
            let interval = interval_minutes.unwrap_or(engine.grid.slot_minutes);
            let affected = engine
                .block_slots(professional_id, start_date, end_date, start, end, interval)
                .await?;
            Ok(json!({ "affected": affected }))
        }
        Request::Release { professional_id, date, time } => {
            let date = wire_date(&date)?;
            let time = wire_time(&time)?;
            engine.release_slot(professional_id, date, time).await?;
            Ok(json!({}))
        }
        Request::Appointments { professional_id, date } => {
            let date = wire_date(&date)?;
            let appts = engine.appointments_for_day(professional_id, date).await;
            Ok(json!({
                "appointments": appts.iter().map(proto::appointment_json).collect::<Vec<_>>(),
            }))
        }
        Request::Watch { professional_id } => {
            if !watches.contains_key(&professional_id) {
                let mut rx = engine.notify.subscribe(professional_id);
                let tx = push_tx.clone();
                let handle = tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(event) => {
                                if tx.send(proto::event_json(&event).to_string()).is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
                watches.insert(professional_id, handle);
                metrics::gauge!(observability::WATCHES_ACTIVE).increment(1.0);
            }
            Ok(json!({ "watching": professional_id.to_string() }))
        }
    }
}
