use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use booked::catalog::{OpenDirectory, StaticCatalog};
use booked::engine::{Engine, EngineError, NewBooking};
use booked::model::{parse_date, parse_hm, SlotGrid};
use booked::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn bench_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("booked_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(
        Engine::new(
            dir.join("bench.wal"),
            Arc::new(NotifyHub::new()),
            SlotGrid::default(),
            Arc::new(StaticCatalog::empty()),
            Arc::new(OpenDirectory),
        )
        .unwrap(),
    )
}

fn booking(professional: Ulid, date: NaiveDate) -> NewBooking {
    NewBooking {
        client_id: Ulid::new(),
        professional_id: professional,
        service_id: None,
        date,
        notes: None,
    }
}

async fn phase1_sequential(engine: &Arc<Engine>) {
    let date = parse_date("2025-06-10").unwrap();
    let time = parse_hm("10:00").unwrap();
    let mut latencies = Vec::new();

    for _ in 0..1000 {
        let professional = Ulid::new();
        let start = Instant::now();
        engine
            .create_booking(booking(professional, date), time)
            .await
            .unwrap();
        latencies.push(start.elapsed());
    }

    print_latency("sequential bookings (distinct professionals)", &mut latencies);
}

async fn phase2_contended_slot(engine: &Arc<Engine>) {
    let date = parse_date("2025-06-10").unwrap();
    let time = parse_hm("10:00").unwrap();
    let professional = Ulid::new();
    let tasks = 256;

    let mut handles = Vec::new();
    for _ in 0..tasks {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let start = Instant::now();
            let result = eng.create_booking(booking(professional, date), time).await;
            (start.elapsed(), result)
        }));
    }

    let mut latencies = Vec::new();
    let mut wins = 0usize;
    let mut conflicts = 0usize;
    for h in handles {
        let (elapsed, result) = h.await.unwrap();
        latencies.push(elapsed);
        match result {
            Ok(_) => wins += 1,
            Err(EngineError::BookingConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error under contention: {e}"),
        }
    }

    assert_eq!(wins, 1, "exactly one booking must win the slot");
    println!("  contended slot: {tasks} tasks -> {wins} win, {conflicts} conflicts");
    print_latency("contended bookings (single slot)", &mut latencies);
}

async fn phase3_parallel_days(engine: &Arc<Engine>) {
    let date = parse_date("2025-06-10").unwrap();
    let professionals: Vec<Ulid> = (0..64).map(|_| Ulid::new()).collect();
    let grid = SlotGrid::default();

    let started = Instant::now();
    let mut handles = Vec::new();
    for &professional in &professionals {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut t = grid.open;
            while t < grid.close {
                eng.create_booking(booking(professional, date), t)
                    .await
                    .unwrap();
                t += grid.slot_minutes;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = started.elapsed();
    let total = professionals.len() * 16;
    println!(
        "  parallel fill: {total} bookings across {} calendars in {:.2}s ({:.0} bookings/s)",
        professionals.len(),
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64(),
    );
}

#[tokio::main]
async fn main() {
    println!("booked stress bench");

    let engine = bench_engine();

    println!("phase 1: sequential latency");
    phase1_sequential(&engine).await;

    println!("phase 2: slot contention");
    phase2_contended_slot(&engine).await;

    println!("phase 3: parallel calendar fill");
    phase3_parallel_days(&engine).await;
}
