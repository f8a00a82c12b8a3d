use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use booked::catalog::{OpenDirectory, ProfessionalDirectory, RosterDirectory, StaticCatalog};
use booked::engine::Engine;
use booked::model::{parse_hm, SlotGrid};
use booked::notify::NotifyHub;
use booked::{reaper, wire};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("BOOKED_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    booked::observability::init(metrics_port);

    let port = env_or("BOOKED_PORT", "7450");
    let bind = env_or("BOOKED_BIND", "0.0.0.0");
    let data_dir = env_or("BOOKED_DATA_DIR", "./data");
    let max_connections: usize = std::env::var("BOOKED_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);
    let compact_threshold: u64 = std::env::var("BOOKED_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let open = parse_hm(&env_or("BOOKED_OPEN", "09:00"))
        .ok_or("BOOKED_OPEN must be HH:MM")?;
    let close = parse_hm(&env_or("BOOKED_CLOSE", "17:00"))
        .ok_or("BOOKED_CLOSE must be HH:MM")?;
    let slot_minutes: u32 = env_or("BOOKED_SLOT_MINUTES", "30")
        .parse()
        .map_err(|_| "BOOKED_SLOT_MINUTES must be a number")?;
    let grid = SlotGrid::new(open, close, slot_minutes)
        .ok_or("invalid booking grid: BOOKED_OPEN/BOOKED_CLOSE/BOOKED_SLOT_MINUTES")?;

    let catalog = match std::env::var("BOOKED_CATALOG") {
        Ok(path) => Arc::new(StaticCatalog::load(PathBuf::from(path).as_path())?),
        Err(_) => Arc::new(StaticCatalog::empty()),
    };
    let directory: Arc<dyn ProfessionalDirectory> = match std::env::var("BOOKED_ROSTER") {
        Ok(path) => Arc::new(RosterDirectory::load(PathBuf::from(path).as_path())?),
        Err(_) => Arc::new(OpenDirectory),
    };

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("booked.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal_path, notify, grid, catalog, directory)?);

    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        reaper::run_compactor(compactor_engine, compact_threshold).await;
    });

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("booked listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  grid: {}-{} every {}min", env_or("BOOKED_OPEN", "09:00"), env_or("BOOKED_CLOSE", "17:00"), slot_minutes);
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(booked::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(booked::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(booked::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let eng = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, eng).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(booked::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("booked stopped");
    Ok(())
}
