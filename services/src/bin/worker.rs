//! Background worker host.
//!
//! Runs until Ctrl+C or SIGTERM, then drains its tasks within the configured
//! shutdown timeout.

use service_spine_services::bootstrap::{init_tracing, load_config};
use service_spine_web::{Cancellation, WorkerHost, shutdown_signal};
use std::time::Duration;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

async fn heartbeat(mut cancellation: Cancellation) {
    let mut ticks = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut beats = 0_u64;
    loop {
        tokio::select! {
            () = cancellation.cancelled() => break,
            _ = ticks.tick() => {
                beats += 1;
                tracing::debug!(beats, "Worker alive");
            }
        }
    }
    tracing::info!(beats, "Heartbeat stopped");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(std::env::args().skip(1))?;
    init_tracing();

    let mut worker = WorkerHost::new(config);
    worker.spawn("heartbeat", heartbeat);

    worker.run(shutdown_signal()).await?;
    tracing::info!("Worker stopped");
    Ok(())
}
