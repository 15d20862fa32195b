//! HTTP server hosting every domain service.
//!
//! ```text
//! spine-server [config.toml]
//! ```

use service_spine_services::bootstrap::{init_tracing, load_config};
use service_spine_services::{CacheService, Context, MigrationService, ObservabilityService, WebhookService};
use service_spine_web::{ServiceHost, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(std::env::args().skip(1))?;
    init_tracing();

    let ctx = Context::system(config.clone());
    let host = ServiceHost::new(config, ctx.clock.clone())
        .mount(CacheService::in_memory(&ctx))
        .mount(ObservabilityService::in_memory(&ctx))
        .mount(WebhookService::in_memory(&ctx))
        .mount(MigrationService::in_memory(&ctx));

    host.run(shutdown_signal()).await?;
    tracing::info!("Server stopped");
    Ok(())
}
