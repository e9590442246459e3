//! Relay daemon entrypoint.

use std::sync::Arc;

use nostr_relay_engine::admin::AdminService;
use nostr_relay_engine::{serve, RelayBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let admin = Arc::new(AdminService::new());
    let config = RelayBuilder::new()
        .port(std::env::var("RELAY_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080))
        .build(admin.clone());

    let relay = Arc::new(nostr_relay_engine::Relay::new(config, admin));
    let handle = serve(relay).await?;
    tracing::info!(addr = %handle.local_addr, "relay listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.stop();

    Ok(())
}
