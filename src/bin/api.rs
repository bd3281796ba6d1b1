use finance_assistant_core::{agent::Assistant, api::start_server, config::AssistantConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AssistantConfig::from_env()?;

    info!("🚀 Finance Assistant Core - API Server");
    info!("📍 Port: {}", config.port);

    let assistant = Arc::new(Assistant::from_config(&config)?);

    info!("✅ Assistant initialized");

    // Proposals left unconfirmed past the window are expired in the background
    let sweeper = assistant.clone();
    let sweep_every = config.expiry_sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            match sweeper.actions().expire_stale().await {
                Ok(0) => {}
                Ok(n) => info!(swept = n, "Swept stale actions"),
                Err(e) => error!(error = %e, "Expiry sweep failed"),
            }
        }
    });

    info!("📡 Starting API server...");

    start_server(assistant, config.port).await?;

    Ok(())
}
