use anyhow::Result;
use async_trait::async_trait;
use helion::driver::{DriverCommand, HelionDriver};
use helion::inverter::Transport;
use helion::notify::NotificationSink;
use helion::price::TibberApi;
use helion::store::{FileStore, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Transport that writes outbound inverter commands to the log.
///
/// Integration point: replace with an adapter for the site's message
/// bus when wiring Helion into a real installation.
struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn publish(&self, topic: &str, payload: &str) -> helion::Result<()> {
        info!(topic = topic, payload = payload, "Outbound inverter command");
        Ok(())
    }
}

/// Notification sink that writes messages to the log.
struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, recipient: &str, text: &str) -> helion::Result<()> {
        info!(recipient = recipient, "Notification: {}", text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = helion::Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    helion::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Helion battery charging controller starting up");

    let store: Arc<dyn Store> = Arc::new(FileStore::new(&config.persistence.data_dir));
    let tibber =
        TibberApi::new().map_err(|e| anyhow::anyhow!("Failed to create price client: {}", e))?;

    // Telemetry ingress; a bus adapter feeds this channel
    let (_telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<DriverCommand>();

    let mut driver = HelionDriver::new(
        config,
        Some(store),
        Arc::new(tibber),
        Arc::new(LogTransport),
        Arc::new(LogSink),
        telemetry_rx,
        cmd_rx,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create driver: {}", e))?;

    driver.initialize().await;

    tokio::select! {
        result = driver.run() => {
            if let Err(e) = result {
                error!("Driver failed with error: {}", e);
                return Err(anyhow::anyhow!("Driver error: {}", e));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
    }

    Ok(())
}
