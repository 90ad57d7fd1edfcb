//! Catalyst price monitor entry point
//!
//! 1. Loads configuration (`CONFIG_PATH`, default `config.yaml`)
//! 2. Connects to the market-data feed
//! 3. Loads catalyst rules and subscribes the watchlist
//! 4. Logs every alert until Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use catalyst_monitor::config::{self, constants};
use catalyst_monitor::core::{
    AlertEvent, CatalystSource, ListenerResult, PriceMonitor, YamlCatalystSource,
};
use catalyst_monitor::feed::WsFeedTransport;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    config::init_logging();

    let config_path =
        PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string()));
    info!(path = %config_path.display(), "Loading configuration");
    let config = config::load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    constants::log_configuration();

    let transport = WsFeedTransport::new(config.ws_feed_config());
    let source = config
        .catalysts
        .rules_file
        .as_ref()
        .map(|path| Arc::new(YamlCatalystSource::new(path)) as Arc<dyn CatalystSource>);
    if source.is_none() {
        warn!("No catalysts.rules_file configured, only watchlist prices will be tracked");
    }

    let monitor = PriceMonitor::new(config.monitor_config(), Box::new(transport), source);

    monitor.on_alert(|alert: &AlertEvent| -> ListenerResult {
        info!(
            ticker = %alert.ticker,
            catalyst_id = %alert.catalyst_id,
            title = %alert.catalyst_title,
            price_before = %alert.price_before,
            price_after = %alert.price_after,
            move_since_price = %alert.move_since_price,
            "[ALERT] price moved past catalyst tolerance"
        );
        Ok(())
    });

    let mut status_changes = monitor.status_changes();
    tokio::spawn(async move {
        loop {
            match status_changes.recv().await {
                Ok(change) => info!(
                    from = %change.from,
                    to = %change.to,
                    reason = %change.reason,
                    "[FEED] status changed"
                ),
                Err(RecvError::Lagged(n)) => warn!(missed = n, "[FEED] status log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    monitor.start().await.context("failed to start monitor")?;

    if !config.watchlist.is_empty() {
        monitor
            .subscribe_to_symbols(&config.watchlist)
            .context("failed to subscribe watchlist")?;
    }
    info!(symbols = ?monitor.active_symbols(), "Monitor running. Press Ctrl+C to stop.");

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C signal: {}", e);
    }
    info!("[SHUTDOWN] Graceful shutdown initiated");

    monitor.stop().await.context("failed to stop monitor")?;
    info!(
        delivered = monitor.recent_alerts(None).len(),
        "[SHUTDOWN] Clean exit"
    );
    Ok(())
}
