mod aeternity;
mod config;
mod solana;
mod sync;

use crate::config::BridgeConfig;
use crate::sync::SyncBridge;
use std::time::Duration;
use tracing::{error, info};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with debug logging for the bridge itself
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trustlens_sync=debug".parse().unwrap())
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .init();

    info!("Starting cross-ledger escrow sync bridge");

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };
    info!(
        source_network = %config.aeternity.network,
        target_cluster = %config.solana.cluster,
        contract = config.aeternity.contract_address.as_deref().unwrap_or("<all>"),
        "Configuration loaded"
    );

    let bridge = match SyncBridge::new(config) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("Failed to build sync bridge: {e}");
            return;
        }
    };
    bridge.start();

    let mut health = tokio::time::interval(HEALTH_LOG_INTERVAL);
    health.tick().await; // first tick fires immediately
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = health.tick() => {
                let status = bridge.status();
                info!(
                    events = status.stats.total_events,
                    ok = status.stats.successful_operations,
                    failed = status.stats.failed_operations,
                    pending = status.queue.pending_count,
                    height = status.source.last_processed_height,
                    push_connected = status.source.connected,
                    push_degraded = status.source.push_degraded,
                    uptime_secs = status.stats.uptime_secs,
                    "Bridge health"
                );
            }
        }
    }

    bridge.shutdown().await;
    info!("Bridge exited cleanly");
}
