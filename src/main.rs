#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use meetsim::config::{print_usage, ArgsOutcome};
use meetsim::harness::write_results;
use meetsim::negotiation::WebRtcFactory;
use meetsim::{Harness, HarnessConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = HarnessConfig::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if config.apply_args(&args) == ArgsOutcome::Help {
        print_usage();
        return Ok(());
    }

    info!("meetsim - Starting load test");
    info!("  Server: ws://{}{}", config.server_addr, config.path);
    info!("  Meeting: {}", config.meeting_id);
    info!("  Participants: {}", config.participants);
    match config.duration {
        Some(d) => info!("  Duration: {}s", d.as_secs()),
        None => info!("  Duration: until Ctrl+C"),
    }

    let harness = Harness::new(config, Arc::new(WebRtcFactory));
    let reports = harness
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await
        .context("Load test run failed")?;

    let summary = write_results(Path::new("."), &reports).context("Failed to write results")?;
    summary.print_summary();

    info!("Load test complete");
    Ok(())
}
