//! Drowsiness Monitor - Main Entry Point
//!
//! Usage: `drowsiness-monitor [config.toml]`

use anyhow::Context;
use camera_capture::open_source;
use dms::FrameProcessor;
use session::{init_logging, FrameOutcome, Session, SessionConfig};
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SessionConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(config.log_json).context("initializing logging")?;

    info!("=== Drowsiness Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let source_config = config.source.clone();
    info!("Reading frames from {:?} source", source_config.kind);

    let mut handle = Session::spawn(
        config,
        move || open_source(&source_config),
        |dms_config| FrameProcessor::from_config(dms_config.clone()),
    );

    let stop = handle.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current frame");
            stop.stop();
        }
    });

    while let Some(report) = handle.next_report().await {
        if let FrameOutcome::Processed { events, .. } = &report.outcome {
            if events.has_alerts() {
                warn!("Frame {}: {:?}", report.index, events.alerts());
            }
        }
    }

    let summary = handle.join().context("session failed")?;
    info!(
        "Done: {} frames read, {} processed, {} skipped, {} export failures",
        summary.frames_read, summary.frames_processed, summary.frames_skipped, summary.frames_export_failed
    );

    Ok(())
}
