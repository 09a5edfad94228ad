//! Drowsiness Monitoring Session
//!
//! Runs the frame processor over a frame source on a dedicated worker thread,
//! exports annotated frames (PNG sequence or video) and writes a JSON-lines
//! event log.

pub mod config;
pub mod export;
pub mod worker;

pub use config::SessionConfig;
pub use export::{EventLog, EventRecord, FrameExporter, VideoExporter};
pub use worker::{FrameOutcome, FrameReport, Session, SessionHandle, SessionSummary, StopHandle};

use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Dms(#[from] dms::DmsError),

    #[error(transparent)]
    Source(#[from] camera_capture::CameraError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write frame {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Video export to {} failed: {message}", path.display())]
    Video { path: PathBuf, message: String },

    #[error("Failed to encode event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session worker panicked")]
    WorkerPanicked,
}

/// Initialize logging, level from `RUST_LOG` (default `info`)
pub fn init_logging(json: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder().with_env_filter(filter).with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}
