//! Frame capture for the drowsiness monitor
//!
//! Provides the raw frame type handed to the analysis pipeline:
//! - Frames of any channel count (gray, RGB, RGBA) and depth (u8, u16, f32)
//! - Deterministic normalization to the canonical 8-bit RGB raster
//! - Frame sources: image sequences, video files and (with the `camera`
//!   feature) live cameras

#[cfg(feature = "camera")]
pub mod camera;
pub mod frame;
pub mod source;
pub mod video;

#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use frame::{PixelData, PixelDepth, VideoFrame};
pub use source::{open_source, FrameSource, ImageSequenceSource};
pub use video::VideoFileSource;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Capture error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open frame source: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl From<opencv::Error> for CameraError {
    fn from(e: opencv::Error) -> Self {
        CameraError::Capture(e.to_string())
    }
}

/// Where frames come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Directory of still images
    #[default]
    Images,
    /// Video file decoded through OpenCV
    Video,
    /// Live camera
    Camera,
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Directory of still frames
    pub input_dir: PathBuf,
    /// Video file for [`SourceKind::Video`]
    pub video_path: Option<PathBuf>,
    /// Device index for [`SourceKind::Camera`]
    pub camera_index: u32,
    /// Nominal frame rate used to timestamp still frames
    pub fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Images,
            input_dir: PathBuf::from("frames"),
            video_path: None,
            camera_index: 0,
            fps: 30,
        }
    }
}
