//! Driver Monitoring System (DMS)
//!
//! Per-frame drowsiness analysis from facial landmarks:
//! - Face detection and 68-point landmark prediction
//! - Eye and mouth aspect ratios (eyes closed, yawning)
//! - Head pose estimation and tilt angle
//! - Debounced eyes-closed detection per face track
//! - Annotated output frames

pub mod analysis;
pub mod config;
pub mod detector;
pub mod landmarks;
pub mod metrics;
pub mod overlay;
pub mod pose;
pub mod processor;
pub mod state;

pub use analysis::{DmsAlert, FaceAnalysis, FrameEvents, ProcessedFrame};
pub use config::{DmsConfig, StateScope};
pub use detector::{FaceBbox, FaceDetector, LandmarkPredictor, OnnxFaceDetector, OnnxLandmarkPredictor};
pub use landmarks::{ImagePointCache, LandmarkSet, Point};
pub use pose::{HeadPose, HeadPoseEstimator, PoseError};
pub use processor::FrameProcessor;
pub use state::{EyeClosureDebouncer, EyeClosureState, SessionState};

use camera_capture::CameraError;
use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Frame skipped: {0}")]
    SkipFrame(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Expected {expected} landmarks, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },
}

impl DmsError {
    /// Whether the session can move on to the next frame
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DmsError::SkipFrame(_)
                | DmsError::Inference(_)
                | DmsError::LandmarkCount { .. }
        )
    }
}

impl From<CameraError> for DmsError {
    fn from(e: CameraError) -> Self {
        DmsError::SkipFrame(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(DmsError::SkipFrame("bad".into()).is_recoverable());
        assert!(DmsError::Inference("timeout".into()).is_recoverable());
        assert!(!DmsError::ModelLoad("missing".into()).is_recoverable());
        assert!(!DmsError::Config("bad".into()).is_recoverable());
    }

    #[test]
    fn test_camera_errors_skip_frame() {
        let err: DmsError = CameraError::Format("zero width".into()).into();
        assert!(matches!(err, DmsError::SkipFrame(_)));
    }
}
