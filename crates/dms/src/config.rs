//! Drowsiness detection configuration

use crate::overlay::CANONICAL_SIZE;
use crate::DmsError;
use serde::{Deserialize, Serialize};

/// How detection state is scoped across faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    /// Each face track owns its counter and image points
    #[default]
    PerFace,
    /// One slot for every face, the last processed face wins
    Shared,
}

/// DMS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Eye aspect ratio below which an eye counts as closed
    pub ear_threshold: f64,

    /// Mouth aspect ratio above which the driver is yawning
    pub mar_threshold: f64,

    /// Consecutive closed frames before eyes-closed is raised
    pub eye_closed_consec_frames: u32,

    /// Canonical frame size; the overlay layout only supports 800x600
    pub frame_width: u32,
    pub frame_height: u32,

    /// Height used for the vertical guide line endpoint
    pub reference_frame_height: u32,

    /// Largest accepted PnP reprojection RMS (pixels)
    pub max_reprojection_error: f64,

    pub state_scope: StateScope,

    /// Minimum IoU to continue a face track
    pub track_min_iou: f32,

    /// Frames a track survives without a detection
    pub track_max_missed: u32,

    /// Face detection confidence threshold
    pub face_confidence: f32,

    /// Non-maximum suppression IoU for face boxes
    pub nms_iou: f32,

    /// Model paths
    pub face_model_path: Option<String>,
    pub landmark_model_path: Option<String>,

    /// Side of the square landmark model input
    pub landmark_input_size: u32,

    pub draw_overlay: bool,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            mar_threshold: 0.79,
            eye_closed_consec_frames: 3,
            frame_width: 800,
            frame_height: 600,
            reference_frame_height: 576,
            max_reprojection_error: 40.0,
            state_scope: StateScope::PerFace,
            track_min_iou: 0.3,
            track_max_missed: 30,
            face_confidence: 0.7,
            nms_iou: 0.3,
            face_model_path: None,
            landmark_model_path: None,
            landmark_input_size: 112,
            draw_overlay: true,
        }
    }
}

impl DmsConfig {
    /// Create strict config (flags earlier)
    pub fn strict() -> Self {
        Self {
            ear_threshold: 0.27,
            mar_threshold: 0.65,
            eye_closed_consec_frames: 2,
            ..Default::default()
        }
    }

    /// Create lenient config (flags later)
    pub fn lenient() -> Self {
        Self {
            ear_threshold: 0.21,
            mar_threshold: 0.9,
            eye_closed_consec_frames: 6,
            ..Default::default()
        }
    }

    /// Single shared state slot, as in the first desktop release
    pub fn legacy() -> Self {
        Self {
            state_scope: StateScope::Shared,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DmsError> {
        if (self.frame_width, self.frame_height) != CANONICAL_SIZE {
            return Err(DmsError::Config(format!(
                "frame size {}x{} is not supported, the overlay is laid out for {}x{}",
                self.frame_width, self.frame_height, CANONICAL_SIZE.0, CANONICAL_SIZE.1
            )));
        }
        if !(self.ear_threshold.is_finite() && self.ear_threshold > 0.0) {
            return Err(DmsError::Config(format!("invalid ear_threshold {}", self.ear_threshold)));
        }
        if !(self.mar_threshold.is_finite() && self.mar_threshold > 0.0) {
            return Err(DmsError::Config(format!("invalid mar_threshold {}", self.mar_threshold)));
        }
        if self.eye_closed_consec_frames == 0 {
            return Err(DmsError::Config("eye_closed_consec_frames must be at least 1".into()));
        }
        if !(self.max_reprojection_error > 0.0) {
            return Err(DmsError::Config("max_reprojection_error must be positive".into()));
        }
        for (name, value) in [
            ("track_min_iou", self.track_min_iou),
            ("face_confidence", self.face_confidence),
            ("nms_iou", self.nms_iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DmsError::Config(format!("{name} must be within 0..=1, got {value}")));
            }
        }
        if self.landmark_input_size == 0 {
            return Err(DmsError::Config("landmark_input_size must be non-zero".into()));
        }
        Ok(())
    }
}
