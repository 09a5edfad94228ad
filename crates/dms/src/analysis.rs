//! Per-frame analysis results and alerts

use crate::detector::FaceBbox;
use crate::state::EyeClosureState;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// DMS alert types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmsAlert {
    /// Eyes closed for the configured number of consecutive frames
    EyesClosed,

    /// Mouth opened past the yawning threshold
    Yawning,
}

/// Frame-level event flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameEvents {
    /// Any face raised eyes-closed
    pub eyes_closed: bool,

    /// Any face raised yawning
    pub yawning: bool,

    /// Tilt of the last face with a pose
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_tilt_degrees: Option<f64>,
}

impl FrameEvents {
    pub fn alerts(&self) -> Vec<DmsAlert> {
        let mut alerts = Vec::new();
        if self.eyes_closed {
            alerts.push(DmsAlert::EyesClosed);
        }
        if self.yawning {
            alerts.push(DmsAlert::Yawning);
        }
        alerts
    }

    /// Check if any alerts are active
    pub fn has_alerts(&self) -> bool {
        self.eyes_closed || self.yawning
    }
}

/// Analysis of one face in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    pub track_id: u64,
    pub bbox: FaceBbox,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_ear: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_ear: Option<f64>,
    /// Mean of both eyes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ear: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mar: Option<f64>,

    pub eye_state: EyeClosureState,
    pub eyes_closed: bool,
    pub yawning: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_tilt_degrees: Option<f64>,
}

/// Output of one processor call
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Canonical frame with the overlay drawn on it
    pub frame: RgbImage,
    pub events: FrameEvents,
    pub faces: Vec<FaceAnalysis>,
}

impl ProcessedFrame {
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerts_follow_flags() {
        let quiet = FrameEvents::default();
        assert!(!quiet.has_alerts());
        assert!(quiet.alerts().is_empty());

        let events = FrameEvents {
            eyes_closed: true,
            yawning: true,
            head_tilt_degrees: Some(3.0),
        };
        assert!(events.has_alerts());
        assert_eq!(events.alerts(), vec![DmsAlert::EyesClosed, DmsAlert::Yawning]);
    }

    #[test]
    fn test_events_serialize_without_missing_tilt() {
        let json = serde_json::to_string(&FrameEvents::default()).unwrap();
        assert_eq!(json, r#"{"eyes_closed":false,"yawning":false}"#);
    }
}
