//! Per-frame drowsiness pipeline

use crate::analysis::{FaceAnalysis, FrameEvents, ProcessedFrame};
use crate::detector::{FaceDetector, LandmarkPredictor, OnnxFaceDetector, OnnxLandmarkPredictor};
use crate::metrics::{average_ear, eye_aspect_ratio, mouth_aspect_ratio};
use crate::overlay;
use crate::pose::HeadPoseEstimator;
use crate::state::SessionState;
use crate::{DmsConfig, DmsError};
use camera_capture::frame::VideoFrame;
use image::RgbImage;
use tracing::{debug, warn};

/// Runs detection, metrics, debounce, pose and overlay for one frame at a time
pub struct FrameProcessor<D, L> {
    config: DmsConfig,
    detector: D,
    predictor: L,
    pose: HeadPoseEstimator,
}

impl FrameProcessor<OnnxFaceDetector, OnnxLandmarkPredictor> {
    /// Load both ONNX models named in the config
    pub fn from_config(config: DmsConfig) -> Result<Self, DmsError> {
        config.validate()?;
        let detector = OnnxFaceDetector::new(&config)?;
        let predictor = OnnxLandmarkPredictor::new(&config)?;
        Self::new(config, detector, predictor)
    }
}

impl<D: FaceDetector, L: LandmarkPredictor> FrameProcessor<D, L> {
    pub fn new(config: DmsConfig, detector: D, predictor: L) -> Result<Self, DmsError> {
        config.validate()?;
        let pose = HeadPoseEstimator::new(config.reference_frame_height, config.max_reprojection_error);
        Ok(Self {
            config,
            detector,
            predictor,
            pose,
        })
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    /// Canonical 8-bit RGB raster at the configured size
    pub fn normalize(&self, frame: &VideoFrame) -> Result<RgbImage, DmsError> {
        Ok(frame.normalize(self.config.frame_width, self.config.frame_height)?)
    }

    /// Analyse one frame and advance `state`
    pub fn process(&mut self, frame: &VideoFrame, state: &mut SessionState) -> Result<ProcessedFrame, DmsError> {
        let image = self.normalize(frame)?;

        let faces = self.detector.detect(&image).map_err(|e| {
            warn!("Face detection failed on frame {}: {}", frame.sequence, e);
            DmsError::SkipFrame(format!("face detection failed: {e}"))
        })?;

        let scope = self.config.state_scope;
        let track_indices = state.assign(&faces, scope, self.config.track_min_iou);
        let size = (image.height(), image.width());

        let mut canvas = image.clone();
        if self.config.draw_overlay {
            overlay::draw_face_count(&mut canvas, faces.len());
        }

        let mut events = FrameEvents::default();
        let mut analyses = Vec::with_capacity(faces.len());
        let mut seen = Vec::with_capacity(faces.len());

        for (bbox, &track_index) in faces.iter().zip(track_indices.iter()) {
            seen.push(track_index);

            let landmarks = match self.predictor.predict(&image, bbox) {
                Ok(landmarks) => landmarks,
                Err(e) => {
                    warn!("Landmark prediction failed, skipping face: {}", e);
                    continue;
                }
            };
            let Some(track) = state.track_mut(track_index) else {
                continue;
            };

            let left_ear = eye_aspect_ratio(landmarks.left_eye());
            let right_ear = eye_aspect_ratio(landmarks.right_eye());
            let ear = average_ear(left_ear, right_ear);
            let eyes_closed = track.debouncer.update(
                ear,
                self.config.ear_threshold,
                self.config.eye_closed_consec_frames,
            );
            let eye_state = track.debouncer.state(self.config.eye_closed_consec_frames);

            let mar = mouth_aspect_ratio(landmarks.mouth());
            let yawning = mar.is_some_and(|m| m > self.config.mar_threshold);

            track.image_points.update_from(&landmarks);
            let image_points = *track.image_points.points();
            let track_id = track.id;

            let pose = match self.pose.estimate(size, &image_points) {
                Ok(pose) => Some(pose),
                Err(e) => {
                    debug!("No head pose for track {}: {}", track_id, e);
                    None
                }
            };
            let head_tilt_degrees = pose.as_ref().and_then(|p| p.tilt_degrees);

            events.eyes_closed |= eyes_closed;
            events.yawning |= yawning;
            if head_tilt_degrees.is_some() {
                events.head_tilt_degrees = head_tilt_degrees;
            }

            let analysis = FaceAnalysis {
                track_id,
                bbox: bbox.clone(),
                left_ear,
                right_ear,
                ear,
                mar,
                eye_state,
                eyes_closed,
                yawning,
                head_tilt_degrees,
            };
            if self.config.draw_overlay {
                let guide = pose.as_ref().and_then(|p| p.guide.as_ref());
                overlay::draw_face(&mut canvas, &analysis, &landmarks, &image_points, guide);
            }
            analyses.push(analysis);
        }

        state.finish_frame(&seen, scope, self.config.track_max_missed);

        Ok(ProcessedFrame {
            frame: canvas,
            events,
            faces: analyses,
        })
    }
}
