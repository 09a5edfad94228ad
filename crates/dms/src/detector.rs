//! Face detection and landmark models

use crate::landmarks::{LandmarkSet, Point, NUM_FACIAL_LANDMARKS};
use crate::{DmsConfig, DmsError};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array4, ArrayViewD, Ix3};
use ort::{GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// UltraFace input size
const DETECTOR_WIDTH: u32 = 320;
const DETECTOR_HEIGHT: u32 = 240;

/// Face bounding box in frame pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBbox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBbox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &FaceBbox) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// Greedy non-maximum suppression, highest confidence first
pub fn nms(mut boxes: Vec<FaceBbox>, iou_threshold: f32) -> Vec<FaceBbox> {
    boxes.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<FaceBbox> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..boxes.len() {
            if boxes[i].iou(&boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
        kept.push(boxes[i].clone());
    }

    kept
}

/// Locates faces in a canonical frame
pub trait FaceDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBbox>, DmsError>;
}

/// Predicts the 68 landmarks of one face
pub trait LandmarkPredictor {
    fn predict(&mut self, frame: &RgbImage, face: &FaceBbox) -> Result<LandmarkSet, DmsError>;
}

/// Build an ONNX Runtime session, failing with `ModelLoad`
pub fn load_session(path: &str) -> Result<Session, DmsError> {
    info!("Loading model from {}", path);
    Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| {
            error!("Failed to load model {}: {}", path, e);
            DmsError::ModelLoad(format!("{path}: {e}"))
        })
}

/// UltraFace (RFB-320) face detector
pub struct OnnxFaceDetector {
    session: Session,
    confidence_threshold: f32,
    nms_iou: f32,
}

impl OnnxFaceDetector {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        let path = config
            .face_model_path
            .as_deref()
            .ok_or_else(|| DmsError::ModelLoad("face_model_path is not configured".into()))?;

        Ok(Self {
            session: load_session(path)?,
            confidence_threshold: config.face_confidence,
            nms_iou: config.nms_iou,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBbox>, DmsError> {
        // 1. Preprocess: resize to 320x240, (p - 127) / 128
        let resized = imageops::resize(frame, DETECTOR_WIDTH, DETECTOR_HEIGHT, FilterType::Triangle);
        let mut input = Array4::<f32>::zeros((1, 3, DETECTOR_HEIGHT as usize, DETECTOR_WIDTH as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (f32::from(pixel[c]) - 127.0) / 128.0;
            }
        }

        // 2. Inference
        let outputs = self
            .session
            .run(ort::inputs![input].map_err(|e| DmsError::Inference(e.to_string()))?)
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        let scores = outputs["scores"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;
        let boxes = outputs["boxes"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        // 3. Decode and suppress overlaps
        let candidates = decode_ultraface(
            scores.view(),
            boxes.view(),
            frame.width(),
            frame.height(),
            self.confidence_threshold,
        )?;
        let faces = nms(candidates, self.nms_iou);
        debug!("Detected {} faces", faces.len());
        Ok(faces)
    }
}

/// Turn UltraFace `scores [1,N,2]` and `boxes [1,N,4]` into frame boxes
fn decode_ultraface(
    scores: ArrayViewD<'_, f32>,
    boxes: ArrayViewD<'_, f32>,
    width: u32,
    height: u32,
    threshold: f32,
) -> Result<Vec<FaceBbox>, DmsError> {
    let scores = scores
        .into_dimensionality::<Ix3>()
        .map_err(|e| DmsError::Inference(format!("scores: {e}")))?;
    let boxes = boxes
        .into_dimensionality::<Ix3>()
        .map_err(|e| DmsError::Inference(format!("boxes: {e}")))?;

    let (s, b) = (scores.shape(), boxes.shape());
    if s[2] != 2 || b[2] != 4 || s[1] != b[1] || s[0] == 0 || b[0] == 0 {
        return Err(DmsError::Inference(format!(
            "unexpected detector output shapes {s:?} / {b:?}"
        )));
    }

    let (w, h) = (width as f32, height as f32);
    let mut faces = Vec::new();
    for i in 0..s[1] {
        let confidence = scores[[0, i, 1]];
        if confidence < threshold {
            continue;
        }
        let x1 = boxes[[0, i, 0]].clamp(0.0, 1.0) * w;
        let y1 = boxes[[0, i, 1]].clamp(0.0, 1.0) * h;
        let x2 = boxes[[0, i, 2]].clamp(0.0, 1.0) * w;
        let y2 = boxes[[0, i, 3]].clamp(0.0, 1.0) * h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        faces.push(FaceBbox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }
    Ok(faces)
}

/// Square region of the frame fed to the landmark model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropRegion {
    x: u32,
    y: u32,
    side: u32,
}

/// Square around the face centre, shifted to stay inside the frame
fn square_crop(face: &FaceBbox, width: u32, height: u32) -> Result<CropRegion, DmsError> {
    let side = face.width.max(face.height).round().min(width.min(height) as f32);
    if !side.is_finite() || side < 1.0 {
        return Err(DmsError::Inference("empty face crop".into()));
    }
    let side = side as u32;

    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;
    let max_x = (width - side) as f32;
    let max_y = (height - side) as f32;
    Ok(CropRegion {
        x: (cx - side as f32 / 2.0).clamp(0.0, max_x) as u32,
        y: (cy - side as f32 / 2.0).clamp(0.0, max_y) as u32,
        side,
    })
}

/// Map 136 crop-normalized values back to frame pixels
fn decode_landmarks(values: &[f32], crop: CropRegion) -> Result<LandmarkSet, DmsError> {
    if values.len() != 2 * NUM_FACIAL_LANDMARKS {
        return Err(DmsError::LandmarkCount {
            expected: NUM_FACIAL_LANDMARKS,
            actual: values.len() / 2,
        });
    }
    let side = f64::from(crop.side);
    let points = values
        .chunks_exact(2)
        .map(|xy| {
            Point::new(
                f64::from(crop.x) + f64::from(xy[0]) * side,
                f64::from(crop.y) + f64::from(xy[1]) * side,
            )
        })
        .collect();
    LandmarkSet::new(points)
}

/// 68-point landmark regressor on a square face crop
pub struct OnnxLandmarkPredictor {
    session: Session,
    input_size: u32,
}

impl OnnxLandmarkPredictor {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        let path = config
            .landmark_model_path
            .as_deref()
            .ok_or_else(|| DmsError::ModelLoad("landmark_model_path is not configured".into()))?;

        Ok(Self {
            session: load_session(path)?,
            input_size: config.landmark_input_size,
        })
    }
}

impl LandmarkPredictor for OnnxLandmarkPredictor {
    fn predict(&mut self, frame: &RgbImage, face: &FaceBbox) -> Result<LandmarkSet, DmsError> {
        let crop = square_crop(face, frame.width(), frame.height())?;
        let patch = imageops::crop_imm(frame, crop.x, crop.y, crop.side, crop.side).to_image();
        let size = self.input_size;
        let resized = imageops::resize(&patch, size, size, FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
            }
        }

        let outputs = self
            .session
            .run(ort::inputs![input].map_err(|e| DmsError::Inference(e.to_string()))?)
            .map_err(|e| DmsError::Inference(e.to_string()))?;
        let values: Vec<f32> = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?
            .iter()
            .copied()
            .collect();

        decode_landmarks(&values, crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn bbox(x: f32, y: f32, size: f32, confidence: f32) -> FaceBbox {
        FaceBbox {
            x,
            y,
            width: size,
            height: size,
            confidence,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 1.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&bbox(20.0, 20.0, 10.0, 1.0)), 0.0);
        let half = a.iou(&bbox(5.0, 0.0, 10.0, 1.0));
        assert!((half - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            vec![
                bbox(0.0, 0.0, 100.0, 0.8),
                bbox(5.0, 5.0, 100.0, 0.95),
                bbox(300.0, 300.0, 100.0, 0.75),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].x, 300.0);
    }

    #[test]
    fn test_decode_ultraface_thresholds_and_scales() {
        let scores = Array3::from_shape_vec((1, 2, 2), vec![0.1, 0.9, 0.8, 0.2]).unwrap();
        let boxes =
            Array3::from_shape_vec((1, 2, 4), vec![0.25, 0.5, 0.5, 1.0, 0.0, 0.0, 0.1, 0.1]).unwrap();

        let faces = decode_ultraface(scores.view().into_dyn(), boxes.view().into_dyn(), 800, 600, 0.7).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].x, 200.0);
        assert_eq!(faces[0].y, 300.0);
        assert_eq!(faces[0].width, 200.0);
        assert_eq!(faces[0].height, 300.0);
    }

    #[test]
    fn test_decode_ultraface_rejects_bad_shape() {
        let scores = Array3::<f32>::zeros((1, 3, 2));
        let boxes = Array3::<f32>::zeros((1, 2, 4));
        let result = decode_ultraface(scores.view().into_dyn(), boxes.view().into_dyn(), 800, 600, 0.7);
        assert!(matches!(result, Err(DmsError::Inference(_))));
    }

    #[test]
    fn test_square_crop_stays_inside_frame() {
        let crop = square_crop(&bbox(750.0, 550.0, 100.0, 1.0), 800, 600).unwrap();
        assert_eq!(crop, CropRegion { x: 700, y: 500, side: 100 });

        let crop = square_crop(&FaceBbox { x: 100.0, y: 100.0, width: 80.0, height: 120.0, confidence: 1.0 }, 800, 600).unwrap();
        assert_eq!(crop, CropRegion { x: 80, y: 100, side: 120 });

        assert!(square_crop(&bbox(0.0, 0.0, 0.0, 1.0), 800, 600).is_err());
    }

    #[test]
    fn test_decode_landmarks_maps_to_frame() {
        let mut values = vec![0.5f32; 136];
        values[0] = 0.0;
        values[1] = 1.0;
        let set = decode_landmarks(&values, CropRegion { x: 100, y: 50, side: 200 }).unwrap();
        assert_eq!(set.points()[0], Point::new(100.0, 250.0));
        assert_eq!(set.points()[1], Point::new(200.0, 150.0));

        let err = decode_landmarks(&values[..10], CropRegion { x: 0, y: 0, side: 10 }).unwrap_err();
        assert!(matches!(err, DmsError::LandmarkCount { expected: 68, actual: 5 }));
    }

    #[test]
    fn test_missing_model_path_is_load_error() {
        let config = DmsConfig::default();
        assert!(matches!(OnnxFaceDetector::new(&config), Err(DmsError::ModelLoad(_))));
        assert!(matches!(OnnxLandmarkPredictor::new(&config), Err(DmsError::ModelLoad(_))));
    }
}
