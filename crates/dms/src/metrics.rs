//! Eye and mouth aspect ratios

use crate::landmarks::Point;
use nalgebra::distance;

/// Eye Aspect Ratio from the six contour points of one eye.
///
/// `(|p1 - p5| + |p2 - p4|) / (2 |p0 - p3|)`. Roughly 0.3 for an open eye
/// and close to 0 for a closed one. `None` for degenerate input.
pub fn eye_aspect_ratio(eye: &[Point]) -> Option<f64> {
    if eye.len() != 6 {
        return None;
    }
    aspect_ratio((eye[1], eye[5]), (eye[2], eye[4]), (eye[0], eye[3]))
}

/// Mouth Aspect Ratio from the 20-point mouth slice (landmarks 48..68).
///
/// Vertical openings 50-58 and 52-56 over the corner-to-corner width 48-54.
pub fn mouth_aspect_ratio(mouth: &[Point]) -> Option<f64> {
    if mouth.len() != 20 {
        return None;
    }
    aspect_ratio((mouth[2], mouth[10]), (mouth[4], mouth[8]), (mouth[0], mouth[6]))
}

/// Mean of both eyes, or the single defined eye
pub fn average_ear(left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match (left, right) {
        (Some(l), Some(r)) => Some((l + r) / 2.0),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

fn aspect_ratio(a: (Point, Point), b: (Point, Point), width: (Point, Point)) -> Option<f64> {
    let horizontal = distance(&width.0, &width.1);
    if !horizontal.is_finite() || horizontal <= f64::EPSILON {
        return None;
    }
    let ratio = (distance(&a.0, &a.1) + distance(&b.0, &b.1)) / (2.0 * horizontal);
    ratio.is_finite().then_some(ratio)
}
