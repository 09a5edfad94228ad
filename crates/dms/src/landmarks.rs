//! 68-point facial landmark sets and the head-pose image point cache

use crate::DmsError;
use nalgebra::Point2;
use std::ops::Range;

/// 2D point in pixel coordinates
pub type Point = Point2<f64>;

/// Points per landmark set (iBUG 300-W annotation)
pub const NUM_FACIAL_LANDMARKS: usize = 68;

/// Right eye contour (subject's right, image left)
pub const RIGHT_EYE: Range<usize> = 36..42;

/// Left eye contour
pub const LEFT_EYE: Range<usize> = 42..48;

/// Outer and inner lip contour
pub const MOUTH: Range<usize> = 48..68;

/// Landmarks feeding the pose solve: nose tip, chin, right-eye outer corner,
/// left-eye outer corner, right mouth corner, left mouth corner.
pub const POSE_LANDMARKS: [usize; 6] = [33, 8, 36, 45, 48, 54];

/// Cache contents before the first face is seen
const INITIAL_IMAGE_POINTS: [(f64, f64); 6] = [
    (359.0, 391.0),
    (399.0, 561.0),
    (337.0, 297.0),
    (513.0, 301.0),
    (345.0, 465.0),
    (453.0, 469.0),
];

/// Landmarks of one face in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    /// Wrap exactly [`NUM_FACIAL_LANDMARKS`] points
    pub fn new(points: Vec<Point>) -> Result<Self, DmsError> {
        if points.len() != NUM_FACIAL_LANDMARKS {
            return Err(DmsError::LandmarkCount {
                expected: NUM_FACIAL_LANDMARKS,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    pub fn left_eye(&self) -> &[Point] {
        &self.points[LEFT_EYE]
    }

    pub fn right_eye(&self) -> &[Point] {
        &self.points[RIGHT_EYE]
    }

    pub fn mouth(&self) -> &[Point] {
        &self.points[MOUTH]
    }
}

/// The six reference points of the pose solve, kept across frames.
///
/// Always holds six points in [`POSE_LANDMARKS`] order. When no face is seen
/// the previous values stay in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePointCache {
    points: [Point; 6],
}

impl Default for ImagePointCache {
    fn default() -> Self {
        Self {
            points: INITIAL_IMAGE_POINTS.map(|(x, y)| Point::new(x, y)),
        }
    }
}

impl ImagePointCache {
    pub fn points(&self) -> &[Point; 6] {
        &self.points
    }

    /// Overwrite all six points from the current face
    pub fn update_from(&mut self, landmarks: &LandmarkSet) {
        for (slot, &index) in self.points.iter_mut().zip(POSE_LANDMARKS.iter()) {
            *slot = landmarks.points[index];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed_set() -> LandmarkSet {
        let points = (0..NUM_FACIAL_LANDMARKS)
            .map(|i| Point::new(i as f64, 2.0 * i as f64))
            .collect();
        LandmarkSet::new(points).unwrap()
    }

    #[test]
    fn test_rejects_wrong_point_count() {
        let err = LandmarkSet::new(vec![Point::origin(); 5]).unwrap_err();
        assert!(matches!(err, DmsError::LandmarkCount { expected: 68, actual: 5 }));
    }

    #[test]
    fn test_region_slices() {
        let set = indexed_set();
        assert_eq!(set.right_eye().len(), 6);
        assert_eq!(set.right_eye()[0].x, 36.0);
        assert_eq!(set.left_eye()[0].x, 42.0);
        assert_eq!(set.left_eye()[5].x, 47.0);
        assert_eq!(set.mouth().len(), 20);
        assert_eq!(set.mouth()[0].x, 48.0);
        assert_eq!(set.mouth()[19].x, 67.0);
    }

    #[test]
    fn test_cache_update_order() {
        let mut cache = ImagePointCache::default();
        assert_eq!(cache.points()[0], Point::new(359.0, 391.0));

        cache.update_from(&indexed_set());
        let xs: Vec<f64> = cache.points().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![33.0, 8.0, 36.0, 45.0, 48.0, 54.0]);
    }
}
