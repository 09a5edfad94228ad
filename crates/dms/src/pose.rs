//! Head pose estimation from the six-point image cache
//!
//! The six cached image points are matched against a generic 3D face model
//! (millimetres, nose tip at the origin) and solved with OpenCV's iterative
//! PnP. The camera is modelled with focal length equal to the image width,
//! principal point at the image centre and no lens distortion.

use crate::landmarks::Point;
use nalgebra::{distance, Matrix3, Point2, Point3, Rotation3, Vector3};
use opencv::{
    calib3d,
    core::{Mat, Point2d, Point3d, Vec3d, Vector},
    prelude::*,
};
use serde::Serialize;
use std::f64::consts::PI;
use thiserror::Error;
use tracing::trace;

/// Canonical face model matching [`crate::landmarks::POSE_LANDMARKS`]
const MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [0.0, -330.0, -65.0],
    [-225.0, 170.0, -135.0],
    [225.0, 170.0, -135.0],
    [-150.0, -150.0, -125.0],
    [150.0, -150.0, -125.0],
];

/// Model-space point in front of the nose used for the guide line
const STRAIGHT_AHEAD: [f64; 3] = [0.0, 0.0, 1000.0];

const MIN_DEPTH: f64 = 1e-6;
const MIN_IMAGE_SPAN: f64 = 1e-6;
const SINGULAR_EPSILON: f64 = 1e-6;

/// Guide endpoints are clamped to this many frame sizes around the origin
const GUIDE_EXTENT: f64 = 10.0;

/// Reasons no pose is available for a frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("Degenerate input: {0}")]
    Degenerate(&'static str),

    #[error("PnP solver error: {0}")]
    Solver(String),

    #[error("PnP solve did not converge")]
    NotConverged,

    #[error("Reprojection error {rms:.2}px exceeds {limit:.2}px")]
    ReprojectionError { rms: f64, limit: f64 },

    #[error("Face model projects behind the camera")]
    BehindCamera,
}

impl From<opencv::Error> for PoseError {
    fn from(e: opencv::Error) -> Self {
        PoseError::Solver(e.to_string())
    }
}

/// Pinhole camera without distortion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub focal_length: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Focal length equal to the image width, principal point at the centre
    pub fn for_image(width: u32, height: u32) -> Self {
        Self {
            focal_length: f64::from(width),
            cx: f64::from(width) / 2.0,
            cy: f64::from(height) / 2.0,
        }
    }

    /// Project a model point; `None` when it lies behind the camera
    pub fn project(
        &self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        point: &Point3<f64>,
    ) -> Option<Point2<f64>> {
        let cam = rotation * point.coords + translation;
        if cam.z <= MIN_DEPTH {
            return None;
        }
        Some(Point2::new(
            self.focal_length * cam.x / cam.z + self.cx,
            self.focal_length * cam.y / cam.z + self.cy,
        ))
    }

    fn camera_matrix(&self) -> Result<Mat, PoseError> {
        let (f, cx, cy) = (self.focal_length, self.cx, self.cy);
        Ok(Mat::from_slice_2d(&[[f, 0.0, cx], [0.0, f, cy], [0.0, 0.0, 1.0]])?)
    }
}

fn dist_coeffs() -> Result<Mat, PoseError> {
    // Assume no lens distortion
    Ok(Mat::zeros(4, 1, opencv::core::CV_64F)?.to_mat()?)
}

/// Result of the PnP solve
#[derive(Debug, Clone, PartialEq)]
pub struct PnpSolution {
    pub rotation: Rotation3<f64>,
    /// Axis-angle form of `rotation`
    pub rotation_vector: Vector3<f64>,
    pub translation: Vector3<f64>,
    /// Root-mean-square reprojection error (pixels per point)
    pub rms_error: f64,
}

/// Overlay guide lines from the nose tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuideLines {
    pub start: (i32, i32),
    /// Projection of the straight-ahead point
    pub end: (i32, i32),
    /// Straight-ahead x at half the reference frame height
    pub end_alt: (i32, i32),
}

/// Estimated head pose for one face
#[derive(Debug, Clone, PartialEq)]
pub struct HeadPose {
    /// Nod angle in degrees, 0 for an upright head facing the camera
    pub tilt_degrees: Option<f64>,
    /// Absent when the straight-ahead point falls behind the camera
    pub guide: Option<GuideLines>,
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    pub reprojection_error: f64,
}

/// Head pose estimator over the six-point image cache
#[derive(Debug, Clone)]
pub struct HeadPoseEstimator {
    reference_frame_height: u32,
    max_reprojection_error: f64,
}

impl HeadPoseEstimator {
    pub fn new(reference_frame_height: u32, max_reprojection_error: f64) -> Self {
        Self {
            reference_frame_height,
            max_reprojection_error,
        }
    }

    /// Estimate the pose for an image of `size` = (height, width)
    pub fn estimate(&self, size: (u32, u32), image_points: &[Point; 6]) -> Result<HeadPose, PoseError> {
        let (height, width) = size;
        if width == 0 || height == 0 {
            return Err(PoseError::Degenerate("empty image"));
        }

        let intrinsics = CameraIntrinsics::for_image(width, height);
        let solution = solve_pnp(&model_points(), image_points, &intrinsics)?;
        if solution.rms_error > self.max_reprojection_error {
            return Err(PoseError::ReprojectionError {
                rms: solution.rms_error,
                limit: self.max_reprojection_error,
            });
        }

        let bounds = (
            f64::from(width) * GUIDE_EXTENT,
            f64::from(height) * GUIDE_EXTENT,
        );
        let [x, y, z] = STRAIGHT_AHEAD;
        let ahead = Point3::new(x, y, z);
        let in_front = (solution.rotation * ahead.coords + solution.translation).z > MIN_DEPTH;
        let guide = if in_front {
            let projected = project_points(&solution, &intrinsics, &[ahead])?;
            projected.first().map(|p| {
                let end = to_pixel(p, bounds);
                GuideLines {
                    start: to_pixel(&image_points[0], bounds),
                    end,
                    end_alt: (end.0, (self.reference_frame_height / 2) as i32),
                }
            })
        } else {
            None
        };

        Ok(HeadPose {
            tilt_degrees: tilt_from_rotation(&solution.rotation),
            guide,
            rotation: solution.rotation,
            translation: solution.translation,
            reprojection_error: solution.rms_error,
        })
    }
}

/// The canonical 3D face model
pub fn model_points() -> [Point3<f64>; 6] {
    MODEL_POINTS.map(|[x, y, z]| Point3::new(x, y, z))
}

/// Nod angle of a model-to-camera rotation.
///
/// Uses the x angle of the ZYX decomposition, `atan2(r21, r22)`, shifted so
/// that the camera-facing upright pose (180 degrees about x) reads 0 and
/// wrapped into (-180, 180]. `None` when the decomposition is singular.
pub fn tilt_from_rotation(rotation: &Rotation3<f64>) -> Option<f64> {
    let m = rotation.matrix();
    let sy = (m[(0, 0)] * m[(0, 0)] + m[(1, 0)] * m[(1, 0)]).sqrt();
    if sy < SINGULAR_EPSILON {
        return None;
    }
    let pitch = m[(2, 1)].atan2(m[(2, 2)]).to_degrees();
    Some(wrap_degrees(pitch + 180.0))
}

fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle % 360.0;
    if wrapped > 180.0 {
        wrapped - 360.0
    } else if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Truncate to pixels, clamped to `bounds` on either side of the origin
fn to_pixel(p: &Point2<f64>, bounds: (f64, f64)) -> (i32, i32) {
    (
        p.x.clamp(-bounds.0, bounds.0) as i32,
        p.y.clamp(-bounds.1, bounds.1) as i32,
    )
}

/// Solve the six-point PnP problem with `SOLVEPNP_ITERATIVE`, starting from
/// a camera-facing pose at the depth implied by the eye-corner span
pub fn solve_pnp(
    model: &[Point3<f64>; 6],
    image: &[Point2<f64>; 6],
    intrinsics: &CameraIntrinsics,
) -> Result<PnpSolution, PoseError> {
    if image.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(PoseError::Degenerate("non-finite image point"));
    }

    let model_span = distance(&model[2], &model[3]);
    let image_span = distance(&image[2], &image[3]);
    if image_span <= MIN_IMAGE_SPAN {
        return Err(PoseError::Degenerate("eye corners coincide"));
    }
    let tz = intrinsics.focal_length * model_span / image_span;
    let tx = (image[0].x - intrinsics.cx) * tz / intrinsics.focal_length;
    let ty = (image[0].y - intrinsics.cy) * tz / intrinsics.focal_length;

    let object_points: Vector<Point3d> = model.iter().map(|p| Point3d::new(p.x, p.y, p.z)).collect();
    let image_points: Vector<Point2d> = image.iter().map(|p| Point2d::new(p.x, p.y)).collect();
    let camera_matrix = intrinsics.camera_matrix()?;
    let dist_coeffs = dist_coeffs()?;

    let mut rvec = Mat::from_slice_2d(&[[PI], [0.0], [0.0]])?;
    let mut tvec = Mat::from_slice_2d(&[[tx], [ty], [tz]])?;
    let converged = calib3d::solve_pnp(
        &object_points,
        &image_points,
        &camera_matrix,
        &dist_coeffs,
        &mut rvec,
        &mut tvec,
        true,
        calib3d::SOLVEPNP_ITERATIVE,
    )?;
    if !converged {
        return Err(PoseError::NotConverged);
    }

    // Convert rotation vector to rotation matrix
    let mut rotation_mat = Mat::default();
    calib3d::rodrigues(&rvec, &mut rotation_mat, &mut Mat::default())?;
    let mut matrix = Matrix3::zeros();
    for i in 0..3 {
        for j in 0..3 {
            matrix[(i, j)] = *rotation_mat.at_2d::<f64>(i as i32, j as i32)?;
        }
    }

    let rotation_vector = Vector3::new(
        *rvec.at_2d::<f64>(0, 0)?,
        *rvec.at_2d::<f64>(1, 0)?,
        *rvec.at_2d::<f64>(2, 0)?,
    );
    let translation = Vector3::new(
        *tvec.at_2d::<f64>(0, 0)?,
        *tvec.at_2d::<f64>(1, 0)?,
        *tvec.at_2d::<f64>(2, 0)?,
    );
    if matrix.iter().chain(translation.iter()).any(|v| !v.is_finite()) {
        return Err(PoseError::Degenerate("solve produced non-finite values"));
    }
    if translation.z <= MIN_DEPTH {
        return Err(PoseError::BehindCamera);
    }

    let mut solution = PnpSolution {
        rotation: Rotation3::from_matrix_unchecked(matrix),
        rotation_vector,
        translation,
        rms_error: 0.0,
    };

    let reprojected = project_points(&solution, intrinsics, model)?;
    let squared: f64 = reprojected
        .iter()
        .zip(image.iter())
        .map(|(r, p)| (r - p).norm_squared())
        .sum();
    solution.rms_error = (squared / model.len() as f64).sqrt();
    if !solution.rms_error.is_finite() {
        return Err(PoseError::Degenerate("solve produced non-finite values"));
    }

    trace!("PnP solved, rms {:.4}px", solution.rms_error);
    Ok(solution)
}

/// Project model points through a solved pose
fn project_points(
    solution: &PnpSolution,
    intrinsics: &CameraIntrinsics,
    points: &[Point3<f64>],
) -> Result<Vec<Point2<f64>>, PoseError> {
    let object_points: Vector<Point3d> = points.iter().map(|p| Point3d::new(p.x, p.y, p.z)).collect();
    let r = &solution.rotation_vector;
    let t = &solution.translation;

    let mut projected = Mat::default();
    calib3d::project_points(
        &object_points,
        &Vec3d::from([r.x, r.y, r.z]),
        &Vec3d::from([t.x, t.y, t.z]),
        &intrinsics.camera_matrix()?,
        &dist_coeffs()?,
        &mut projected,
        &mut Mat::default(),
        0.0,
    )?;

    (0..points.len())
        .map(|i| {
            let p = projected.at_2d::<Point2d>(i as i32, 0)?;
            Ok(Point2::new(p.x, p.y))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: (u32, u32) = (600, 800);

    fn nod(degrees: f64) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), PI + degrees.to_radians())
    }

    fn project_model(rotation: &Rotation3<f64>, translation: &Vector3<f64>) -> [Point; 6] {
        let intrinsics = CameraIntrinsics::for_image(SIZE.1, SIZE.0);
        model_points().map(|m| intrinsics.project(rotation, translation, &m).unwrap())
    }

    #[test]
    fn test_tilt_of_camera_facing_pose_is_zero() {
        let tilt = tilt_from_rotation(&nod(0.0)).unwrap();
        assert!(tilt.abs() < 1e-9);

        let tilt = tilt_from_rotation(&nod(12.0)).unwrap();
        assert!((tilt - 12.0).abs() < 1e-9);

        let tilt = tilt_from_rotation(&nod(-30.0)).unwrap();
        assert!((tilt + 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_singular_rotation_has_no_tilt() {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), PI / 2.0);
        assert_eq!(tilt_from_rotation(&rotation), None);
    }

    #[test]
    fn test_wrap_degrees() {
        assert_eq!(wrap_degrees(360.0), 0.0);
        assert_eq!(wrap_degrees(190.0), -170.0);
        assert_eq!(wrap_degrees(-180.0), 180.0);
        assert_eq!(wrap_degrees(45.0), 45.0);
    }

    #[test]
    fn test_solve_recovers_known_pose() {
        let truth = nod(8.0) * Rotation3::from_axis_angle(&Vector3::y_axis(), 0.2);
        let translation = Vector3::new(20.0, -30.0, 1800.0);
        let image = project_model(&truth, &translation);

        let intrinsics = CameraIntrinsics::for_image(SIZE.1, SIZE.0);
        let solution = solve_pnp(&model_points(), &image, &intrinsics).unwrap();

        assert!(solution.rotation.angle_to(&truth) < 1e-3);
        assert!((solution.translation - translation).norm() < 0.5);
        assert!(solution.rms_error < 1e-3);
    }

    #[test]
    fn test_frontal_upright_face_has_zero_tilt() {
        let estimator = HeadPoseEstimator::new(576, 40.0);
        let image = project_model(&nod(0.0), &Vector3::new(0.0, 0.0, 1800.0));
        let pose = estimator.estimate(SIZE, &image).unwrap();

        assert!(pose.tilt_degrees.unwrap().abs() < 0.1);
        let guide = pose.guide.unwrap();
        assert_eq!(guide.start, (400, 300));
        assert!((guide.end.0 - 400).abs() <= 1 && (guide.end.1 - 300).abs() <= 1);
        assert_eq!(guide.end_alt, (guide.end.0, 288));
    }

    #[test]
    fn test_tilt_follows_rotation_monotonically() {
        let estimator = HeadPoseEstimator::new(576, 40.0);
        let angles = [-20.0, -10.0, 0.0, 10.0, 20.0];
        let tilts: Vec<f64> = angles
            .iter()
            .map(|&deg| {
                let image = project_model(&nod(deg), &Vector3::new(10.0, 40.0, 1800.0));
                estimator.estimate(SIZE, &image).unwrap().tilt_degrees.unwrap()
            })
            .collect();

        for (tilt, expected) in tilts.iter().zip(angles.iter()) {
            assert!((tilt - expected).abs() < 0.5, "tilt {tilt} vs {expected}");
        }
        assert!(tilts.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_guide_line_follows_nod() {
        let estimator = HeadPoseEstimator::new(576, 40.0);
        let image = project_model(&nod(15.0), &Vector3::new(0.0, 0.0, 1800.0));
        let guide = estimator.estimate(SIZE, &image).unwrap().guide.unwrap();
        assert_ne!(guide.end.1, guide.start.1);
        assert_eq!(guide.end_alt, (guide.end.0, 288));
    }

    #[test]
    fn test_collapsed_points_are_degenerate() {
        let estimator = HeadPoseEstimator::new(576, 40.0);
        let image = [Point::new(100.0, 100.0); 6];
        assert_eq!(
            estimator.estimate(SIZE, &image),
            Err(PoseError::Degenerate("eye corners coincide"))
        );
    }

    #[test]
    fn test_non_finite_points_are_rejected() {
        let estimator = HeadPoseEstimator::new(576, 40.0);
        let mut image = project_model(&nod(0.0), &Vector3::new(0.0, 0.0, 1800.0));
        image[1] = Point::new(f64::NAN, 10.0);
        assert!(matches!(estimator.estimate(SIZE, &image), Err(PoseError::Degenerate(_))));
    }

    #[test]
    fn test_reprojection_limit() {
        let strict = HeadPoseEstimator::new(576, 0.01);
        let mut image = project_model(&nod(0.0), &Vector3::new(0.0, 0.0, 1800.0));
        image[1].x += 5.0;
        image[1].y -= 3.0;
        image[4].x -= 4.0;
        image[4].y += 2.0;
        assert!(matches!(
            strict.estimate(SIZE, &image),
            Err(PoseError::ReprojectionError { .. })
        ));
    }

    #[test]
    fn test_empty_image_is_degenerate() {
        let estimator = HeadPoseEstimator::new(576, 40.0);
        let image = project_model(&nod(0.0), &Vector3::new(0.0, 0.0, 1800.0));
        assert!(estimator.estimate((0, 800), &image).is_err());
    }

    #[test]
    fn test_guide_endpoints_are_clamped() {
        let bounds = (8000.0, 6000.0);
        assert_eq!(to_pixel(&Point::new(1e12, -1e12), bounds), (8000, -6000));
        assert_eq!(to_pixel(&Point::new(400.7, 299.2), bounds), (400, 299));
    }

    #[test]
    fn test_solver_error_maps_to_pose_error() {
        let e = opencv::Error::new(opencv::core::StsBadArg, "bad points");
        assert!(matches!(PoseError::from(e), PoseError::Solver(msg) if msg.contains("bad points")));
    }
}
