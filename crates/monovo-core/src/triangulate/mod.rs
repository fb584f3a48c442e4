//! Two-view landmark reconstruction with geometric validation.

use log::{debug, trace};
use nalgebra::{Matrix3x4, Matrix4, Point3, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{CameraIntrinsics, SE3};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationConfig {
    pub max_reprojection_error_px: f64,
    pub min_triangulation_angle_deg: f64,
    /// Upper bound on depth in either camera, in trajectory units.
    pub max_depth: f64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            max_reprojection_error_px: 2.0,
            min_triangulation_angle_deg: 1.0,
            max_depth: 200.0,
        }
    }
}

/// A matched pixel pair between the previous and the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub prev_px: Vector2<f64>,
    pub curr_px: Vector2<f64>,
    pub intensity: u8,
}

/// A validated world-frame point produced from one correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkCandidate {
    pub position: Point3<f64>,
    pub intensity: u8,
    /// In `[0, 1]`; grows with parallax and shrinks with reprojection error.
    pub confidence: f64,
    pub reprojection_error_px: f64,
    pub parallax_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TriangulationRejection {
    #[error("linear system has no finite solution")]
    Degenerate,
    #[error("point lies behind camera (depths {depth_prev:.3}, {depth_curr:.3})")]
    BehindCamera { depth_prev: f64, depth_curr: f64 },
    #[error("point depth {depth:.1} exceeds the sanity cap")]
    TooFar { depth: f64 },
    #[error("triangulation angle {angle_deg:.3} deg is too small")]
    InsufficientParallax { angle_deg: f64 },
    #[error("reprojection error {error_px:.2}px exceeds the threshold")]
    ReprojectionError { error_px: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct Triangulator {
    config: TriangulationConfig,
}

impl Triangulator {
    pub fn new(config: TriangulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriangulationConfig {
        &self.config
    }

    /// Reconstructs every correspondence and keeps the ones that pass validation.
    ///
    /// Both poses are camera-to-world. Rejected points are dropped silently.
    pub fn triangulate(
        &self,
        pose_prev_wc: &SE3,
        pose_curr_wc: &SE3,
        correspondences: &[Correspondence],
        intrinsics: &CameraIntrinsics,
    ) -> Vec<LandmarkCandidate> {
        let views = TwoViews::new(pose_prev_wc, pose_curr_wc);
        let mut rejected = 0usize;
        let candidates: Vec<_> = correspondences
            .iter()
            .filter_map(|c| match self.validate(&views, c, intrinsics) {
                Ok(candidate) => Some(candidate),
                Err(reason) => {
                    trace!(target: "monovo_core::triangulate", "rejected {:?}: {reason}", c.curr_px);
                    rejected += 1;
                    None
                }
            })
            .collect();

        debug!(
            target: "monovo_core::triangulate",
            "triangulated {} of {} correspondences ({} rejected)",
            candidates.len(),
            correspondences.len(),
            rejected
        );
        candidates
    }

    /// Reconstructs a single correspondence, reporting why it was rejected.
    pub fn triangulate_one(
        &self,
        pose_prev_wc: &SE3,
        pose_curr_wc: &SE3,
        correspondence: &Correspondence,
        intrinsics: &CameraIntrinsics,
    ) -> Result<LandmarkCandidate, TriangulationRejection> {
        let views = TwoViews::new(pose_prev_wc, pose_curr_wc);
        self.validate(&views, correspondence, intrinsics)
    }

    fn validate(
        &self,
        views: &TwoViews,
        c: &Correspondence,
        intrinsics: &CameraIntrinsics,
    ) -> Result<LandmarkCandidate, TriangulationRejection> {
        let norm_prev = intrinsics.px_uv_to_norm_xy(&c.prev_px);
        let norm_curr = intrinsics.px_uv_to_norm_xy(&c.curr_px);
        let world = linear_triangulation(&views.proj_prev, &views.proj_curr, &norm_prev, &norm_curr)
            .ok_or(TriangulationRejection::Degenerate)?;

        let cam_prev = views.prev_cw.transform_point(&world);
        let cam_curr = views.curr_cw.transform_point(&world);
        if cam_prev.z <= 0.0 || cam_curr.z <= 0.0 {
            return Err(TriangulationRejection::BehindCamera {
                depth_prev: cam_prev.z,
                depth_curr: cam_curr.z,
            });
        }

        let depth = cam_prev.z.max(cam_curr.z);
        if depth > self.config.max_depth {
            return Err(TriangulationRejection::TooFar { depth });
        }

        let ray_prev = world - views.center_prev;
        let ray_curr = world - views.center_curr;
        let cos_angle = ray_prev.dot(&ray_curr) / (ray_prev.norm() * ray_curr.norm());
        let angle_deg = cos_angle.clamp(-1.0, 1.0).acos().to_degrees();
        if !angle_deg.is_finite() || angle_deg < self.config.min_triangulation_angle_deg {
            return Err(TriangulationRejection::InsufficientParallax { angle_deg });
        }

        let error_prev = reprojection_error(intrinsics, &cam_prev, &c.prev_px);
        let error_curr = reprojection_error(intrinsics, &cam_curr, &c.curr_px);
        let error_px = error_prev.max(error_curr);
        if error_px >= self.config.max_reprojection_error_px {
            return Err(TriangulationRejection::ReprojectionError { error_px });
        }

        let fit = 1.0 - error_px / self.config.max_reprojection_error_px;
        let parallax = (angle_deg / (4.0 * self.config.min_triangulation_angle_deg)).min(1.0);
        Ok(LandmarkCandidate {
            position: world,
            intensity: c.intensity,
            confidence: (fit * parallax).clamp(0.0, 1.0),
            reprojection_error_px: error_px,
            parallax_deg: angle_deg,
        })
    }
}

struct TwoViews {
    prev_cw: SE3,
    curr_cw: SE3,
    proj_prev: Matrix3x4<f64>,
    proj_curr: Matrix3x4<f64>,
    center_prev: Point3<f64>,
    center_curr: Point3<f64>,
}

impl TwoViews {
    fn new(pose_prev_wc: &SE3, pose_curr_wc: &SE3) -> Self {
        let prev_cw = pose_prev_wc.inverse();
        let curr_cw = pose_curr_wc.inverse();
        Self {
            proj_prev: prev_cw.to_matrix3x4(),
            proj_curr: curr_cw.to_matrix3x4(),
            prev_cw,
            curr_cw,
            center_prev: Point3::from(pose_prev_wc.translation()),
            center_curr: Point3::from(pose_curr_wc.translation()),
        }
    }
}

fn reprojection_error(
    intrinsics: &CameraIntrinsics,
    point_cam: &Point3<f64>,
    observed_px: &Vector2<f64>,
) -> f64 {
    intrinsics
        .project_point(point_cam)
        .map_or(f64::INFINITY, |px| (px - observed_px).norm())
}

/// Linear (DLT) triangulation from two normalized-camera projection matrices.
///
/// Returns `None` when the homogeneous solution lies at infinity or is not finite.
pub fn linear_triangulation(
    p1: &Matrix3x4<f64>,
    p2: &Matrix3x4<f64>,
    x1: &Vector2<f64>,
    x2: &Vector2<f64>,
) -> Option<Point3<f64>> {
    let mut a = Matrix4::zeros();
    fill_triangulation_row(&mut a, 0, p1, x1.x, 0);
    fill_triangulation_row(&mut a, 1, p1, x1.y, 1);
    fill_triangulation_row(&mut a, 2, p2, x2.x, 0);
    fill_triangulation_row(&mut a, 3, p2, x2.y, 1);

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let homog = v_t.row(svd.singular_values.imin());
    if homog[3].abs() < 1e-12 {
        return None;
    }
    let point = Point3::new(
        homog[0] / homog[3],
        homog[1] / homog[3],
        homog[2] / homog[3],
    );
    point.coords.iter().all(|v| v.is_finite()).then_some(point)
}

fn fill_triangulation_row(
    a: &mut Matrix4<f64>,
    row: usize,
    projection: &Matrix3x4<f64>,
    value: f64,
    axis: usize,
) {
    let row_data = projection.row(axis);
    let third_row = projection.row(2);
    for col in 0..4 {
        a[(row, col)] = value * third_row[col] - row_data[col];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::SO3;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::pinhole(500.0, 500.0, 320.0, 240.0, 640, 480)
    }

    fn poses() -> (SE3, SE3) {
        let prev = SE3::identity();
        let curr = SE3::from_parts(
            SO3::from_axis_angle(&Vector3::y(), 0.05),
            Vector3::new(0.5, 0.0, 0.1),
        );
        (prev, curr)
    }

    fn observe(pose_wc: &SE3, world: &Point3<f64>) -> Vector2<f64> {
        intrinsics()
            .project_point(&pose_wc.inverse().transform_point(world))
            .expect("point in front of camera")
    }

    #[test]
    fn reconstructs_synthetic_points_within_a_pixel() {
        let (prev, curr) = poses();
        let mut rng = SmallRng::seed_from_u64(9);
        let points: Vec<_> = (0..50)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(3.0..6.0),
                )
            })
            .collect();
        let correspondences: Vec<_> = points
            .iter()
            .map(|p| Correspondence {
                prev_px: observe(&prev, p),
                curr_px: observe(&curr, p),
                intensity: 200,
            })
            .collect();

        let triangulator = Triangulator::default();
        let candidates = triangulator.triangulate(&prev, &curr, &correspondences, &intrinsics());

        assert_eq!(candidates.len(), points.len());
        for (candidate, truth) in candidates.iter().zip(&points) {
            assert!(candidate.reprojection_error_px < 1.0);
            assert_relative_eq!(candidate.position, *truth, epsilon = 1e-6);
            assert!((0.0..=1.0).contains(&candidate.confidence));
            assert_eq!(candidate.intensity, 200);
        }
    }

    #[test]
    fn points_behind_the_cameras_are_rejected() {
        let (prev, curr) = poses();
        let behind = Point3::new(0.2, -0.1, -4.0);
        let project_behind = |pose: &SE3| {
            let cam = pose.inverse().transform_point(&behind);
            intrinsics().norm_xy_to_px_uv(&Vector2::new(cam.x / cam.z, cam.y / cam.z))
        };
        let correspondence = Correspondence {
            prev_px: project_behind(&prev),
            curr_px: project_behind(&curr),
            intensity: 0,
        };

        let result = Triangulator::default().triangulate_one(&prev, &curr, &correspondence, &intrinsics());
        assert!(matches!(
            result,
            Err(TriangulationRejection::BehindCamera { .. })
        ));
    }

    #[test]
    fn zero_baseline_is_rejected() {
        let pose = SE3::identity();
        let px = Vector2::new(300.0, 200.0);
        let correspondence = Correspondence {
            prev_px: px,
            curr_px: px,
            intensity: 0,
        };
        let result = Triangulator::default().triangulate_one(&pose, &pose, &correspondence, &intrinsics());
        assert_eq!(result, Err(TriangulationRejection::Degenerate));
    }

    #[test]
    fn short_baseline_fails_the_angle_gate() {
        let prev = SE3::identity();
        let curr = SE3::from_parts(SO3::identity(), Vector3::new(0.01, 0.0, 0.0));
        let point = Point3::new(0.0, 0.0, 5.0);
        let correspondence = Correspondence {
            prev_px: observe(&prev, &point),
            curr_px: observe(&curr, &point),
            intensity: 0,
        };

        let result = Triangulator::default().triangulate_one(&prev, &curr, &correspondence, &intrinsics());
        let Err(TriangulationRejection::InsufficientParallax { angle_deg }) = result else {
            panic!("expected a parallax rejection, got {result:?}");
        };
        assert_relative_eq!(angle_deg, 0.1146, epsilon = 1e-3);

        // The same geometry passes once the gate is below the observed angle.
        let permissive = Triangulator::new(TriangulationConfig {
            min_triangulation_angle_deg: 0.05,
            ..TriangulationConfig::default()
        });
        assert!(
            permissive
                .triangulate_one(&prev, &curr, &correspondence, &intrinsics())
                .is_ok()
        );
    }

    #[test]
    fn inconsistent_observations_fail_reprojection() {
        let (prev, curr) = poses();
        let point = Point3::new(0.1, 0.2, 4.0);
        let correspondence = Correspondence {
            prev_px: observe(&prev, &point),
            curr_px: observe(&curr, &point) + Vector2::new(0.0, 12.0),
            intensity: 0,
        };
        let result = Triangulator::default().triangulate_one(&prev, &curr, &correspondence, &intrinsics());
        assert!(matches!(
            result,
            Err(TriangulationRejection::ReprojectionError { .. })
        ));
    }
}
