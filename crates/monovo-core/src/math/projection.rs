use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoError};

const UNDISTORT_ITERATIONS: usize = 20;

/// Lens distortion model applied to normalized image coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DistortionModel {
    /// Ideal pinhole.
    #[default]
    None,
    /// Brown-Conrady / radial-tangential (k1, k2, p1, p2, k3) parameterization.
    BrownConrady {
        k1: f64,
        k2: f64,
        p1: f64,
        p2: f64,
        #[serde(default)]
        k3: f64,
    },
}

impl DistortionModel {
    /// Builds a model from a flat coefficient list as found in calibration files.
    ///
    /// Accepts an empty list (no distortion), `[k1, k2, p1, p2]` or `[k1, k2, p1, p2, k3]`.
    pub fn from_coefficients(coefficients: &[f64]) -> Result<Self> {
        match coefficients {
            [] => Ok(Self::None),
            [k1, k2, p1, p2] => Ok(Self::BrownConrady {
                k1: *k1,
                k2: *k2,
                p1: *p1,
                p2: *p2,
                k3: 0.0,
            }),
            [k1, k2, p1, p2, k3] => Ok(Self::BrownConrady {
                k1: *k1,
                k2: *k2,
                p1: *p1,
                p2: *p2,
                k3: *k3,
            }),
            other => Err(VoError::InvalidCalibration(format!(
                "expected 0, 4 or 5 distortion coefficients, got {}",
                other.len()
            ))),
        }
    }

    fn is_identity(&self) -> bool {
        match self {
            Self::None => true,
            Self::BrownConrady { k1, k2, p1, p2, k3 } => {
                [k1, k2, p1, p2, k3].iter().all(|c| **c == 0.0)
            }
        }
    }

    /// Maps an ideal normalized point to its distorted location.
    pub fn distort(&self, norm_xy: Vector2<f64>) -> Vector2<f64> {
        match *self {
            Self::None => norm_xy,
            Self::BrownConrady { k1, k2, p1, p2, k3 } => {
                let (x, y) = (norm_xy.x, norm_xy.y);
                let r2 = x * x + y * y;
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                Vector2::new(x * radial + dx, y * radial + dy)
            }
        }
    }

    /// Inverts [`DistortionModel::distort`] by fixed-point iteration.
    pub fn undistort(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return distorted;
        }
        let Self::BrownConrady { k1, k2, p1, p2, k3 } = *self else {
            return distorted;
        };

        let mut x = distorted.x;
        let mut y = distorted.y;
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
            if radial.abs() < f64::EPSILON {
                break;
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (distorted.x - dx) / radial;
            y = (distorted.y - dy) / radial;
        }
        Vector2::new(x, y)
    }
}

/// Standard pinhole camera intrinsics shared read-only by the pose estimator
/// and the triangulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub distortion: DistortionModel,
}

impl CameraIntrinsics {
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        skew: f64,
        width: u32,
        height: u32,
        distortion: DistortionModel,
    ) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew,
            width,
            height,
            distortion,
        }
    }

    /// Pinhole intrinsics without skew or distortion.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self::new(fx, fy, cx, cy, 0.0, width, height, DistortionModel::None)
    }

    /// Rejects calibrations that would silently corrupt every downstream estimate.
    pub fn validate(&self) -> Result<()> {
        let values = [self.fx, self.fy, self.cx, self.cy, self.skew];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(VoError::InvalidCalibration(
                "intrinsics contain non-finite values".to_string(),
            ));
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(VoError::InvalidCalibration(format!(
                "focal lengths must be positive (fx={}, fy={})",
                self.fx, self.fy
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(VoError::InvalidCalibration(format!(
                "image size must be positive ({}x{})",
                self.width, self.height
            )));
        }
        if let DistortionModel::BrownConrady { k1, k2, p1, p2, k3 } = self.distortion
            && [k1, k2, p1, p2, k3].iter().any(|c| !c.is_finite())
        {
            return Err(VoError::InvalidCalibration(
                "distortion coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Mean focal length, used to express pixel thresholds in normalized units.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.fx + self.fy)
    }

    /// Undistorted normalized coordinates of an observed pixel.
    pub fn px_uv_to_norm_xy(&self, px_uv: &Vector2<f64>) -> Vector2<f64> {
        let y_d = (px_uv.y - self.cy) / self.fy;
        let x_d = (px_uv.x - self.cx - self.skew * y_d) / self.fx;
        self.distortion.undistort(Vector2::new(x_d, y_d))
    }

    /// Ideal (distortion-free) pixel of a normalized point.
    pub fn norm_xy_to_px_uv(&self, norm_xy: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * norm_xy.x + self.skew * norm_xy.y + self.cx,
            self.fy * norm_xy.y + self.cy,
        )
    }

    /// Projects a 3D point in camera coordinates onto the (distorted) image plane.
    /// Returns `None` if the point lies on or behind the camera plane (z <= 0).
    pub fn project_point(&self, point_cam: &Point3<f64>) -> Option<Vector2<f64>> {
        if point_cam.z <= 0.0 {
            return None;
        }
        let normalized = Vector2::new(point_cam.x / point_cam.z, point_cam.y / point_cam.z);
        let distorted = self.distortion.distort(normalized);
        Some(self.norm_xy_to_px_uv(&distorted))
    }

    /// Back-projects a pixel with known depth into camera coordinates.
    pub fn back_project(&self, px_uv: &Vector2<f64>, depth: f64) -> Point3<f64> {
        let norm_xy = self.px_uv_to_norm_xy(px_uv);
        Point3::new(norm_xy.x * depth, norm_xy.y * depth, depth)
    }

    pub fn contains(&self, px_uv: &Vector2<f64>) -> bool {
        px_uv.x >= 0.0
            && px_uv.y >= 0.0
            && px_uv.x < self.width as f64
            && px_uv.y < self.height as f64
    }
}
