use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point3, Vector3};
use std::ops::Mul;

use super::so3::SO3;

/// Rigid transform `x' = R x + t` backed by an explicit rotation matrix.
///
/// Global poses are camera-to-world (`pose_wc`): they map camera coordinates into
/// the world frame. `inverse()` yields the world-to-camera transform used for
/// projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    rotation: SO3,
    translation: Vector3<f64>,
}

impl SE3 {
    /// Returns the identity transform.
    pub fn identity() -> Self {
        Self::from_parts(SO3::identity(), Vector3::zeros())
    }

    /// Constructs an SE(3) element from parts.
    pub fn from_parts(rotation: SO3, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Returns the stored rotation component.
    pub fn rotation(&self) -> &SO3 {
        &self.rotation
    }

    /// Returns the stored translation component.
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        let translation = -(rotation.matrix() * self.translation);
        Self::from_parts(rotation, translation)
    }

    /// `self ∘ other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> Self {
        let rotation = self.rotation * other.rotation;
        let translation = self.rotation.matrix() * other.translation + self.translation;
        Self::from_parts(rotation, translation)
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.matrix() * point.coords + self.translation)
    }

    /// Same transform with its rotation block projected back onto SO(3).
    pub fn orthonormalized(&self) -> Self {
        Self::from_parts(self.rotation.orthonormalized(), self.translation)
    }

    /// The `[R | t]` block, i.e. the normalized-camera projection when `self` is world-to-camera.
    pub fn to_matrix3x4(&self) -> Matrix3x4<f64> {
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 4>(0, 0).copy_from(&self.to_matrix3x4());
        m
    }

    /// Builds a transform from a rotation matrix that is projected onto SO(3) first.
    pub fn from_matrix_parts(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self::from_parts(SO3::from_matrix(rotation), translation)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> SE3 {
        self.compose(&rhs)
    }
}

impl Mul<&SE3> for &SE3 {
    type Output = SE3;

    fn mul(self, rhs: &SE3) -> SE3 {
        self.compose(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> SE3 {
        SE3::from_parts(
            SO3::from_axis_angle(&Vector3::new(0.2, 1.0, -0.3), 0.7),
            Vector3::new(1.0, -2.0, 0.5),
        )
    }

    #[test]
    fn inverse_composes_to_identity() {
        let pose = sample_pose();
        let identity = pose * pose.inverse();

        assert_relative_eq!(
            identity.to_homogeneous(),
            Matrix4::identity(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn composition_matches_homogeneous_product() {
        let a = sample_pose();
        let b = SE3::from_parts(
            SO3::from_axis_angle(&Vector3::z(), -0.4),
            Vector3::new(0.0, 0.3, 1.2),
        );

        assert_relative_eq!(
            (&a * &b).to_homogeneous(),
            a.to_homogeneous() * b.to_homogeneous(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn transform_point_applies_rotation_then_translation() {
        let pose = SE3::from_parts(
            SO3::from_axis_angle(&Vector3::z(), std::f64::consts::FRAC_PI_2),
            Vector3::new(1.0, 0.0, 0.0),
        );
        let moved = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(moved, Point3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }
}
