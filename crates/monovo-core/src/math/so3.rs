use nalgebra::{Matrix3, Quaternion, Rotation3, Unit, UnitQuaternion, Vector3};
use std::ops::Mul;

/// Group helper for SO(3) operations backed by an explicit 3x3 rotation matrix.
///
/// The matrix is the quantity the odometry composes frame after frame, so it is
/// stored as-is and re-projected onto SO(3) with [`SO3::orthonormalized`] when
/// rounding error accumulates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    matrix: Matrix3<f64>,
}

impl SO3 {
    /// Returns the identity rotation.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Wraps a matrix that is already known to be a rotation.
    pub fn from_matrix_unchecked(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// Builds a rotation from an arbitrary matrix by projecting it onto SO(3).
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        Self {
            matrix: orthonormalize(matrix),
        }
    }

    /// Builds an SO(3) rotation from an axis-angle pair.
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        if axis.norm_squared() < f64::EPSILON {
            return Self::identity();
        }

        let unit_axis = Unit::new_normalize(*axis);
        Self {
            matrix: Rotation3::from_axis_angle(&unit_axis, angle).into_inner(),
        }
    }

    /// Exponential map of an so(3) vector.
    pub fn exp(omega: &Vector3<f64>) -> Self {
        Self {
            matrix: Rotation3::from_scaled_axis(*omega).into_inner(),
        }
    }

    /// Returns the so(3) vector (axis-angle) associated with this rotation.
    pub fn log(&self) -> Vector3<f64> {
        Rotation3::from_matrix_unchecked(self.matrix).scaled_axis()
    }

    /// Rotation angle in radians, in `[0, pi]`.
    pub fn angle(&self) -> f64 {
        let cos = ((self.matrix.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
        cos.acos()
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn inverse(&self) -> Self {
        Self {
            matrix: self.matrix.transpose(),
        }
    }

    pub fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * v
    }

    /// Re-projects the stored matrix onto SO(3).
    pub fn orthonormalized(&self) -> Self {
        Self::from_matrix(&self.matrix)
    }

    /// Largest deviation of `R^T R` from identity, plus the determinant error.
    pub fn orthonormality_error(&self) -> f64 {
        let gram = self.matrix.transpose() * self.matrix - Matrix3::identity();
        gram.abs().max() + (self.matrix.determinant() - 1.0).abs()
    }

    pub fn to_quaternion(&self) -> UnitQuaternion<f64> {
        quaternion_from_matrix(&self.matrix)
    }

    pub fn from_quaternion(q: &UnitQuaternion<f64>) -> Self {
        Self {
            matrix: matrix_from_quaternion(q),
        }
    }
}

impl Default for SO3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: SO3) -> SO3 {
        SO3 {
            matrix: self.matrix * rhs.matrix,
        }
    }
}

/// Closest rotation (Frobenius sense) to `m`, via the polar decomposition `U V^T`.
///
/// A reflection is turned into a proper rotation by flipping the axis with the
/// smallest singular value.
pub fn orthonormalize(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = nalgebra::SVD::new(*m, true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return *m;
    };

    if (u * v_t).determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        let mut column = u.column_mut(weakest);
        column *= -1.0;
    }
    u * v_t
}

/// Converts a rotation matrix into a unit quaternion.
///
/// Branch selection follows Shepperd: the largest of the trace and the three
/// diagonal entries decides which quaternion component is recovered from the
/// square root, so no division ever happens by a value close to zero. The
/// result is canonicalized to `w >= 0`.
pub fn quaternion_from_matrix(r: &Matrix3<f64>) -> UnitQuaternion<f64> {
    let (r00, r11, r22) = (r[(0, 0)], r[(1, 1)], r[(2, 2)]);
    let trace = r00 + r11 + r22;

    let (w, x, y, z) = if trace >= r00 && trace >= r11 && trace >= r22 {
        let s = 2.0 * (1.0 + trace).sqrt();
        (
            0.25 * s,
            (r[(2, 1)] - r[(1, 2)]) / s,
            (r[(0, 2)] - r[(2, 0)]) / s,
            (r[(1, 0)] - r[(0, 1)]) / s,
        )
    } else if r00 >= r11 && r00 >= r22 {
        let s = 2.0 * (1.0 + r00 - r11 - r22).sqrt();
        (
            (r[(2, 1)] - r[(1, 2)]) / s,
            0.25 * s,
            (r[(0, 1)] + r[(1, 0)]) / s,
            (r[(0, 2)] + r[(2, 0)]) / s,
        )
    } else if r11 >= r22 {
        let s = 2.0 * (1.0 + r11 - r00 - r22).sqrt();
        (
            (r[(0, 2)] - r[(2, 0)]) / s,
            (r[(0, 1)] + r[(1, 0)]) / s,
            0.25 * s,
            (r[(1, 2)] + r[(2, 1)]) / s,
        )
    } else {
        let s = 2.0 * (1.0 + r22 - r00 - r11).sqrt();
        (
            (r[(1, 0)] - r[(0, 1)]) / s,
            (r[(0, 2)] + r[(2, 0)]) / s,
            (r[(1, 2)] + r[(2, 1)]) / s,
            0.25 * s,
        )
    };

    let q = if w < 0.0 {
        Quaternion::new(-w, -x, -y, -z)
    } else {
        Quaternion::new(w, x, y, z)
    };
    normalize_quaternion(&q)
}

/// Converts a unit quaternion into the corresponding 3x3 rotation matrix.
pub fn matrix_from_quaternion(q: &UnitQuaternion<f64>) -> Matrix3<f64> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, xz, yz) = (x * y, x * z, y * z);
    let (wx, wy, wz) = (w * x, w * y, w * z);

    Matrix3::new(
        1.0 - 2.0 * (yy + zz),
        2.0 * (xy - wz),
        2.0 * (xz + wy),
        2.0 * (xy + wz),
        1.0 - 2.0 * (xx + zz),
        2.0 * (yz - wx),
        2.0 * (xz - wy),
        2.0 * (yz + wx),
        1.0 - 2.0 * (xx + yy),
    )
}

/// Normalizes an arbitrary quaternion and returns the associated unit quaternion.
///
/// If the quaternion has zero norm, the identity rotation is returned.
pub fn normalize_quaternion(quaternion: &Quaternion<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::try_new(*quaternion, f64::EPSILON).unwrap_or_else(UnitQuaternion::identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn random_rotation(rng: &mut SmallRng) -> Matrix3<f64> {
        let axis = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let angle = rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI);
        *SO3::from_axis_angle(&axis, angle).matrix()
    }

    #[test]
    fn quaternion_round_trip_on_random_rotations() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1000 {
            let r = random_rotation(&mut rng);
            let q = quaternion_from_matrix(&r);
            let back = matrix_from_quaternion(&q);
            assert!((back - r).norm() < 1e-9, "round trip drifted for {r}");
            assert!(q.w >= 0.0);
        }
    }

    #[test]
    fn quaternion_branches_cover_half_turns() {
        let half_turns = [
            Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0),
            Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0),
            Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0),
        ];
        for r in half_turns {
            let q = quaternion_from_matrix(&r);
            assert_relative_eq!(q.w, 0.0, epsilon = 1e-12);
            assert_relative_eq!(matrix_from_quaternion(&q), r, epsilon = 1e-12);
        }
    }

    #[test]
    fn quaternion_matches_nalgebra_up_to_sign() {
        let rotation = UnitQuaternion::from_euler_angles(0.3, -1.2, 2.5);
        let matrix = rotation.to_rotation_matrix().into_inner();
        let ours = quaternion_from_matrix(&matrix);
        let dot = ours.coords.dot(&rotation.coords).abs();
        assert_relative_eq!(dot, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn orthonormalize_repairs_drifted_rotation() {
        let mut rng = SmallRng::seed_from_u64(11);
        let r = random_rotation(&mut rng);
        let noisy = r + Matrix3::from_fn(|i, j| 1e-4 * ((i * 3 + j) as f64 - 4.0));
        let repaired = SO3::from_matrix(&noisy);

        assert!(repaired.orthonormality_error() < 1e-12);
        assert!((repaired.matrix() - r).norm() < 1e-3);
    }

    #[test]
    fn orthonormalize_never_returns_reflection() {
        let reflection = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0);
        let repaired = orthonormalize(&reflection);
        assert_relative_eq!(repaired.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn so3_roundtrip_log_exp() {
        let omega = Vector3::new(0.2, -0.1, 0.05);
        let rotation = SO3::exp(&omega);
        assert_relative_eq!(omega, rotation.log(), epsilon = 1e-9);
        assert_relative_eq!(rotation.angle(), omega.norm(), epsilon = 1e-9);
    }

    #[test]
    fn normalization_handles_zero_quaternion() {
        let zero = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        let unit = normalize_quaternion(&zero);
        assert_relative_eq!(unit.quaternion(), &Quaternion::identity());
    }
}
