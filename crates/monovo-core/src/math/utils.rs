use nalgebra::{Matrix3, Vector3};

/// Returns the 3x3 skew-symmetric matrix for the provided 3D vector.
///
/// The resulting matrix satisfies `skew(v) * w == v.cross(&w)` for any vector `w`.
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Median of a slice of finite values. Returns `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn skew_matches_cross_product() {
        let v = Vector3::new(1.0, -2.0, 0.5);
        let w = Vector3::new(0.25, 0.5, -1.5);

        let lhs = skew_symmetric(&v) * w;
        let rhs = v.cross(&w);

        assert_relative_eq!(lhs, rhs, epsilon = 1e-12);
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }
}
