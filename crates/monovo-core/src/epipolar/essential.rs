use nalgebra::{DMatrix, Matrix3, Matrix3x4, Vector2, Vector3};

use crate::triangulate::linear_triangulation;

/// A correspondence in normalized (undistorted, intrinsics-free) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedMatch {
    pub prev: Vector2<f64>,
    pub curr: Vector2<f64>,
}

/// Essential matrix with singular values `(s0, s1, s2)` in descending order,
/// as estimated before projection onto the essential manifold.
#[derive(Debug, Clone, Copy)]
pub struct EssentialEstimate {
    pub essential: Matrix3<f64>,
    pub singular_values: [f64; 3],
}

impl EssentialEstimate {
    /// Rank-deficient beyond the expected rank 2.
    pub fn is_degenerate(&self) -> bool {
        let [s0, s1, _] = self.singular_values;
        !s0.is_finite() || s0 <= f64::EPSILON || s1 < 1e-6 * s0
    }
}

/// One of the four `(R, t)` decompositions of an essential matrix, in the
/// convention `X_curr = R X_prev + t` with unit `t`.
#[derive(Debug, Clone, Copy)]
pub struct DecomposedEssential {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Correspondences triangulated in front of both cameras.
    pub in_front: usize,
}

/// Normalized eight-point estimate from `>= 8` correspondences (Hartley normalization).
pub fn estimate_essential(matches: &[NormalizedMatch]) -> Option<EssentialEstimate> {
    if matches.len() < 8 {
        return None;
    }
    let (points_prev, t_prev) = normalize_points(matches.iter().map(|m| m.prev));
    let (points_curr, t_curr) = normalize_points(matches.iter().map(|m| m.curr));

    // At least 9 rows so the SVD exposes the full right null space.
    let mut a = DMatrix::<f64>::zeros(matches.len().max(9), 9);
    for (row, (p1, p2)) in points_prev.iter().zip(&points_curr).enumerate() {
        let (x1, y1, x2, y2) = (p1.x, p1.y, p2.x, p2.y);
        a[(row, 0)] = x2 * x1;
        a[(row, 1)] = x2 * y1;
        a[(row, 2)] = x2;
        a[(row, 3)] = y2 * x1;
        a[(row, 4)] = y2 * y1;
        a[(row, 5)] = y2;
        a[(row, 6)] = x1;
        a[(row, 7)] = y1;
        a[(row, 8)] = 1.0;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let e_vec = v_t.row(svd.singular_values.imin());
    let e = Matrix3::from_fn(|r, c| e_vec[r * 3 + c]);
    let e = t_curr.transpose() * e * t_prev;
    if !e.iter().all(|v| v.is_finite()) {
        return None;
    }

    let mut singular_values: Vec<f64> = e.singular_values().iter().copied().collect();
    singular_values.sort_by(|a, b| b.total_cmp(a));
    Some(EssentialEstimate {
        essential: e,
        singular_values: [singular_values[0], singular_values[1], singular_values[2]],
    })
}

fn normalize_points(
    points: impl Iterator<Item = Vector2<f64>>,
) -> (Vec<Vector2<f64>>, Matrix3<f64>) {
    let points: Vec<_> = points.collect();
    let count = points.len() as f64;
    let centroid = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / count;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / count;
    let scale = if mean_dist.abs() < f64::EPSILON {
        1.0
    } else {
        std::f64::consts::SQRT_2 / mean_dist
    };

    let transform = Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    );
    let transformed = points.iter().map(|p| (p - centroid) * scale).collect();
    (transformed, transform)
}

/// Closest essential matrix: singular values forced to `(1, 1, 0)`.
pub fn project_to_essential_manifold(e: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = e.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let weakest = svd.singular_values.imin();
    let mut diag = Vector3::repeat(1.0);
    diag[weakest] = 0.0;
    Some(u * Matrix3::from_diagonal(&diag) * v_t)
}

/// First-order geometric (Sampson) error, in squared normalized units.
pub fn sampson_error(e: &Matrix3<f64>, m: &NormalizedMatch) -> f64 {
    let x1 = Vector3::new(m.prev.x, m.prev.y, 1.0);
    let x2 = Vector3::new(m.curr.x, m.curr.y, 1.0);
    let ex1 = e * x1;
    let etx2 = e.transpose() * x2;
    let denom = ex1.x.powi(2) + ex1.y.powi(2) + etx2.x.powi(2) + etx2.y.powi(2);
    if denom < 1e-12 {
        return f64::MAX;
    }
    let num = x2.dot(&ex1);
    num * num / denom
}

/// Decomposes `e` into its four `(R, t)` candidates and keeps the one that
/// puts the most correspondences in front of both cameras.
pub fn choose_pose(e: &Matrix3<f64>, matches: &[NormalizedMatch]) -> Option<DecomposedEssential> {
    let svd = e.svd(true, true);
    let mut u = svd.u?;
    let mut v_t = svd.v_t?;
    let weakest = svd.singular_values.imin();

    // Reorder so the null direction is the third column of U / row of V^T.
    if weakest != 2 {
        u.swap_columns(weakest, 2);
        v_t.swap_rows(weakest, 2);
    }
    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }

    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).normalize();

    let reference = Matrix3x4::identity();
    [(r1, t), (r1, -t), (r2, t), (r2, -t)]
        .into_iter()
        .map(|(rotation, translation)| {
            let projection = compose_projection(&rotation, &translation);
            let in_front = matches
                .iter()
                .filter(|m| {
                    linear_triangulation(&reference, &projection, &m.prev, &m.curr).is_some_and(
                        |point| {
                            let cam2 = rotation * point.coords + translation;
                            point.z > 0.0 && cam2.z > 0.0
                        },
                    )
                })
                .count();
            DecomposedEssential {
                rotation,
                translation,
                in_front,
            }
        })
        .max_by_key(|candidate| candidate.in_front)
}

pub fn compose_projection(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix3x4<f64> {
    let mut projection = Matrix3x4::zeros();
    projection.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    projection.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    projection
}
