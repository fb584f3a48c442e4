//! Trajectory accuracy against a TUM-format ground truth.
//!
//! Monocular estimates carry an arbitrary scale, so the estimate is aligned to
//! the ground truth with a similarity transform before errors are measured.

use log::{debug, info};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::errors::{CliError, Result};
use crate::output::tum::TumPose;

/// Default association tolerance in seconds.
pub const DEFAULT_MAX_TIME_DIFF: f64 = 0.02;

/// `x -> scale * R * x + t`
#[derive(Debug, Clone, PartialEq)]
pub struct Similarity {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Similarity {
    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.scale * (self.rotation * point) + self.translation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMetrics {
    /// Estimate/ground-truth pairs used.
    pub pairs: usize,
    /// Scale applied to the estimate by the alignment.
    pub scale: f64,
    pub ate_rmse: f64,
    pub ate_max: f64,
    pub rpe_rmse: f64,
}

/// Least-squares similarity mapping `source` onto `target` (Umeyama, 1991).
///
/// Returns `None` for fewer than three pairs, mismatched lengths, or a source
/// with no spread.
pub fn umeyama(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
    with_scale: bool,
) -> Option<Similarity> {
    let n = source.len();
    if n < 3 || n != target.len() {
        return None;
    }
    let inv_n = 1.0 / n as f64;
    let mean_source = source.iter().sum::<Vector3<f64>>() * inv_n;
    let mean_target = target.iter().sum::<Vector3<f64>>() * inv_n;

    let mut covariance = Matrix3::zeros();
    let mut source_variance = 0.0;
    for (s, t) in source.iter().zip(target) {
        let ds = s - mean_source;
        covariance += (t - mean_target) * ds.transpose();
        source_variance += ds.norm_squared();
    }
    covariance *= inv_n;
    source_variance *= inv_n;
    if source_variance < f64::EPSILON {
        return None;
    }

    let svd = covariance.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut signs = Vector3::repeat(1.0);
    if u.determinant() * v_t.determinant() < 0.0 {
        signs[svd.singular_values.imin()] = -1.0;
    }
    let rotation = u * Matrix3::from_diagonal(&signs) * v_t;
    let scale = if with_scale {
        svd.singular_values.dot(&signs) / source_variance
    } else {
        1.0
    };
    let translation = mean_target - scale * (rotation * mean_source);

    Some(Similarity {
        rotation,
        translation,
        scale,
    })
}

/// Pairs each estimate with the nearest ground-truth stamp within `max_dt`.
///
/// Both inputs must be sorted by timestamp. A ground-truth pose is used at most once.
pub fn associate(estimate: &[TumPose], groundtruth: &[TumPose], max_dt: f64) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for (i, pose) in estimate.iter().enumerate() {
        let split = groundtruth.partition_point(|gt| gt.timestamp < pose.timestamp);
        let nearest = [split.checked_sub(1), Some(split)]
            .into_iter()
            .flatten()
            .filter(|&j| j < groundtruth.len())
            .min_by(|&a, &b| {
                let da = (groundtruth[a].timestamp - pose.timestamp).abs();
                let db = (groundtruth[b].timestamp - pose.timestamp).abs();
                da.total_cmp(&db)
            });
        let Some(j) = nearest else { continue };
        if (groundtruth[j].timestamp - pose.timestamp).abs() > max_dt {
            continue;
        }
        if pairs.last().is_some_and(|&(_, last)| last == j) {
            continue;
        }
        pairs.push((i, j));
    }
    pairs
}

fn rmse(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt()
}

/// ATE and translational RPE after similarity alignment.
pub fn evaluate(
    estimate: &[TumPose],
    groundtruth: &[TumPose],
    max_dt: f64,
) -> Result<TrajectoryMetrics> {
    let pairs = associate(estimate, groundtruth, max_dt);
    debug!(
        "associated {} of {} estimated poses within {max_dt}s",
        pairs.len(),
        estimate.len()
    );
    if pairs.len() < 3 {
        return Err(CliError::Evaluation(format!(
            "only {} poses could be associated (need 3); check timestamps and --max-time-diff",
            pairs.len()
        )));
    }

    let source: Vec<Vector3<f64>> = pairs.iter().map(|&(i, _)| estimate[i].position).collect();
    let target: Vec<Vector3<f64>> = pairs
        .iter()
        .map(|&(_, j)| groundtruth[j].position)
        .collect();
    let alignment = umeyama(&source, &target, true).ok_or_else(|| {
        CliError::Evaluation("estimated trajectory has no spread to align".into())
    })?;
    let aligned: Vec<Vector3<f64>> = source.iter().map(|p| alignment.apply(p)).collect();

    let ate: Vec<f64> = aligned
        .iter()
        .zip(&target)
        .map(|(a, t)| (a - t).norm())
        .collect();
    let rpe: Vec<f64> = aligned
        .windows(2)
        .zip(target.windows(2))
        .map(|(a, t)| ((a[1] - a[0]) - (t[1] - t[0])).norm())
        .collect();

    let metrics = TrajectoryMetrics {
        pairs: pairs.len(),
        scale: alignment.scale,
        ate_rmse: rmse(&ate),
        ate_max: ate.iter().copied().fold(0.0, f64::max),
        rpe_rmse: rmse(&rpe),
    };
    info!(
        "ATE RMSE {:.4} m, RPE RMSE {:.4} m over {} pairs (scale {:.3})",
        metrics.ate_rmse, metrics.rpe_rmse, metrics.pairs, metrics.scale
    );
    Ok(metrics)
}
