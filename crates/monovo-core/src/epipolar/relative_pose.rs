use log::{debug, trace};
use nalgebra::{Matrix3, Vector2, Vector3};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use super::essential::{
    EssentialEstimate, NormalizedMatch, choose_pose, estimate_essential,
    project_to_essential_manifold, sampson_error,
};
use crate::error::{Result, VoError};
use crate::math::{CameraIntrinsics, SE3, SO3, median};

/// Minimal sample size of the eight-point algorithm.
pub const MIN_CORRESPONDENCES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativePoseConfig {
    /// Sampson distance threshold in pixels, converted through the mean focal length.
    pub ransac_threshold_px: f64,
    pub confidence: f64,
    pub max_iterations: usize,
    pub min_inliers: usize,
    pub min_inlier_ratio: f64,
    /// Below this median displacement (pixels) the frame pair counts as stationary.
    pub min_parallax_px: f64,
    pub seed: u64,
}

impl Default for RelativePoseConfig {
    fn default() -> Self {
        Self {
            ransac_threshold_px: 1.0,
            confidence: 0.999,
            max_iterations: 1000,
            min_inliers: MIN_CORRESPONDENCES,
            min_inlier_ratio: 0.5,
            min_parallax_px: 1.0,
            seed: 0x5EED_CAFE,
        }
    }
}

/// Relative motion between two frames with `X_curr = R X_prev + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativePose {
    pub rotation: SO3,
    /// Unit direction, or zero for a stationary pair.
    pub translation: Vector3<f64>,
    /// One flag per input correspondence.
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
    pub stationary: bool,
    pub average_sampson_error: f64,
}

impl RelativePose {
    /// Motion of the current camera expressed in the previous camera frame
    /// (`T_prev<-curr`), with the unit translation scaled by `scale`.
    pub fn motion(&self, scale: f64) -> SE3 {
        let rotation = self.rotation.inverse();
        let translation = -(rotation.matrix() * self.translation) * scale;
        SE3::from_parts(rotation, translation)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelativePoseEstimator {
    config: RelativePoseConfig,
}

impl RelativePoseEstimator {
    pub fn new(config: RelativePoseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelativePoseConfig {
        &self.config
    }

    /// Robust relative pose from pixel correspondences `points_prev[i] <-> points_curr[i]`.
    pub fn estimate(
        &self,
        points_prev: &[Vector2<f64>],
        points_curr: &[Vector2<f64>],
        intrinsics: &CameraIntrinsics,
    ) -> Result<RelativePose> {
        let count = points_prev.len().min(points_curr.len());
        if count < MIN_CORRESPONDENCES {
            debug!(
                target: "monovo_core::epipolar",
                "insufficient correspondences for relative pose: {count} < {MIN_CORRESPONDENCES}"
            );
            return Err(VoError::InsufficientMatches {
                found: count,
                required: MIN_CORRESPONDENCES,
            });
        }

        let matches: Vec<NormalizedMatch> = points_prev[..count]
            .iter()
            .zip(&points_curr[..count])
            .map(|(prev, curr)| NormalizedMatch {
                prev: intrinsics.px_uv_to_norm_xy(prev),
                curr: intrinsics.px_uv_to_norm_xy(curr),
            })
            .collect();
        if matches
            .iter()
            .any(|m| !m.prev.iter().chain(m.curr.iter()).all(|v| v.is_finite()))
        {
            return Err(VoError::DegenerateEssentialMatrix(
                "non-finite correspondence".to_string(),
            ));
        }

        let focal = intrinsics.mean_focal();
        let displacements: Vec<f64> = matches.iter().map(|m| (m.curr - m.prev).norm()).collect();
        let median_displacement = median(&displacements).unwrap_or(0.0);
        if median_displacement < self.config.min_parallax_px / focal {
            debug!(
                target: "monovo_core::epipolar",
                "median displacement {:.3}px below parallax gate, treating pair as stationary",
                median_displacement * focal
            );
            return Ok(RelativePose {
                rotation: SO3::identity(),
                translation: Vector3::zeros(),
                inliers: vec![true; count],
                inlier_count: count,
                stationary: true,
                average_sampson_error: 0.0,
            });
        }

        let threshold = (self.config.ransac_threshold_px / focal).powi(2);
        let (model, inliers) = self.ransac(&matches, threshold)?;
        let (essential, inliers) = refine(&matches, &model, inliers, threshold);
        let inlier_count = inliers.iter().filter(|&&inlier| inlier).count();

        let floor = self
            .config
            .min_inliers
            .max((self.config.min_inlier_ratio * count as f64).ceil() as usize);
        if inlier_count < floor {
            debug!(
                target: "monovo_core::epipolar",
                "essential matrix rejected: {inlier_count} inliers below floor {floor}"
            );
            return Err(VoError::DegenerateEssentialMatrix(format!(
                "{inlier_count} inliers of {count} below floor {floor}"
            )));
        }

        let inlier_matches: Vec<NormalizedMatch> = matches
            .iter()
            .zip(&inliers)
            .filter(|(_, inlier)| **inlier)
            .map(|(m, _)| *m)
            .collect();
        let decomposition = choose_pose(&essential, &inlier_matches).ok_or_else(|| {
            VoError::DegenerateEssentialMatrix("decomposition failed".to_string())
        })?;
        if decomposition.in_front * 2 <= inlier_count {
            debug!(
                target: "monovo_core::epipolar",
                "cheirality check failed: {} of {inlier_count} inliers in front",
                decomposition.in_front
            );
            return Err(VoError::DegenerateEssentialMatrix(format!(
                "only {} of {inlier_count} inliers in front of both cameras",
                decomposition.in_front
            )));
        }

        let average_sampson_error = inlier_matches
            .iter()
            .map(|m| sampson_error(&essential, m))
            .sum::<f64>()
            / inlier_count as f64;

        debug!(
            target: "monovo_core::epipolar",
            "relative pose: {inlier_count}/{count} inliers, rotation {:.3} deg, avg sampson {:.3e}",
            SO3::from_matrix(&decomposition.rotation).angle().to_degrees(),
            average_sampson_error
        );

        Ok(RelativePose {
            rotation: SO3::from_matrix(&decomposition.rotation),
            translation: decomposition.translation,
            inliers,
            inlier_count,
            stationary: false,
            average_sampson_error,
        })
    }

    fn ransac(
        &self,
        matches: &[NormalizedMatch],
        threshold: f64,
    ) -> Result<(Matrix3<f64>, Vec<bool>)> {
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
        let mut required_iterations = self.config.max_iterations.max(1);
        let mut saw_degenerate = false;

        let mut iteration = 0usize;
        while iteration < required_iterations {
            iteration += 1;
            let subset: Vec<NormalizedMatch> = sample(&mut rng, matches.len(), MIN_CORRESPONDENCES)
                .iter()
                .map(|idx| matches[idx])
                .collect();
            let Some(estimate) = estimate_essential(&subset) else {
                continue;
            };
            if estimate.is_degenerate() {
                saw_degenerate = true;
                continue;
            }
            let Some(model) = project_to_essential_manifold(&estimate.essential) else {
                continue;
            };

            let inliers = score_inliers(matches, &model, threshold);
            let count = inliers.iter().filter(|&&inlier| inlier).count();
            if best.as_ref().is_none_or(|(_, _, best_count)| count > *best_count) {
                trace!(
                    target: "monovo_core::epipolar",
                    "RANSAC iteration {iteration}: new best with {count} inliers"
                );
                required_iterations = adaptive_iterations(
                    count as f64 / matches.len() as f64,
                    self.config.confidence,
                    self.config.max_iterations.max(1),
                );
                best = Some((model, inliers, count));
            }
        }

        match best {
            Some((model, inliers, _)) => Ok((model, inliers)),
            None => Err(VoError::DegenerateEssentialMatrix(if saw_degenerate {
                "essential matrix rank below 2 for every sample".to_string()
            } else {
                "no finite essential matrix found".to_string()
            })),
        }
    }
}

/// Refits the model on all inliers, keeping the refit only if it does not lose support.
fn refine(
    matches: &[NormalizedMatch],
    model: &Matrix3<f64>,
    inliers: Vec<bool>,
    threshold: f64,
) -> (Matrix3<f64>, Vec<bool>) {
    let support: Vec<NormalizedMatch> = matches
        .iter()
        .zip(&inliers)
        .filter(|(_, inlier)| **inlier)
        .map(|(m, _)| *m)
        .collect();
    let refit = estimate_essential(&support)
        .filter(|estimate: &EssentialEstimate| !estimate.is_degenerate())
        .and_then(|estimate| project_to_essential_manifold(&estimate.essential));
    let Some(refit) = refit else {
        return (*model, inliers);
    };

    let refit_inliers = score_inliers(matches, &refit, threshold);
    let before = inliers.iter().filter(|&&inlier| inlier).count();
    let after = refit_inliers.iter().filter(|&&inlier| inlier).count();
    if after >= before {
        (refit, refit_inliers)
    } else {
        (*model, inliers)
    }
}

fn score_inliers(matches: &[NormalizedMatch], essential: &Matrix3<f64>, threshold: f64) -> Vec<bool> {
    matches
        .iter()
        .map(|m| sampson_error(essential, m) < threshold)
        .collect()
}

/// Iterations needed to draw one all-inlier sample with probability `confidence`.
fn adaptive_iterations(inlier_ratio: f64, confidence: f64, cap: usize) -> usize {
    let all_inliers = inlier_ratio.powi(MIN_CORRESPONDENCES as i32);
    if all_inliers >= 1.0 - f64::EPSILON {
        return 1;
    }
    if all_inliers <= f64::EPSILON {
        return cap;
    }
    let needed = (1.0 - confidence).ln() / (1.0 - all_inliers).ln();
    if needed.is_finite() {
        (needed.ceil() as usize).clamp(1, cap)
    } else {
        cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use rand::Rng;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::pinhole(450.0, 450.0, 320.0, 240.0, 640, 480)
    }

    fn random_points(count: usize, seed: u64) -> Vec<Point3<f64>> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(4.0..10.0),
                )
            })
            .collect()
    }

    fn project_pair(
        points: &[Point3<f64>],
        rotation: &SO3,
        translation: &Vector3<f64>,
    ) -> (Vec<Vector2<f64>>, Vec<Vector2<f64>>) {
        let k = intrinsics();
        points
            .iter()
            .map(|p| {
                let prev = k.project_point(p).unwrap();
                let curr_cam = Point3::from(rotation.rotate(&p.coords) + translation);
                (prev, k.project_point(&curr_cam).unwrap())
            })
            .unzip()
    }

    #[test]
    fn recovers_pure_translation() {
        let points = random_points(40, 1);
        let camera_shift = Vector3::new(0.5, 0.0, 0.0);
        let translation = -camera_shift;
        let (prev, curr) = project_pair(&points, &SO3::identity(), &translation);

        let pose = RelativePoseEstimator::default()
            .estimate(&prev, &curr, &intrinsics())
            .expect("pose");

        assert!(!pose.stationary);
        assert_eq!(pose.inlier_count, points.len());
        assert!(pose.rotation.angle() < 1e-6);
        assert_relative_eq!(pose.translation, translation.normalize(), epsilon = 1e-6);
    }

    #[test]
    fn recovers_rotation_and_translation_with_outliers() {
        let points = random_points(120, 2);
        let rotation = SO3::from_axis_angle(&Vector3::new(0.0, 1.0, 0.1), 0.08);
        let translation = Vector3::new(0.2, -0.05, 0.3);
        let (prev, mut curr) = project_pair(&points, &rotation, &translation);

        let mut rng = SmallRng::seed_from_u64(3);
        for px in curr.iter_mut().take(20) {
            *px += Vector2::new(rng.gen_range(15.0..40.0), rng.gen_range(-40.0..-15.0));
        }

        let pose = RelativePoseEstimator::default()
            .estimate(&prev, &curr, &intrinsics())
            .expect("pose");

        assert!(pose.inlier_count >= 95);
        assert!(pose.inliers.iter().take(20).filter(|inlier| **inlier).count() <= 2);
        assert_relative_eq!(pose.rotation.matrix(), rotation.matrix(), epsilon = 1e-3);
        assert_relative_eq!(pose.translation, translation.normalize(), epsilon = 1e-2);
    }

    #[test]
    fn fewer_than_eight_correspondences_fail() {
        let points = random_points(7, 4);
        let (prev, curr) = project_pair(&points, &SO3::identity(), &Vector3::new(0.3, 0.0, 0.0));

        let result = RelativePoseEstimator::default().estimate(&prev, &curr, &intrinsics());
        assert_eq!(
            result,
            Err(VoError::InsufficientMatches {
                found: 7,
                required: 8
            })
        );
    }

    #[test]
    fn identical_observations_are_stationary() {
        let points = random_points(30, 5);
        let (prev, _) = project_pair(&points, &SO3::identity(), &Vector3::zeros());

        let pose = RelativePoseEstimator::default()
            .estimate(&prev, &prev, &intrinsics())
            .expect("stationary pose");

        assert!(pose.stationary);
        assert_eq!(pose.translation, Vector3::zeros());
        assert_eq!(pose.inlier_count, 30);
        assert_relative_eq!(pose.motion(1.0).to_homogeneous(), SE3::identity().to_homogeneous());
    }

    #[test]
    fn unrelated_points_are_rejected() {
        let mut rng = SmallRng::seed_from_u64(6);
        let mut pixel = || Vector2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0));
        let prev: Vec<_> = (0..60).map(|_| pixel()).collect();
        let curr: Vec<_> = (0..60).map(|_| pixel()).collect();

        let result = RelativePoseEstimator::default().estimate(&prev, &curr, &intrinsics());
        assert!(matches!(result, Err(VoError::DegenerateEssentialMatrix(_))));
    }

    #[test]
    fn motion_inverts_the_relative_transform() {
        let pose = RelativePose {
            rotation: SO3::from_axis_angle(&Vector3::y(), 0.2),
            translation: Vector3::new(0.0, 0.0, -1.0),
            inliers: Vec::new(),
            inlier_count: 0,
            stationary: false,
            average_sampson_error: 0.0,
        };
        let motion = pose.motion(2.0);
        let point_curr = Point3::new(0.3, -0.2, 4.0);
        let point_prev = motion.transform_point(&point_curr);
        let back = pose.rotation.rotate(&point_prev.coords) + pose.translation * 2.0;
        assert_relative_eq!(back, point_curr.coords, epsilon = 1e-12);
    }

    #[test]
    fn adaptive_iterations_shrink_with_inlier_ratio() {
        assert_eq!(adaptive_iterations(1.0, 0.999, 1000), 1);
        assert_eq!(adaptive_iterations(0.0, 0.999, 1000), 1000);
        let high = adaptive_iterations(0.9, 0.999, 1000);
        let low = adaptive_iterations(0.6, 0.999, 1000);
        assert!(high < low);
    }
}
