use serde::{Deserialize, Serialize};

use crate::epipolar::{MIN_CORRESPONDENCES, RelativePoseConfig};
use crate::error::{Result, VoError};
use crate::map::MapConfig;
use crate::math::CameraIntrinsics;
use crate::track::{FeatureConfig, MatcherConfig};
use crate::triangulate::TriangulationConfig;

/// Immutable pipeline configuration, captured once at construction.
///
/// Every field has a default so partial YAML/JSON documents deserialize.
/// Intrinsics have no default: a pipeline built without them fails with
/// [`VoError::CalibrationMissing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoConfig {
    pub camera: Option<CameraIntrinsics>,
    pub features: FeatureConfig,
    pub matcher: MatcherConfig,
    pub relative_pose: RelativePoseConfig,
    pub triangulation: TriangulationConfig,
    pub map: MapConfig,
    /// Frames with fewer keypoints are reported LOST.
    pub min_keypoints: usize,
    /// Length assigned to each unit translation step.
    pub translation_scale: f64,
}

impl Default for VoConfig {
    fn default() -> Self {
        Self {
            camera: None,
            features: FeatureConfig::default(),
            matcher: MatcherConfig::default(),
            relative_pose: RelativePoseConfig::default(),
            triangulation: TriangulationConfig::default(),
            map: MapConfig::default(),
            min_keypoints: MIN_CORRESPONDENCES,
            translation_scale: 1.0,
        }
    }
}

impl VoConfig {
    pub fn with_camera(mut self, camera: CameraIntrinsics) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Checks numeric ranges. Intrinsics are validated when present.
    pub fn validate(&self) -> Result<()> {
        if let Some(camera) = &self.camera {
            camera.validate()?;
        }

        let invalid = |reason: String| Err(VoError::InvalidConfig(reason));
        if !(self.translation_scale.is_finite() && self.translation_scale > 0.0) {
            return invalid(format!(
                "translation_scale must be positive, got {}",
                self.translation_scale
            ));
        }
        if self.features.pyramid_levels == 0 || self.features.max_features == 0 {
            return invalid("features need at least one pyramid level and one feature".into());
        }
        if self.matcher.max_matches < MIN_CORRESPONDENCES {
            return invalid(format!(
                "matcher.max_matches must be at least {MIN_CORRESPONDENCES}, got {}",
                self.matcher.max_matches
            ));
        }
        if let Some(ratio) = self.matcher.ratio_threshold
            && !(ratio > 0.0 && ratio <= 1.0)
        {
            return invalid(format!("matcher.ratio_threshold must be in (0, 1], got {ratio}"));
        }

        let pose = &self.relative_pose;
        if !(pose.ransac_threshold_px > 0.0) {
            return invalid("relative_pose.ransac_threshold_px must be positive".into());
        }
        if !(pose.confidence > 0.0 && pose.confidence < 1.0) {
            return invalid(format!(
                "relative_pose.confidence must be in (0, 1), got {}",
                pose.confidence
            ));
        }
        if pose.max_iterations == 0 {
            return invalid("relative_pose.max_iterations must be positive".into());
        }
        if !(0.0..=1.0).contains(&pose.min_inlier_ratio) {
            return invalid(format!(
                "relative_pose.min_inlier_ratio must be in [0, 1], got {}",
                pose.min_inlier_ratio
            ));
        }
        if !(pose.min_parallax_px >= 0.0) {
            return invalid("relative_pose.min_parallax_px must not be negative".into());
        }

        let tri = &self.triangulation;
        if !(tri.max_reprojection_error_px > 0.0 && tri.max_depth > 0.0) {
            return invalid("triangulation thresholds must be positive".into());
        }
        if !(tri.min_triangulation_angle_deg >= 0.0) {
            return invalid("triangulation.min_triangulation_angle_deg must not be negative".into());
        }

        if !(self.map.merge_radius.is_finite() && self.map.merge_radius > 0.0) {
            return invalid(format!(
                "map.merge_radius must be positive, got {}",
                self.map.merge_radius
            ));
        }
        if self.map.max_points == 0 {
            return invalid("map.max_points must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_without_camera() {
        assert!(VoConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let json = r#"{
            "camera": {"fx": 400.0, "fy": 400.0, "cx": 320.0, "cy": 240.0, "width": 640, "height": 480},
            "map": {"max_points": 10}
        }"#;
        let config: VoConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.map.max_points, 10);
        assert_eq!(config.map.merge_radius, MapConfig::default().merge_radius);
        assert_eq!(config.matcher, MatcherConfig::default());
        assert!(config.camera.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = VoConfig::default();
        config.translation_scale = 0.0;
        assert!(matches!(config.validate(), Err(VoError::InvalidConfig(_))));

        let mut config = VoConfig::default();
        config.relative_pose.confidence = 1.0;
        assert!(config.validate().is_err());

        let mut config = VoConfig::default();
        config.map.merge_radius = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_camera_is_reported_as_calibration_error() {
        let config = VoConfig::default()
            .with_camera(CameraIntrinsics::pinhole(-1.0, 400.0, 320.0, 240.0, 640, 480));
        assert!(matches!(
            config.validate(),
            Err(VoError::InvalidCalibration(_))
        ));
    }
}
