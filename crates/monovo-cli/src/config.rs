use std::path::Path;

use log::info;
use monovo_core::{CameraIntrinsics, DistortionModel, VoConfig};
use serde::{Deserialize, Serialize};

use crate::errors::{CliError, Result};

/// Camera calibration as written in an intrinsics YAML file.
///
/// ```yaml
/// width: 752
/// height: 480
/// fx: 458.654
/// fy: 457.296
/// cx: 367.215
/// cy: 248.375
/// distortion: [-0.2834, 0.0739, 0.0002, 1.76e-05]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrinsicsFile {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
    pub distortion: Option<Vec<f64>>,
}

impl IntrinsicsFile {
    pub fn into_intrinsics(self) -> Result<CameraIntrinsics> {
        let distortion = match self.distortion {
            Some(coefficients) => DistortionModel::from_coefficients(&coefficients)?,
            None => DistortionModel::None,
        };
        let intrinsics = CameraIntrinsics::new(
            self.fx,
            self.fy,
            self.cx,
            self.cy,
            self.skew,
            self.width,
            self.height,
            distortion,
        );
        intrinsics.validate()?;
        Ok(intrinsics)
    }
}

/// Loads an intrinsics YAML file.
pub fn load_intrinsics(path: impl AsRef<Path>) -> Result<CameraIntrinsics> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliError::IntrinsicsLoad(format!("failed to read {}: {e}", path.display()))
    })?;
    let file: IntrinsicsFile = serde_yaml::from_str(&contents)?;
    file.into_intrinsics()
}

/// Loads a pipeline configuration; missing fields take their defaults.
pub fn load_vo_config(path: impl AsRef<Path>) -> Result<VoConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config: VoConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    info!("loaded pipeline configuration from {}", path.display());
    Ok(config)
}

/// Where the intrinsics of a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntrinsicsSource {
    CommandLine,
    Config,
    Dataset,
}

/// Picks the intrinsics for one dataset: explicit file, then config, then the
/// dataset's own calibration.
pub fn resolve_intrinsics(
    explicit: Option<&CameraIntrinsics>,
    config: &VoConfig,
    dataset: Option<&CameraIntrinsics>,
    dataset_name: &str,
) -> Result<(CameraIntrinsics, IntrinsicsSource)> {
    if let Some(intrinsics) = explicit {
        return Ok((intrinsics.clone(), IntrinsicsSource::CommandLine));
    }
    if let Some(intrinsics) = &config.camera {
        return Ok((intrinsics.clone(), IntrinsicsSource::Config));
    }
    dataset
        .cloned()
        .map(|intrinsics| (intrinsics, IntrinsicsSource::Dataset))
        .ok_or_else(|| CliError::IntrinsicsMissing(dataset_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn intrinsics_file_with_distortion() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "width: 752\nheight: 480\nfx: 458.654\nfy: 457.296\ncx: 367.215\ncy: 248.375\ndistortion: [-0.28, 0.07, 0.0002, 0.00002]"
        )
        .unwrap();

        let intrinsics = load_intrinsics(file.path()).unwrap();
        assert_eq!(intrinsics.width, 752);
        assert!(matches!(
            intrinsics.distortion,
            DistortionModel::BrownConrady { k3, .. } if k3 == 0.0
        ));
    }

    #[test]
    fn invalid_intrinsics_are_rejected() {
        let file = IntrinsicsFile {
            width: 640,
            height: 480,
            fx: -1.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
            distortion: None,
        };
        assert!(matches!(
            file.into_intrinsics(),
            Err(CliError::Pipeline(_))
        ));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "translation_scale: 0.5\nmatcher:\n  max_matches: 200").unwrap();

        let config = load_vo_config(file.path()).unwrap();
        assert_eq!(config.translation_scale, 0.5);
        assert_eq!(config.matcher.max_matches, 200);
        assert_eq!(config.min_keypoints, VoConfig::default().min_keypoints);
        assert!(config.camera.is_none());
    }

    #[test]
    fn intrinsics_resolution_order() {
        let explicit = CameraIntrinsics::pinhole(1.0, 1.0, 0.0, 0.0, 10, 10);
        let from_config = CameraIntrinsics::pinhole(2.0, 2.0, 0.0, 0.0, 10, 10);
        let from_dataset = CameraIntrinsics::pinhole(3.0, 3.0, 0.0, 0.0, 10, 10);
        let config = VoConfig::default().with_camera(from_config.clone());

        let (picked, source) =
            resolve_intrinsics(Some(&explicit), &config, Some(&from_dataset), "seq").unwrap();
        assert_eq!((picked, source), (explicit, IntrinsicsSource::CommandLine));

        let (picked, source) =
            resolve_intrinsics(None, &config, Some(&from_dataset), "seq").unwrap();
        assert_eq!((picked, source), (from_config, IntrinsicsSource::Config));

        let (picked, source) =
            resolve_intrinsics(None, &VoConfig::default(), Some(&from_dataset), "seq").unwrap();
        assert_eq!((picked, source), (from_dataset, IntrinsicsSource::Dataset));

        assert!(matches!(
            resolve_intrinsics(None, &VoConfig::default(), None, "seq"),
            Err(CliError::IntrinsicsMissing(_))
        ));
    }
}
