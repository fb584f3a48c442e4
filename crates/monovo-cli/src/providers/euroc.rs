use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use log::{info, warn};
use monovo_core::{CameraIntrinsics, DistortionModel};
use serde::Deserialize;

use super::{Dataset, DatasetFormat, ImageEntry, Media};
use crate::errors::{CliError, Result};

/// Camera block of an ASL/EuRoC `sensor.yaml`. Unlisted keys are ignored.
#[derive(Debug, Clone, Deserialize)]
struct SensorYaml {
    #[serde(default)]
    camera_model: Option<String>,
    /// `[fu, fv, cu, cv]`
    intrinsics: Vec<f64>,
    /// `[width, height]`
    resolution: Vec<u32>,
    #[serde(default)]
    distortion_model: Option<String>,
    #[serde(default)]
    distortion_coefficients: Vec<f64>,
}

/// Loader for ASL/EuRoC sequences (`mav0/cam0`). Only the left camera is used.
pub struct EurocProvider;

impl EurocProvider {
    pub fn load(root: &Path) -> Result<Dataset> {
        let cam0 = Self::cam0_dir(root)?;
        let entries = Self::parse_image_list(&cam0.join("data.csv"), &cam0.join("data"))?;

        let sensor = cam0.join("sensor.yaml");
        let calibration = if sensor.exists() {
            Some(Self::parse_sensor_yaml(&sensor)?)
        } else {
            warn!("{} not found; intrinsics must be given explicitly", sensor.display());
            None
        };

        Ok(Dataset {
            name: Dataset::name_of(root),
            root: root.to_path_buf(),
            format: DatasetFormat::Euroc,
            media: Media::Images(entries),
            calibration,
        })
    }

    /// Accepts the sequence folder, its `mav0` folder, or anything holding `cam0/`.
    fn cam0_dir(root: &Path) -> Result<PathBuf> {
        [root.join("mav0").join("cam0"), root.join("cam0")]
            .into_iter()
            .find(|dir| dir.join("data.csv").is_file())
            .ok_or_else(|| CliError::layout(root, "neither mav0/cam0/data.csv nor cam0/data.csv exists"))
    }

    /// Parses `#timestamp [ns],filename` rows.
    pub fn parse_image_list(csv_path: &Path, image_dir: &Path) -> Result<Vec<ImageEntry>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(csv_path)?;

        let mut entries = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let line = record.position().map_or(row + 1, |p| p.line() as usize);
            if record.len() < 2 {
                return Err(CliError::Parse {
                    path: csv_path.display().to_string(),
                    line,
                    message: format!("expected timestamp and filename, found {} columns", record.len()),
                });
            }
            let timestamp_ns: u64 = record[0].parse().map_err(|e| CliError::Parse {
                path: csv_path.display().to_string(),
                line,
                message: format!("invalid timestamp '{}': {e}", &record[0]),
            })?;
            entries.push(ImageEntry {
                timestamp: timestamp_ns as f64 * 1e-9,
                path: image_dir.join(&record[1]),
            });
        }

        info!("loaded {} image entries from {}", entries.len(), csv_path.display());
        Ok(entries)
    }

    pub fn parse_sensor_yaml(path: &Path) -> Result<CameraIntrinsics> {
        let contents = std::fs::read_to_string(path)?;
        // Some exports start with an OpenCV-style `%YAML:1.0` directive.
        let body: String = contents
            .lines()
            .filter(|line| !line.trim_start().starts_with('%'))
            .collect::<Vec<_>>()
            .join("\n");
        let sensor: SensorYaml = serde_yaml::from_str(&body)?;

        if let Some(model) = sensor.camera_model.as_deref()
            && model != "pinhole"
        {
            return Err(CliError::IntrinsicsLoad(format!(
                "{}: unsupported camera model '{model}'",
                path.display()
            )));
        }
        if let Some(model) = sensor.distortion_model.as_deref()
            && !matches!(model, "radial-tangential" | "radtan" | "none")
        {
            return Err(CliError::IntrinsicsLoad(format!(
                "{}: unsupported distortion model '{model}'",
                path.display()
            )));
        }
        let [fx, fy, cx, cy] = sensor.intrinsics[..] else {
            return Err(CliError::IntrinsicsLoad(format!(
                "{}: expected 4 intrinsics [fu, fv, cu, cv], got {}",
                path.display(),
                sensor.intrinsics.len()
            )));
        };
        let [width, height] = sensor.resolution[..] else {
            return Err(CliError::IntrinsicsLoad(format!(
                "{}: expected resolution [width, height]",
                path.display()
            )));
        };

        let distortion = DistortionModel::from_coefficients(&sensor.distortion_coefficients)?;
        let intrinsics =
            CameraIntrinsics::new(fx, fy, cx, cy, 0.0, width, height, distortion);
        intrinsics.validate()?;
        Ok(intrinsics)
    }
}
