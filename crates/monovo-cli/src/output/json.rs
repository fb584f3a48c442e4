use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use monovo_core::contracts::{FrameFailure, TrackingState};
use monovo_core::{CameraIntrinsics, LandmarkPoint, TrajectoryRecord};
use serde::{Deserialize, Serialize};

use crate::config::IntrinsicsSource;
use crate::errors::Result;
use crate::providers::{DatasetFormat, FrameRange};

/// Complete result document of one processed sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutput {
    pub metadata: Metadata,
    /// Frames handed to the pipeline so far.
    pub processed_frames: usize,
    /// Frames in the source sequence, before range and stride.
    pub total_frames: usize,
    pub trajectory: Vec<TrajectoryRecord>,
    pub point_cloud: Vec<CloudPoint>,
    pub frame_stats: Vec<FrameStat>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub dataset_name: String,
    pub dataset_path: String,
    pub format: DatasetFormat,
    pub range: FrameRange,
    pub intrinsics: CameraIntrinsics,
    pub intrinsics_source: IntrinsicsSource,
    /// RFC 3339 time at which the document was written.
    pub generated_at: String,
}

impl Metadata {
    pub fn new(
        dataset_name: impl Into<String>,
        dataset_path: impl Into<String>,
        format: DatasetFormat,
        range: FrameRange,
        intrinsics: CameraIntrinsics,
        intrinsics_source: IntrinsicsSource,
    ) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            dataset_path: dataset_path.into(),
            format,
            range,
            intrinsics,
            intrinsics_source,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Re-stamps `generated_at` with the current time.
    pub fn touch(&mut self) {
        self.generated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// A map point as exported: grayscale intensity replicated into RGB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub observations: u32,
    pub confidence: f64,
}

impl From<&LandmarkPoint> for CloudPoint {
    fn from(point: &LandmarkPoint) -> Self {
        let [x, y, z] = point.xyz;
        Self {
            x,
            y,
            z,
            r: point.intensity,
            g: point.intensity,
            b: point.intensity,
            observations: point.observation_count,
            confidence: point.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameStat {
    pub frame: u64,
    pub timestamp: f64,
    pub tracking_state: TrackingState,
    pub keypoints: usize,
    pub matches: usize,
    pub inliers: usize,
    pub new_points: usize,
    pub stationary: bool,
    pub processing_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FrameFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub tracking_frames: usize,
    pub lost_frames: usize,
    pub landmarks: usize,
    pub average_processing_ms: f64,
    pub elapsed_seconds: f64,
    pub stopped_by_budget: bool,
}

/// Pretty-printed JSON, replacing any existing file.
pub fn write_json(path: impl AsRef<Path>, output: &ProcessingOutput) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, output)?;
    Ok(())
}

/// `results.json` checkpointed at frame 50 becomes `results.frame_50.json`.
pub fn checkpoint_path(output: &Path, frame_index: u64) -> PathBuf {
    output.with_extension(format!("frame_{frame_index}.json"))
}
