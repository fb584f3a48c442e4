use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{info, warn};
use monovo_core::{FrameBudget, FrameSource, VoConfig, VoPipeline};
use rayon::prelude::*;

use crate::config::resolve_intrinsics;
use crate::errors::{CliError, Result};
use crate::output::{
    AnalysisCollector, Metadata, ProcessingOutput, checkpoint_path, ply, tum, write_json,
};
use crate::providers::{Dataset, DatasetFormat, FrameRange};

/// How every dataset of a run is read and processed.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub format: DatasetFormat,
    pub range: FrameRange,
    /// Playback rate for image folders.
    pub fps: f64,
    /// Write a checkpoint document every this many processed frames.
    pub checkpoint_every: Option<usize>,
    pub max_seconds: Option<f64>,
    pub vo: VoConfig,
    /// Overrides both the config's camera block and the dataset calibration.
    pub intrinsics: Option<monovo_core::CameraIntrinsics>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            format: DatasetFormat::Euroc,
            range: FrameRange::default(),
            fps: 20.0,
            checkpoint_every: None,
            max_seconds: None,
            vo: VoConfig::default(),
            intrinsics: None,
        }
    }
}

impl ProcessingConfig {
    fn budget(&self) -> FrameBudget {
        FrameBudget {
            max_frames: None,
            max_duration: self.max_seconds.map(Duration::from_secs_f64),
        }
    }
}

/// Destination files of one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub ply: Option<PathBuf>,
    pub tum: Option<PathBuf>,
}

impl OutputPaths {
    /// Inserts `_<name>` before each extension, so parallel streams never share a file.
    pub fn for_dataset(&self, name: &str) -> Self {
        Self {
            json: suffixed(&self.json, name),
            ply: self.ply.as_deref().map(|p| suffixed(p, name)),
            tum: self.tum.as_deref().map(|p| suffixed(p, name)),
        }
    }
}

fn suffixed(path: &Path, name: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let file = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{name}.{ext}"),
        None => format!("{stem}_{name}"),
    };
    path.with_file_name(file)
}

/// Runs the VO pipeline over recorded datasets and writes the results.
pub struct SequenceProcessor {
    config: ProcessingConfig,
}

impl SequenceProcessor {
    pub fn new(config: ProcessingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Processes every dataset as an independent stream, in parallel.
    ///
    /// With more than one dataset the output paths get the dataset name appended.
    pub fn process_all(
        &self,
        roots: &[PathBuf],
        outputs: &OutputPaths,
    ) -> Vec<(PathBuf, Result<ProcessingOutput>)> {
        let suffix = roots.len() > 1;
        roots
            .par_iter()
            .map(|root| {
                let result = Dataset::open(root, self.config.format, self.config.fps).and_then(
                    |dataset| {
                        let paths = if suffix {
                            outputs.for_dataset(&dataset.name)
                        } else {
                            outputs.clone()
                        };
                        self.process_dataset(&dataset, &paths)
                    },
                );
                (root.clone(), result)
            })
            .collect()
    }

    pub fn process_dataset(
        &self,
        dataset: &Dataset,
        outputs: &OutputPaths,
    ) -> Result<ProcessingOutput> {
        let (intrinsics, intrinsics_source) = resolve_intrinsics(
            self.config.intrinsics.as_ref(),
            &self.config.vo,
            dataset.calibration.as_ref(),
            &dataset.name,
        )?;
        info!(
            "[{}] intrinsics from {:?}: {}x{}, fx={:.2}, fy={:.2}",
            dataset.name,
            intrinsics_source,
            intrinsics.width,
            intrinsics.height,
            intrinsics.fx,
            intrinsics.fy
        );

        let mut frames = dataset.frames(&self.config.range)?;
        let selected = frames.remaining_hint();
        if selected == Some(0) {
            return Err(CliError::NoFrames(dataset.name.clone()));
        }
        let mut pipeline =
            VoPipeline::new(self.config.vo.clone().with_camera(intrinsics.clone()))?;

        let mut collector = AnalysisCollector::new(
            Metadata::new(
                dataset.name.clone(),
                dataset.root.display().to_string(),
                dataset.format,
                self.config.range,
                intrinsics.clone(),
                intrinsics_source,
            ),
            dataset.len(),
        );

        let checkpoint_every = self.config.checkpoint_every.filter(|every| *every > 0);
        let started = Instant::now();

        let summary = pipeline.run(
            &mut frames,
            self.config.budget(),
            |pipeline, result, processing| -> Result<()> {
                collector.add_frame(result, processing.as_secs_f64() * 1000.0);
                if let Some(every) = checkpoint_every
                    && collector.frames() % every == 0
                {
                    let path = checkpoint_path(&outputs.json, result.frame_index);
                    let snapshot =
                        collector.snapshot(pipeline, started.elapsed().as_secs_f64(), false);
                    write_json(&path, &snapshot)?;
                    info!(
                        "[{}] checkpoint {} ({} of {} selected frames)",
                        dataset.name,
                        path.display(),
                        collector.frames(),
                        selected.map_or_else(|| "?".to_string(), |n| n.to_string())
                    );
                }
                Ok(())
            },
        )?;
        if summary.frames_processed == 0 && !summary.stopped_by_budget {
            return Err(CliError::NoFrames(dataset.name.clone()));
        }
        if summary.stopped_by_budget {
            warn!(
                "[{}] time budget exhausted after {} frames",
                dataset.name, summary.frames_processed
            );
        }

        let output = collector.finalize(
            &pipeline,
            summary.elapsed_seconds,
            summary.stopped_by_budget,
        );
        write_json(&outputs.json, &output)?;
        if let Some(path) = &outputs.ply {
            ply::write_ply(path, &pipeline.map_snapshot())?;
        }
        if let Some(path) = &outputs.tum {
            tum::write_tum(path, pipeline.trajectory().records())?;
        }

        info!(
            "[{}] processed {} frames ({} tracking, {} lost), {} landmarks, {:.2} ms/frame",
            dataset.name,
            output.processed_frames,
            output.summary.tracking_frames,
            output.summary.lost_frames,
            output.summary.landmarks,
            output.summary.average_processing_ms
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_suffix_goes_before_extension() {
        let outputs = OutputPaths {
            json: PathBuf::from("/out/results.json"),
            ply: Some(PathBuf::from("cloud.ply")),
            tum: None,
        };
        let suffixed = outputs.for_dataset("MH_01_easy");
        assert_eq!(suffixed.json, PathBuf::from("/out/results_MH_01_easy.json"));
        assert_eq!(suffixed.ply, Some(PathBuf::from("cloud_MH_01_easy.ply")));
        assert_eq!(suffixed.tum, None);
    }

    #[test]
    fn budget_only_limits_time() {
        let config = ProcessingConfig {
            max_seconds: Some(1.5),
            ..ProcessingConfig::default()
        };
        let budget = config.budget();
        assert_eq!(budget.max_frames, None);
        assert_eq!(budget.max_duration, Some(Duration::from_millis(1500)));
    }
}
