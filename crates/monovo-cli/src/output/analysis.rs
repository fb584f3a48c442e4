use monovo_core::contracts::{FrameResult, TrackingState};
use monovo_core::VoPipeline;

use super::json::{CloudPoint, FrameStat, Metadata, ProcessingOutput, Summary};

/// Collects per-frame statistics while a sequence is processed.
pub struct AnalysisCollector {
    metadata: Metadata,
    total_frames: usize,
    frame_stats: Vec<FrameStat>,
}

impl AnalysisCollector {
    pub fn new(metadata: Metadata, total_frames: usize) -> Self {
        Self {
            metadata,
            total_frames,
            frame_stats: Vec::new(),
        }
    }

    pub fn add_frame(&mut self, result: &FrameResult, processing_ms: f64) {
        self.frame_stats.push(FrameStat {
            frame: result.frame_index,
            timestamp: result.timestamp,
            tracking_state: result.tracking_state,
            keypoints: result.keypoint_count,
            matches: result.matched_feature_count,
            inliers: result.inlier_count,
            new_points: result.new_points.len(),
            stationary: result.stationary,
            processing_ms,
            failure: result.failure.clone(),
        });
    }

    pub fn frames(&self) -> usize {
        self.frame_stats.len()
    }

    /// Document for the state reached so far; used for checkpoints.
    pub fn snapshot(
        &self,
        pipeline: &VoPipeline,
        elapsed_seconds: f64,
        stopped_by_budget: bool,
    ) -> ProcessingOutput {
        build(
            self.metadata.clone(),
            self.total_frames,
            self.frame_stats.clone(),
            pipeline,
            elapsed_seconds,
            stopped_by_budget,
        )
    }

    pub fn finalize(
        self,
        pipeline: &VoPipeline,
        elapsed_seconds: f64,
        stopped_by_budget: bool,
    ) -> ProcessingOutput {
        build(
            self.metadata,
            self.total_frames,
            self.frame_stats,
            pipeline,
            elapsed_seconds,
            stopped_by_budget,
        )
    }
}

fn build(
    mut metadata: Metadata,
    total_frames: usize,
    frame_stats: Vec<FrameStat>,
    pipeline: &VoPipeline,
    elapsed_seconds: f64,
    stopped_by_budget: bool,
) -> ProcessingOutput {
    metadata.touch();

    let tracking_frames = frame_stats
        .iter()
        .filter(|s| s.tracking_state == TrackingState::Tracking)
        .count();
    let average_processing_ms = if frame_stats.is_empty() {
        0.0
    } else {
        frame_stats.iter().map(|s| s.processing_ms).sum::<f64>() / frame_stats.len() as f64
    };
    let point_cloud: Vec<CloudPoint> = pipeline.map().iter().map(CloudPoint::from).collect();

    ProcessingOutput {
        metadata,
        processed_frames: frame_stats.len(),
        total_frames,
        trajectory: pipeline.trajectory().records().to_vec(),
        summary: Summary {
            tracking_frames,
            lost_frames: frame_stats.len() - tracking_frames,
            landmarks: point_cloud.len(),
            average_processing_ms,
            elapsed_seconds,
            stopped_by_budget,
        },
        point_cloud,
        frame_stats,
    }
}
