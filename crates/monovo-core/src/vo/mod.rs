//! Per-stream orchestration: extract, match, estimate, integrate, triangulate, map.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nalgebra::Vector2;
use tracing::debug_span;

use crate::config::VoConfig;
use crate::contracts::{
    Frame, FrameBudget, FrameFailure, FrameResult, FrameSource, RunSummary, TrackingState,
};
use crate::epipolar::{MIN_CORRESPONDENCES, RelativePoseEstimator};
use crate::error::{Result, VoError};
use crate::map::{LandmarkMap, LandmarkPoint};
use crate::math::{CameraIntrinsics, SE3};
use crate::track::{FeatureSet, FeatureTracker, HammingFeatMatcher};
use crate::trajectory::{Trajectory, TrajectoryIntegrator};
use crate::triangulate::{Correspondence, Triangulator};

/// Stream state. `Lost` is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No frame has been processed yet.
    Empty,
    Tracking,
    Lost,
}

#[derive(Debug, Default)]
struct TrackOutcome {
    matched: usize,
    inliers: usize,
    stationary: bool,
    new_points: Vec<LandmarkPoint>,
}

/// Monocular VO pipeline for a single stream.
///
/// Owns the previous-frame feature cache, the global pose and the landmark
/// map; none of them are shared with other streams.
#[derive(Debug)]
pub struct VoPipeline {
    config: VoConfig,
    intrinsics: CameraIntrinsics,
    tracker: FeatureTracker,
    matcher: HammingFeatMatcher,
    estimator: RelativePoseEstimator,
    triangulator: Triangulator,
    map: LandmarkMap,
    integrator: TrajectoryIntegrator,
    previous: Option<FeatureSet>,
    state: PipelineState,
    last_stamp: Option<(u64, f64)>,
    consecutive_losses: usize,
    size_checked: bool,
}

impl VoPipeline {
    pub fn new(config: VoConfig) -> Result<Self> {
        let intrinsics = config.camera.clone().ok_or(VoError::CalibrationMissing)?;
        config.validate()?;

        info!(
            target: "monovo_core::vo",
            "VO pipeline ready: fx={:.1} fy={:.1} cx={:.1} cy={:.1} ({}x{})",
            intrinsics.fx,
            intrinsics.fy,
            intrinsics.cx,
            intrinsics.cy,
            intrinsics.width,
            intrinsics.height
        );

        Ok(Self {
            tracker: FeatureTracker::new(config.features),
            matcher: HammingFeatMatcher::new(config.matcher),
            estimator: RelativePoseEstimator::new(config.relative_pose),
            triangulator: Triangulator::new(config.triangulation),
            map: LandmarkMap::new(config.map),
            integrator: TrajectoryIntegrator::new(),
            previous: None,
            state: PipelineState::Empty,
            last_stamp: None,
            consecutive_losses: 0,
            size_checked: false,
            intrinsics,
            config,
        })
    }

    pub fn config(&self) -> &VoConfig {
        &self.config
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn global_pose(&self) -> &SE3 {
        self.integrator.global_pose()
    }

    pub fn trajectory(&self) -> &Trajectory {
        self.integrator.trajectory()
    }

    pub fn frames_processed(&self) -> usize {
        self.integrator.trajectory().len()
    }

    pub fn map(&self) -> &LandmarkMap {
        &self.map
    }

    pub fn map_snapshot(&self) -> Vec<LandmarkPoint> {
        self.map.snapshot()
    }

    /// Processes one image. Feature extraction overlaps with culling the map.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameResult {
        let (index, timestamp) = self.sanitize_stamp(frame.index, frame.timestamp);
        let _span = debug_span!("frame", index).entered();
        self.check_image_size(frame);

        let tracker = &self.tracker;
        let map = &mut self.map;
        let (features, _) = rayon::join(|| tracker.extract(&frame.image), || map.cull(index));
        self.step(index, timestamp, features)
    }

    /// Processes precomputed features, for callers that bring their own detector.
    pub fn process_features(
        &mut self,
        frame_index: u64,
        timestamp: f64,
        features: FeatureSet,
    ) -> FrameResult {
        let (index, timestamp) = self.sanitize_stamp(frame_index, timestamp);
        let _span = debug_span!("frame", index).entered();

        self.map.cull(index);
        self.step(index, timestamp, features)
    }

    /// Drains `source` until end of stream or until `budget` runs out.
    ///
    /// The budget is checked between frames only. `on_frame` sees the pipeline
    /// after each frame together with that frame's processing time; an error
    /// from it stops the run.
    pub fn run<S, F, E>(
        &mut self,
        source: &mut S,
        budget: FrameBudget,
        mut on_frame: F,
    ) -> std::result::Result<RunSummary, E>
    where
        S: FrameSource + ?Sized,
        E: From<S::Error>,
        F: FnMut(&VoPipeline, &FrameResult, Duration) -> std::result::Result<(), E>,
    {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        loop {
            if budget.is_exhausted(summary.frames_processed, started.elapsed()) {
                info!(
                    target: "monovo_core::vo",
                    "frame budget exhausted after {} frames",
                    summary.frames_processed
                );
                summary.stopped_by_budget = true;
                break;
            }
            let Some(frame) = source.next_frame()? else {
                break;
            };

            let frame_started = Instant::now();
            let result = self.process_frame(&frame);
            let processing = frame_started.elapsed();
            summary.frames_processed += 1;
            match result.tracking_state {
                TrackingState::Tracking => summary.tracking_frames += 1,
                TrackingState::Lost => summary.lost_frames += 1,
            }
            on_frame(self, &result, processing)?;
        }

        summary.elapsed_seconds = started.elapsed().as_secs_f64();
        Ok(summary)
    }

    fn step(&mut self, index: u64, timestamp: f64, features: FeatureSet) -> FrameResult {
        let keypoint_count = features.len();
        let previous = self.previous.take();
        let mut outcome = TrackOutcome::default();
        let tracked = match previous.as_ref() {
            None => self.check_keypoints(&features),
            Some(previous) => self.track(previous, &features, index, &mut outcome),
        };

        let (tracking_state, failure) = match tracked {
            Ok(()) => {
                if self.consecutive_losses > 0 {
                    info!(
                        target: "monovo_core::vo",
                        "tracking recovered at frame {index} after {} lost frames",
                        self.consecutive_losses
                    );
                    self.consecutive_losses = 0;
                }
                self.state = PipelineState::Tracking;
                (TrackingState::Tracking, None)
            }
            Err(error) => {
                self.consecutive_losses += 1;
                self.state = PipelineState::Lost;
                warn!(
                    target: "monovo_core::vo",
                    "frame {index} lost ({error}); consecutive: {}",
                    self.consecutive_losses
                );
                (TrackingState::Lost, FrameFailure::try_from(error).ok())
            }
        };

        let record = self.integrator.record(index, timestamp);
        self.previous = Some(features);

        debug!(
            target: "monovo_core::vo",
            "frame {index}: {keypoint_count} keypoints, {} matches, {} inliers, {} new points, pos=({:.3}, {:.3}, {:.3})",
            outcome.matched,
            outcome.inliers,
            outcome.new_points.len(),
            record.x,
            record.y,
            record.z
        );

        FrameResult {
            frame_index: index,
            timestamp,
            record,
            new_points: outcome.new_points,
            tracking_state,
            keypoint_count,
            matched_feature_count: outcome.matched,
            inlier_count: outcome.inliers,
            stationary: outcome.stationary,
            failure,
        }
    }

    fn check_image_size(&mut self, frame: &Frame) {
        if self.size_checked {
            return;
        }
        self.size_checked = true;
        let (width, height) = frame.image.dimensions();
        if (width, height) != (self.intrinsics.width, self.intrinsics.height) {
            warn!(
                target: "monovo_core::vo",
                "image size {width}x{height} differs from calibration {}x{}",
                self.intrinsics.width,
                self.intrinsics.height
            );
        }
    }

    fn check_keypoints(&self, features: &FeatureSet) -> Result<()> {
        if features.len() < self.config.min_keypoints {
            return Err(VoError::InsufficientFeatures {
                found: features.len(),
                required: self.config.min_keypoints,
            });
        }
        Ok(())
    }

    /// Tracks `current` against `previous`. Counts land in `outcome` as each
    /// stage completes, so a failed frame still reports how far it got.
    fn track(
        &mut self,
        previous: &FeatureSet,
        current: &FeatureSet,
        index: u64,
        outcome: &mut TrackOutcome,
    ) -> Result<()> {
        self.check_keypoints(current)?;

        let matches = self.matcher.match_sets(previous, current);
        outcome.matched = matches.len();
        if matches.len() < MIN_CORRESPONDENCES {
            return Err(VoError::InsufficientMatches {
                found: matches.len(),
                required: MIN_CORRESPONDENCES,
            });
        }

        let (points_prev, points_curr): (Vec<Vector2<f64>>, Vec<Vector2<f64>>) = matches
            .iter()
            .map(|m| {
                (
                    previous.keypoints[m.prev_idx].px_uv,
                    current.keypoints[m.curr_idx].px_uv,
                )
            })
            .unzip();
        let relative = self
            .estimator
            .estimate(&points_prev, &points_curr, &self.intrinsics)?;

        outcome.inliers = relative.inlier_count;
        outcome.stationary = relative.stationary;
        if relative.stationary {
            return Ok(());
        }

        let pose_prev = *self.integrator.global_pose();
        let pose_curr = *self
            .integrator
            .integrate(&relative.motion(self.config.translation_scale));

        let correspondences: Vec<Correspondence> = matches
            .iter()
            .zip(&relative.inliers)
            .filter(|(_, inlier)| **inlier)
            .map(|(m, _)| Correspondence {
                prev_px: previous.keypoints[m.prev_idx].px_uv,
                curr_px: current.keypoints[m.curr_idx].px_uv,
                intensity: current.keypoints[m.curr_idx].intensity,
            })
            .collect();
        let candidates =
            self.triangulator
                .triangulate(&pose_prev, &pose_curr, &correspondences, &self.intrinsics);
        outcome.new_points = self.map.insert(&candidates, index).inserted;
        Ok(())
    }

    /// Forces strictly increasing indices and finite, non-decreasing timestamps.
    fn sanitize_stamp(&mut self, index: u64, timestamp: f64) -> (u64, f64) {
        let last_timestamp = self.last_stamp.map_or(0.0, |(_, t)| t);
        let timestamp = if timestamp.is_finite() {
            timestamp
        } else {
            warn!(
                target: "monovo_core::vo",
                "frame {index} has non-finite timestamp {timestamp}; using {last_timestamp}"
            );
            last_timestamp
        };

        let (index, timestamp) = match self.last_stamp {
            None => (index, timestamp),
            Some((last_index, last_timestamp)) => {
                let index = if index <= last_index {
                    let next = last_index.saturating_add(1);
                    warn!(
                        target: "monovo_core::vo",
                        "frame index {index} does not follow {last_index}; using {next}"
                    );
                    next
                } else {
                    index
                };
                let timestamp = if timestamp < last_timestamp {
                    warn!(
                        target: "monovo_core::vo",
                        "timestamp {timestamp} precedes {last_timestamp}; clamping"
                    );
                    last_timestamp
                } else {
                    timestamp
                };
                (index, timestamp)
            }
        };
        self.last_stamp = Some((index, timestamp));
        (index, timestamp)
    }
}
