use std::convert::Infallible;
use std::time::Duration;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::VoError;
use crate::map::LandmarkPoint;
use crate::trajectory::TrajectoryRecord;

/// One grayscale camera frame handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    /// Capture time in seconds.
    pub timestamp: f64,
    pub image: GrayImage,
}

impl Frame {
    pub fn new(index: u64, timestamp: f64, image: GrayImage) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }
}

/// Producer of frames in capture order. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    type Error;

    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error>;

    /// Number of frames left, when the source knows it.
    fn remaining_hint(&self) -> Option<usize> {
        None
    }
}

/// Adapts any iterator of frames into an infallible [`FrameSource`].
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Frame>,
{
    pub fn new(inner: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            inner: inner.into_iter(),
        }
    }
}

impl<I> FrameSource for IterSource<I>
where
    I: Iterator<Item = Frame>,
{
    type Error = Infallible;

    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
        Ok(self.inner.next())
    }

    fn remaining_hint(&self) -> Option<usize> {
        match self.inner.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingState {
    Tracking,
    Lost,
}

/// Why a frame fell back to the carried-forward pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameFailure {
    InsufficientFeatures { found: usize, required: usize },
    InsufficientMatches { found: usize, required: usize },
    DegenerateEssentialMatrix { reason: String },
}

impl TryFrom<VoError> for FrameFailure {
    type Error = VoError;

    /// Per-frame errors convert; configuration errors are handed back.
    fn try_from(error: VoError) -> Result<Self, Self::Error> {
        match error {
            VoError::InsufficientFeatures { found, required } => {
                Ok(FrameFailure::InsufficientFeatures { found, required })
            }
            VoError::InsufficientMatches { found, required } => {
                Ok(FrameFailure::InsufficientMatches { found, required })
            }
            VoError::DegenerateEssentialMatrix(reason) => {
                Ok(FrameFailure::DegenerateEssentialMatrix { reason })
            }
            other => Err(other),
        }
    }
}

/// Everything the pipeline reports about one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u64,
    pub timestamp: f64,
    pub record: TrajectoryRecord,
    pub new_points: Vec<LandmarkPoint>,
    pub tracking_state: TrackingState,
    pub keypoint_count: usize,
    pub matched_feature_count: usize,
    pub inlier_count: usize,
    /// The frame pair showed no measurable parallax; the pose was held.
    pub stationary: bool,
    pub failure: Option<FrameFailure>,
}

/// Limits applied between frames by [`crate::vo::VoPipeline::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameBudget {
    pub max_frames: Option<usize>,
    pub max_duration: Option<Duration>,
}

impl FrameBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn frames(max_frames: usize) -> Self {
        Self {
            max_frames: Some(max_frames),
            max_duration: None,
        }
    }

    pub fn is_exhausted(&self, frames_done: usize, elapsed: Duration) -> bool {
        self.max_frames.is_some_and(|max| frames_done >= max)
            || self.max_duration.is_some_and(|max| elapsed >= max)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub frames_processed: usize,
    pub tracking_frames: usize,
    pub lost_frames: usize,
    pub stopped_by_budget: bool,
    pub elapsed_seconds: f64,
}
