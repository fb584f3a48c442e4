//! Robust two-view relative pose from the essential matrix.

pub mod essential;
pub mod relative_pose;

pub use essential::{NormalizedMatch, sampson_error};
pub use relative_pose::{
    MIN_CORRESPONDENCES, RelativePose, RelativePoseConfig, RelativePoseEstimator,
};
