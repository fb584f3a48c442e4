use thiserror::Error;

/// Errors raised by the odometry core.
///
/// Only the configuration-time variants are fatal. The per-frame variants are
/// downgraded to a LOST frame by the pipeline and reported through
/// [`crate::contracts::FrameFailure`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VoError {
    #[error("insufficient features: detected {found}, need at least {required}")]
    InsufficientFeatures { found: usize, required: usize },

    #[error("insufficient matches: {found} correspondences, need at least {required}")]
    InsufficientMatches { found: usize, required: usize },

    #[error("degenerate essential matrix: {0}")]
    DegenerateEssentialMatrix(String),

    #[error("camera intrinsics are required to build the pipeline")]
    CalibrationMissing,

    #[error("invalid camera intrinsics: {0}")]
    InvalidCalibration(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VoError {
    /// Whether the error aborts pipeline construction rather than a single frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VoError::CalibrationMissing | VoError::InvalidCalibration(_) | VoError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VoError>;
