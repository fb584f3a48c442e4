use monovo_core::VoError;
use thiserror::Error;

/// Errors raised while loading datasets, running streams and writing results.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("dataset layout error in {root}: {message}")]
    DatasetLayout { root: String, message: String },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("failed to load image {path}: {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },

    #[error("video error in {path}: {message}")]
    Video { path: String, message: String },

    #[error("failed to load intrinsics: {0}")]
    IntrinsicsLoad(String),

    #[error("no camera intrinsics for dataset {0}; pass --intrinsics or a config with a camera block")]
    IntrinsicsMissing(String),

    #[error("no frames selected from dataset {0}")]
    NoFrames(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] VoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    pub(crate) fn layout(root: &std::path::Path, message: impl Into<String>) -> Self {
        CliError::DatasetLayout {
            root: root.display().to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
