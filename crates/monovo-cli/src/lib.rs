pub mod config;
pub mod errors;
pub mod eval;
pub mod output;
pub mod processor;
pub mod providers;

pub use errors::{CliError, Result};
pub use processor::{OutputPaths, ProcessingConfig, SequenceProcessor};
pub use providers::{Dataset, DatasetFormat, FrameRange};
