mod analysis;
mod json;
pub mod ply;
pub mod tum;

pub use analysis::AnalysisCollector;
pub use json::{
    CloudPoint, FrameStat, Metadata, ProcessingOutput, Summary, checkpoint_path, write_json,
};
