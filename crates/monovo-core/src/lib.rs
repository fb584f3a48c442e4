pub mod config;
pub mod contracts;
pub mod epipolar;
pub mod error;
pub mod img;
pub mod map;
pub mod math;
pub mod track;
pub mod trajectory;
pub mod triangulate;
pub mod vo;

pub use config::VoConfig;
pub use contracts::{
    Frame, FrameBudget, FrameFailure, FrameResult, FrameSource, IterSource, RunSummary,
    TrackingState,
};
pub use error::VoError;
pub use map::LandmarkPoint;
pub use math::{CameraIntrinsics, DistortionModel, SE3, SO3};
pub use trajectory::TrajectoryRecord;
pub use vo::{PipelineState, VoPipeline};

#[cfg(test)]
mod tests {
    use crate::math::{SE3, SO3};
    use crate::trajectory::TrajectoryRecord;

    #[test]
    fn trajectory_record_serializes_as_plain_scalars() {
        let pose = SE3::from_parts(
            SO3::from_axis_angle(&nalgebra::Vector3::z(), std::f64::consts::FRAC_PI_2),
            nalgebra::Vector3::new(1.0, 2.0, 3.0),
        );
        let record = TrajectoryRecord::from_pose(7, 0.25, &pose);
        let value = serde_json::to_value(record).unwrap();

        assert_eq!(value["frame_index"], 7);
        assert_eq!(value["x"], 1.0);
        let qz = value["qz"].as_f64().unwrap();
        let qw = value["qw"].as_f64().unwrap();
        assert!((qz - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert!((qw - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }
}
