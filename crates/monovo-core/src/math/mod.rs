pub mod projection;
pub mod se3;
pub mod so3;
pub mod utils;

pub use projection::{CameraIntrinsics, DistortionModel};
pub use se3::SE3;
pub use so3::SO3;
pub use utils::{median, skew_symmetric};
