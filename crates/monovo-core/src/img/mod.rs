pub mod pyramid;
pub mod sampling;

pub use image::GrayImage;
pub use pyramid::{Pyramid, PyramidLevel, build_pyramid};
pub use sampling::sample_bilinear;
