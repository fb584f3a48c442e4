use image::imageops::{FilterType, resize};
use imageproc::{filter::gaussian_blur_f32, image::GrayImage};
use log::{debug, trace};

use super::sampling::sample_bilinear;

const BLUR_SIGMA: f32 = 1.0;
const MIN_LEVEL_SIDE: u32 = 16;

#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub octave: usize,
    /// Factor mapping level-0 pixels into this level (`1 / 2^octave`).
    pub scale: f32,
    pub image: GrayImage,
}

impl PyramidLevel {
    /// Intensity at an integer pixel, as `f32`.
    #[inline]
    pub fn intensity(&self, x: usize, y: usize) -> f32 {
        self.image.get_pixel(x as u32, y as u32).0[0] as f32
    }

    /// Bilinear intensity at a sub-pixel location; zero outside the image.
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        sample_bilinear(&self.image, x, y)
    }

    pub fn width(&self) -> usize {
        self.image.width() as usize
    }

    pub fn height(&self) -> usize {
        self.image.height() as usize
    }
}

#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn base(&self) -> &PyramidLevel {
        &self.levels[0]
    }
}

/// Builds a Gaussian pyramid of at most `octaves` levels, halving each side per level.
///
/// Level 0 is a lightly blurred copy of `base`. Construction stops early once a
/// level would fall below a usable size, so the pyramid always holds at least one level.
pub fn build_pyramid(base: &GrayImage, octaves: usize) -> Pyramid {
    let octaves = octaves.max(1);

    debug!(
        target: "monovo_core::img",
        "building pyramid with {} octaves from {}x{} image",
        octaves,
        base.width(),
        base.height()
    );

    let mut levels = Vec::with_capacity(octaves);
    let mut current = base.clone();

    for octave in 0..octaves {
        trace!(target: "monovo_core::img", "processing octave {octave}");
        let blurred = gaussian_blur_f32(&current, BLUR_SIGMA);
        let next_width = blurred.width() / 2;
        let next_height = blurred.height() / 2;
        let has_next = octave + 1 != octaves
            && next_width >= MIN_LEVEL_SIDE
            && next_height >= MIN_LEVEL_SIDE;
        let next = has_next
            .then(|| resize(&blurred, next_width, next_height, FilterType::Triangle));

        levels.push(PyramidLevel {
            octave,
            scale: 1.0 / 2f32.powi(octave as i32),
            image: blurred,
        });

        match next {
            Some(next) => current = next,
            None => break,
        }
    }

    Pyramid { levels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn pyramid_halves_each_level() {
        let image = GrayImage::from_fn(128, 96, |x, y| Luma([((x * 7 + y * 3) % 255) as u8]));
        let pyramid = build_pyramid(&image, 3);

        let sizes: Vec<_> = pyramid
            .levels()
            .iter()
            .map(|level| (level.width(), level.height()))
            .collect();
        assert_eq!(sizes, vec![(128, 96), (64, 48), (32, 24)]);
        assert_eq!(pyramid.levels()[2].scale, 0.25);
    }

    #[test]
    fn pyramid_stops_before_levels_become_too_small() {
        let image = GrayImage::new(40, 40);
        let pyramid = build_pyramid(&image, 6);
        assert_eq!(pyramid.levels().len(), 2);
    }
}
