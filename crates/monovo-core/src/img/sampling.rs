use image::GrayImage;

/// Bilinear interpolation of an 8-bit image at `(x, y)`.
///
/// Locations outside `[0, w-1] x [0, h-1]` read as zero.
pub fn sample_bilinear(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (width, height) = image.dimensions();
    let max_x = (width.saturating_sub(1)) as f32;
    let max_y = (height.saturating_sub(1)) as f32;
    if width == 0 || height == 0 || !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
        return 0.0;
    }

    let stride = width as usize;
    let pixels = image.as_raw();
    let (ix, iy) = (x as usize, y as usize);
    let (fx, fy) = (x - ix as f32, y - iy as f32);
    let right = usize::from(ix + 1 < stride);
    let below = if iy + 1 < height as usize { stride } else { 0 };

    let base = iy * stride + ix;
    let a = f32::from(pixels[base]);
    let b = f32::from(pixels[base + right]);
    let c = f32::from(pixels[base + below]);
    let d = f32::from(pixels[base + below + right]);

    let upper = a + (b - a) * fx;
    let lower = c + (d - c) * fx;
    upper + (lower - upper) * fy
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn interpolates_and_zeroes_outside() {
        let image = GrayImage::from_fn(2, 2, |x, y| Luma([(x * 100 + y * 20) as u8]));
        assert_eq!(sample_bilinear(&image, 0.5, 0.0), 50.0);
        assert_eq!(sample_bilinear(&image, 0.5, 0.5), 60.0);
        assert_eq!(sample_bilinear(&image, 1.0, 1.0), 120.0);
        assert_eq!(sample_bilinear(&image, -0.5, 0.0), 0.0);
        assert_eq!(sample_bilinear(&image, 0.0, 1.5), 0.0);
    }
}
