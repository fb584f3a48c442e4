use std::sync::OnceLock;

use super::{DESCRIPTOR_BYTES, Descriptor, FeatDescriptor, FeatDescriptorExtractor};
use crate::img::{Pyramid, PyramidLevel};
use crate::track::FeatureSeed;

const ORB_POINTS: usize = DESCRIPTOR_BYTES * 8;
const DEFAULT_PATCH_RADIUS: usize = 15; // 31x31 patch
const PATTERN_SEED: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Oriented FAST and Rotated BRIEF (ORB) descriptor extractor.
///
/// Each descriptor encodes 256 binary intensity tests drawn from a 31x31 patch
/// around the feature. Pairs of pixel offsets are rotated by the keypoint's
/// intensity-centroid angle and then compared; the results are packed into a
/// 32-byte bitstring matched with Hamming distance.
#[derive(Debug, Clone)]
pub struct OrbDescriptor {
    patch_radius: usize,
}

impl OrbDescriptor {
    pub fn new() -> Self {
        Self {
            patch_radius: DEFAULT_PATCH_RADIUS,
        }
    }

    fn describe_seed(&self, level: &PyramidLevel, seed: &FeatureSeed) -> FeatDescriptor {
        let radius = self.patch_radius as f32;
        let angle = compute_orientation(level, seed.px_uv.x, seed.px_uv.y, radius);
        let data = build_descriptor(level, seed.px_uv.x, seed.px_uv.y, angle, pattern());

        FeatDescriptor {
            seed: *seed,
            angle,
            data,
        }
    }
}

impl Default for OrbDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatDescriptorExtractor for OrbDescriptor {
    fn patch_radius(&self) -> usize {
        self.patch_radius
    }

    fn describe(&self, pyramid: &Pyramid, seeds: &[FeatureSeed]) -> Vec<FeatDescriptor> {
        let levels = pyramid.levels();
        let r = self.patch_radius as f32;
        seeds
            .iter()
            .filter_map(|seed| {
                let level = levels.get(seed.level)?;
                let (x, y) = (seed.px_uv.x, seed.px_uv.y);
                let inside = x - r >= 0.0
                    && y - r >= 0.0
                    && x + r <= (level.width() - 1) as f32
                    && y + r <= (level.height() - 1) as f32;
                inside.then(|| self.describe_seed(level, seed))
            })
            .collect()
    }
}

#[derive(Clone, Copy)]
struct PatternPair {
    p1: (f32, f32),
    p2: (f32, f32),
}

/// Canonical sampling pattern, generated once from a fixed seed.
fn pattern() -> &'static [PatternPair] {
    static CACHE: OnceLock<Vec<PatternPair>> = OnceLock::new();
    CACHE
        .get_or_init(|| generate_pattern(ORB_POINTS, DEFAULT_PATCH_RADIUS as f32))
        .as_slice()
}

fn generate_pattern(count: usize, radius: f32) -> Vec<PatternPair> {
    let mut rng = XorShift64::new(PATTERN_SEED);
    let radius_sq = radius * radius;
    (0..count)
        .map(|_| PatternPair {
            p1: random_point(&mut rng, radius, radius_sq),
            p2: random_point(&mut rng, radius, radius_sq),
        })
        .collect()
}

fn random_point(rng: &mut XorShift64, radius: f32, radius_sq: f32) -> (f32, f32) {
    loop {
        let x = (rng.next_f32() * 2.0 - 1.0) * radius;
        let y = (rng.next_f32() * 2.0 - 1.0) * radius;
        if x * x + y * y <= radius_sq {
            return (x, y);
        }
    }
}

/// Intensity-centroid orientation over a circular patch.
fn compute_orientation(level: &PyramidLevel, cx: f32, cy: f32, radius: f32) -> f32 {
    let r = radius.round() as isize;
    let r_sq = r * r;
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r_sq {
                continue;
            }
            let intensity = level.sample(cx + dx as f32, cy + dy as f32);
            m10 += dx as f32 * intensity;
            m01 += dy as f32 * intensity;
        }
    }

    if m10.abs() < f32::EPSILON && m01.abs() < f32::EPSILON {
        0.0
    } else {
        m01.atan2(m10)
    }
}

fn build_descriptor(
    level: &PyramidLevel,
    cx: f32,
    cy: f32,
    angle: f32,
    pattern: &[PatternPair],
) -> Descriptor {
    let (sin_theta, cos_theta) = angle.sin_cos();
    let rotate = |(px, py): (f32, f32)| {
        (
            cos_theta * px - sin_theta * py + cx,
            sin_theta * px + cos_theta * py + cy,
        )
    };

    let mut bytes = [0u8; DESCRIPTOR_BYTES];
    for (i, pair) in pattern.iter().enumerate() {
        let (x1, y1) = rotate(pair.p1);
        let (x2, y2) = rotate(pair.p2);
        if level.sample(x1, y1) < level.sample(x2, y2) {
            bytes[i / 8] |= 1 << (i & 7);
        }
    }
    bytes
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 7;
        x ^= x >> 9;
        x ^= x << 8;
        self.state = x;
        x
    }

    fn next_f32(&mut self) -> f32 {
        let bits = self.next_u64() >> 40;
        (bits as f32) / (1u64 << 24) as f32
    }
}
