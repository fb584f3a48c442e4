use crate::img::Pyramid;
use crate::track::FeatureSeed;

pub mod orb;
pub use orb::OrbDescriptor;

/// Number of bytes in a binary descriptor (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

pub type Descriptor = [u8; DESCRIPTOR_BYTES];

#[derive(Debug, Clone)]
pub struct FeatDescriptor {
    pub seed: FeatureSeed,
    pub angle: f32,
    pub data: Descriptor,
}

pub trait FeatDescriptorExtractor {
    /// Radius in level pixels that must be available around a seed.
    fn patch_radius(&self) -> usize;

    fn describe(&self, pyramid: &Pyramid, seeds: &[FeatureSeed]) -> Vec<FeatDescriptor>;
}

#[inline]
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_counts_differing_bits() {
        let a = [0u8; DESCRIPTOR_BYTES];
        let mut b = [0u8; DESCRIPTOR_BYTES];
        b[0] = 0b1011;
        b[31] = 0xFF;
        assert_eq!(hamming_distance(&a, &b), 11);
        assert_eq!(hamming_distance(&b, &b), 0);
    }
}
