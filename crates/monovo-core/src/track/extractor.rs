use image::GrayImage;
use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::feat_descriptor::{Descriptor, FeatDescriptorExtractor, OrbDescriptor};
use super::seed::{FastSeeder, FastSeederConfig, FeatureSeederTrait};
use crate::img::build_pyramid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Total keypoints kept per frame across all octaves.
    pub max_features: usize,
    pub pyramid_levels: usize,
    pub seeder: FastSeederConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_features: 2000,
            pyramid_levels: 4,
            seeder: FastSeederConfig::default(),
        }
    }
}

/// A detected feature, positioned in level-0 pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub px_uv: Vector2<f64>,
    pub octave: usize,
    /// Intensity-centroid orientation in radians.
    pub angle: f32,
    pub score: f32,
    /// Raw grayscale value at the keypoint, used to colour landmarks.
    pub intensity: u8,
}

/// Keypoints and their descriptors, stored as parallel arrays.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keypoints: Vec::with_capacity(capacity),
            descriptors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, keypoint: Keypoint, descriptor: Descriptor) {
        self.keypoints.push(keypoint);
        self.descriptors.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detects oriented FAST corners over an image pyramid and describes them with ORB.
#[derive(Debug, Clone)]
pub struct FeatureTracker {
    config: FeatureConfig,
    seeder: FastSeeder,
    descriptor: OrbDescriptor,
}

impl FeatureTracker {
    pub fn new(config: FeatureConfig) -> Self {
        let mut seeder_config = config.seeder;
        let descriptor = OrbDescriptor::new();
        seeder_config.grid.border_px = seeder_config
            .grid
            .border_px
            .max(descriptor.patch_radius() + 1);
        Self {
            config,
            seeder: FastSeeder::new(seeder_config),
            descriptor,
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn extract(&self, image: &GrayImage) -> FeatureSet {
        let pyramid = build_pyramid(image, self.config.pyramid_levels);
        let budgets = level_budgets(self.config.max_features, pyramid.levels().len());

        let mut described = Vec::new();
        for (level, budget) in pyramid.levels().iter().zip(budgets) {
            if budget == 0 {
                continue;
            }
            let seeds = self.seeder.with_max_features(budget).seed(level);
            described.extend(self.descriptor.describe(&pyramid, &seeds));
        }
        described.sort_by(|a, b| b.seed.score.total_cmp(&a.seed.score));
        described.truncate(self.config.max_features);

        let mut features = FeatureSet::with_capacity(described.len());
        for feat in described {
            let base = feat.seed.base_px_uv();
            let px_uv = Vector2::new(base.x as f64, base.y as f64);
            let ix = (px_uv.x.round() as u32).min(image.width().saturating_sub(1));
            let iy = (px_uv.y.round() as u32).min(image.height().saturating_sub(1));
            features.push(
                Keypoint {
                    px_uv,
                    octave: feat.seed.level,
                    angle: feat.angle,
                    score: feat.seed.score,
                    intensity: image.get_pixel(ix, iy).0[0],
                },
                feat.data,
            );
        }

        debug!(
            target: "monovo_core::track",
            "extracted {} features from {}x{} image over {} octaves",
            features.len(),
            image.width(),
            image.height(),
            pyramid.levels().len()
        );

        features
    }
}

/// Splits the feature budget across octaves in proportion to level area.
fn level_budgets(total: usize, levels: usize) -> Vec<usize> {
    let weights: Vec<f64> = (0..levels).map(|l| 0.25f64.powi(l as i32)).collect();
    let sum: f64 = weights.iter().sum();
    weights
        .iter()
        .map(|w| ((total as f64) * w / sum).ceil() as usize)
        .collect()
}
