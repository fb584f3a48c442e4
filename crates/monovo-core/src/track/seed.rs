use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::img::PyramidLevel;

pub mod fast_seed;
pub use fast_seed::{FastDetectorConfig, FastDetectorType, FastSeeder, FastSeederConfig};

/// Grid bucketing applied to raw corner responses so features spread over the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureGridConfig {
    pub cell_size: usize,
    pub max_features: usize,
    pub response_threshold: f32,
    pub per_cell_cap: usize,
    pub nms_radius_px: f32,
    /// Pixels kept clear at the image border.
    pub border_px: usize,
}

impl Default for FeatureGridConfig {
    fn default() -> Self {
        Self {
            cell_size: 32,
            max_features: 1000,
            response_threshold: 10.0,
            per_cell_cap: 12,
            nms_radius_px: 4.0,
            border_px: 16,
        }
    }
}

/// A corner response in the coordinates of the pyramid level it was found on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSeed {
    pub level: usize,
    pub level_scale: f32,
    pub px_uv: Vector2<f32>,
    pub score: f32,
}

impl FeatureSeed {
    /// Location in level-0 pixels.
    pub fn base_px_uv(&self) -> Vector2<f32> {
        self.px_uv / self.level_scale
    }
}

pub trait FeatureSeederTrait {
    fn seed(&self, level: &PyramidLevel) -> Vec<FeatureSeed>;
}

/// Greedy radius suppression over seeds already sorted by descending score.
pub fn radius_nms(mut seeds: Vec<FeatureSeed>, radius: f32, max_keep: usize) -> Vec<FeatureSeed> {
    let r2 = radius * radius;
    let mut kept: Vec<FeatureSeed> = Vec::with_capacity(seeds.len().min(max_keep));
    'outer: for s in seeds.drain(..) {
        for k in &kept {
            if (s.px_uv - k.px_uv).norm_squared() <= r2 {
                continue 'outer;
            }
        }
        kept.push(s);
        if kept.len() == max_keep {
            break;
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_at(x: f32, y: f32, score: f32) -> FeatureSeed {
        FeatureSeed {
            level: 0,
            level_scale: 1.0,
            px_uv: Vector2::new(x, y),
            score,
        }
    }

    #[test]
    fn radius_nms_keeps_strongest_of_a_cluster() {
        let seeds = vec![
            seed_at(10.0, 10.0, 50.0),
            seed_at(11.0, 10.0, 40.0),
            seed_at(30.0, 10.0, 30.0),
        ];
        let kept = radius_nms(seeds, 4.0, 10);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 50.0);
        assert_eq!(kept[1].score, 30.0);
    }

    #[test]
    fn base_coordinates_undo_level_scale() {
        let mut seed = seed_at(10.0, 20.0, 1.0);
        seed.level = 1;
        seed.level_scale = 0.5;
        assert_eq!(seed.base_px_uv(), Vector2::new(20.0, 40.0));
    }
}
