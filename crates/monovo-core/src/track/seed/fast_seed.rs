use log::{debug, trace};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::{FeatureGridConfig, FeatureSeed, FeatureSeederTrait, radius_nms};
use crate::img::PyramidLevel;

const CIRCLE_OFFSETS: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];
const CIRCLE_RADIUS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FastDetectorType {
    Type7_12,
    Type9_16,
}

impl FastDetectorType {
    #[inline]
    fn contiguous_arc_length(self) -> usize {
        match self {
            Self::Type7_12 => 7,
            Self::Type9_16 => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastDetectorConfig {
    pub intensity_threshold: f32,
    pub nonmax_suppression: bool,
    pub detector_type: FastDetectorType,
}

impl Default for FastDetectorConfig {
    fn default() -> Self {
        Self {
            intensity_threshold: 20.0,
            nonmax_suppression: true,
            detector_type: FastDetectorType::Type9_16,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastSeederConfig {
    pub grid: FeatureGridConfig,
    pub detector: FastDetectorConfig,
}

#[derive(Debug, Clone)]
pub struct FastSeeder {
    config: FastSeederConfig,
    arc_length: usize,
}

impl FastSeeder {
    pub fn new(config: FastSeederConfig) -> Self {
        let mut detector = config.detector;
        detector.intensity_threshold = detector.intensity_threshold.max(0.0);
        let arc_length = detector.detector_type.contiguous_arc_length();

        trace!(
            target: "monovo_core::track",
            "FAST seeder config: threshold {:.1}, nonmax {}, arc length {}",
            detector.intensity_threshold,
            detector.nonmax_suppression,
            arc_length
        );

        Self {
            config: FastSeederConfig {
                grid: config.grid,
                detector,
            },
            arc_length,
        }
    }

    /// Same seeder with a different cap on the number of seeds per level.
    pub fn with_max_features(&self, max_features: usize) -> Self {
        let mut config = self.config;
        config.grid.max_features = max_features;
        Self {
            config,
            arc_length: self.arc_length,
        }
    }
}

impl FeatureSeederTrait for FastSeeder {
    fn seed(&self, level: &PyramidLevel) -> Vec<FeatureSeed> {
        let width = level.width();
        let height = level.height();
        let grid_cfg = self.config.grid;
        let detector_cfg = self.config.detector;

        let cell = grid_cfg.cell_size.max(4);
        let per_cell_cap = grid_cfg.per_cell_cap.max(1);
        let max_features = grid_cfg.max_features.max(1);
        let response_threshold = grid_cfg.response_threshold.max(0.0);
        let nms_radius = grid_cfg.nms_radius_px.max(0.0);
        let margin = grid_cfg.border_px.max(CIRCLE_RADIUS);

        if width <= margin * 2 || height <= margin * 2 {
            return Vec::new();
        }

        let x_lo = margin;
        let x_hi = width - margin;
        let y_lo = margin;
        let y_hi = height - margin;

        let cells_x = (x_hi - x_lo).div_ceil(cell);
        let cells_y = (y_hi - y_lo).div_ceil(cell);

        let mut score_map = vec![0.0f32; width * height];
        let mut candidates: Vec<Candidate> = Vec::new();

        for y in y_lo..y_hi {
            for x in x_lo..x_hi {
                if let Some(score) = fast_corner_score(
                    level,
                    x,
                    y,
                    detector_cfg.intensity_threshold,
                    self.arc_length,
                ) {
                    score_map[y * width + x] = score;
                    candidates.push(Candidate { x, y, score });
                }
            }
        }

        trace!(
            target: "monovo_core::track",
            "FAST detected {} raw corners above threshold {:.1}",
            candidates.len(),
            detector_cfg.intensity_threshold
        );

        if candidates.is_empty() {
            debug!(
                target: "monovo_core::track",
                "FAST seeding in {}x{} (oct {}) -> 0 (raw)",
                width, height, level.octave
            );
            return Vec::new();
        }

        let candidates = if detector_cfg.nonmax_suppression {
            apply_nonmax_suppression(&candidates, &score_map, width, height)
        } else {
            candidates
        };

        let mut buckets: Vec<Vec<FeatureSeed>> = vec![Vec::new(); cells_x * cells_y];

        for candidate in candidates {
            if candidate.score < response_threshold {
                continue;
            }

            let cx = (candidate.x - x_lo) / cell;
            let cy = (candidate.y - y_lo) / cell;
            let bucket = &mut buckets[cy * cells_x + cx];
            insert_sorted(
                bucket,
                FeatureSeed {
                    level: level.octave,
                    level_scale: level.scale,
                    px_uv: Vector2::new(candidate.x as f32, candidate.y as f32),
                    score: candidate.score,
                },
            );

            if bucket.len() > per_cell_cap {
                bucket.pop();
            }
        }

        let mut seeds: Vec<FeatureSeed> = buckets.into_iter().flatten().collect();
        seeds.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut seeds = if nms_radius > 0.0 {
            radius_nms(seeds, nms_radius, max_features)
        } else {
            seeds
        };
        seeds.truncate(max_features);

        debug!(
            target: "monovo_core::track",
            "FAST seeding in {}x{} (oct {}, cell {}, K {}, NMS {:.1}px) -> {} (max {})",
            width,
            height,
            level.octave,
            cell,
            per_cell_cap,
            nms_radius,
            seeds.len(),
            max_features
        );

        seeds
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    x: usize,
    y: usize,
    score: f32,
}

/// FAST response at `(x, y)`, or `None` when no contiguous arc of
/// `arc_length` circle pixels is uniformly brighter or darker than the centre.
///
/// The response is the summed excess over the threshold of the pixels in the
/// qualifying class.
fn fast_corner_score(
    level: &PyramidLevel,
    x: usize,
    y: usize,
    threshold: f32,
    arc_length: usize,
) -> Option<f32> {
    let at = |(dx, dy): (isize, isize)| {
        level.intensity(x.wrapping_add_signed(dx), y.wrapping_add_signed(dy))
    };
    let center = level.intensity(x, y);
    let high = center + threshold;
    let low = center - threshold;

    // An arc of 9 covers at least 2 of the 4 compass points, an arc of 7 at least 1.
    let required = if arc_length >= 9 { 2 } else { 1 };
    let (mut brighter, mut darker) = (0, 0);
    for offset in [CIRCLE_OFFSETS[0], CIRCLE_OFFSETS[4], CIRCLE_OFFSETS[8], CIRCLE_OFFSETS[12]] {
        let value = at(offset);
        brighter += usize::from(value > high);
        darker += usize::from(value < low);
    }
    if brighter < required && darker < required {
        return None;
    }

    let mut bright_mask = 0u32;
    let mut dark_mask = 0u32;
    let mut bright_excess = 0.0f32;
    let mut dark_excess = 0.0f32;
    for (bit, offset) in CIRCLE_OFFSETS.into_iter().enumerate() {
        let value = at(offset);
        if value > high {
            bright_mask |= 1 << bit;
            bright_excess += value - high;
        } else if value < low {
            dark_mask |= 1 << bit;
            dark_excess += low - value;
        }
    }

    let has_arc = |mask: u32| {
        let mut run = mask | (mask << 16);
        for _ in 1..arc_length {
            run &= run >> 1;
        }
        run != 0
    };
    match (has_arc(bright_mask), has_arc(dark_mask)) {
        (true, true) => Some(bright_excess.max(dark_excess)),
        (true, false) => Some(bright_excess),
        (false, true) => Some(dark_excess),
        (false, false) => None,
    }
}

fn apply_nonmax_suppression(
    candidates: &[Candidate],
    score_map: &[f32],
    width: usize,
    height: usize,
) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|candidate| {
            let (x, y) = (candidate.x, candidate.y);
            let x_min = x.saturating_sub(1);
            let x_max = (x + 1).min(width - 1);
            let y_min = y.saturating_sub(1);
            let y_max = (y + 1).min(height - 1);
            (y_min..=y_max).all(|ny| {
                (x_min..=x_max).all(|nx| {
                    (nx == x && ny == y) || score_map[ny * width + nx] <= candidate.score
                })
            })
        })
        .cloned()
        .collect()
}

fn insert_sorted(bucket: &mut Vec<FeatureSeed>, seed: FeatureSeed) {
    let insert_pos = bucket.partition_point(|existing| existing.score > seed.score);
    bucket.insert(insert_pos, seed);
}
