//! Sparse landmark map with voxel-hash deduplication and a bounded retention policy.

use std::collections::{BTreeMap, HashMap};

use log::{debug, trace};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::triangulate::LandmarkCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Candidates closer than this to a live point merge into it.
    pub merge_radius: f64,
    /// Frames a single-observation point may live before it is culled.
    pub unconfirmed_window: u64,
    pub max_points: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            merge_radius: 0.05,
            unconfirmed_window: 5,
            max_points: 50_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub id: u64,
    pub xyz: [f64; 3],
    pub intensity: u8,
    pub confidence: f64,
    pub created_frame: u64,
    pub last_observed_frame: u64,
    pub observation_count: u32,
}

impl LandmarkPoint {
    pub fn position(&self) -> Point3<f64> {
        Point3::new(self.xyz[0], self.xyz[1], self.xyz[2])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    /// Points created by this insert, ordered by id.
    pub inserted: Vec<LandmarkPoint>,
    /// Candidates that re-observed an existing point.
    pub merged: usize,
    /// Candidates that duplicated a point already observed in the same frame.
    pub absorbed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullOutcome {
    pub unconfirmed_removed: usize,
    pub capped_removed: usize,
}

impl CullOutcome {
    pub fn total(&self) -> usize {
        self.unconfirmed_removed + self.capped_removed
    }
}

type VoxelKey = (i64, i64, i64);

#[derive(Debug, Clone, Default)]
pub struct LandmarkMap {
    config: MapConfig,
    points: BTreeMap<u64, LandmarkPoint>,
    voxels: HashMap<VoxelKey, Vec<u64>>,
    next_id: u64,
}

impl LandmarkMap {
    pub fn new(config: MapConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&LandmarkPoint> {
        self.points.get(&id)
    }

    /// Live points in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &LandmarkPoint> {
        self.points.values()
    }

    /// Copy of every live point, ordered by id.
    pub fn snapshot(&self) -> Vec<LandmarkPoint> {
        self.points.values().cloned().collect()
    }

    pub fn insert(&mut self, candidates: &[LandmarkCandidate], frame_index: u64) -> InsertOutcome {
        let mut created = Vec::new();
        let mut outcome = InsertOutcome::default();

        for candidate in candidates {
            if !candidate.position.coords.iter().all(|v| v.is_finite()) {
                continue;
            }
            match self.nearest_within_radius(&candidate.position) {
                Some(id) => {
                    if self.observe(id, candidate, frame_index) {
                        outcome.merged += 1;
                    } else {
                        outcome.absorbed += 1;
                    }
                }
                None => created.push(self.create(candidate, frame_index)),
            }
        }

        outcome.inserted = created
            .iter()
            .filter_map(|id| self.points.get(id).cloned())
            .collect();

        debug!(
            target: "monovo_core::map",
            "frame {frame_index}: {} new, {} merged, {} absorbed, {} live",
            outcome.inserted.len(),
            outcome.merged,
            outcome.absorbed,
            self.points.len()
        );
        outcome
    }

    /// Drops stale unconfirmed points, then enforces the point cap.
    pub fn cull(&mut self, current_frame: u64) -> CullOutcome {
        let window = self.config.unconfirmed_window;
        let stale: Vec<u64> = self
            .points
            .values()
            .filter(|p| {
                p.observation_count <= 1 && current_frame.saturating_sub(p.created_frame) > window
            })
            .map(|p| p.id)
            .collect();
        for id in &stale {
            self.remove(*id);
        }

        let mut capped = 0usize;
        if self.points.len() > self.config.max_points {
            let excess = self.points.len() - self.config.max_points;
            let mut ranked: Vec<&LandmarkPoint> = self.points.values().collect();
            ranked.sort_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then(a.observation_count.cmp(&b.observation_count))
                    .then(a.created_frame.cmp(&b.created_frame))
            });
            let victims: Vec<u64> = ranked.iter().take(excess).map(|p| p.id).collect();
            for id in victims {
                self.remove(id);
            }
            capped = excess;
        }

        let outcome = CullOutcome {
            unconfirmed_removed: stale.len(),
            capped_removed: capped,
        };
        if outcome.total() > 0 {
            debug!(
                target: "monovo_core::map",
                "cull at frame {current_frame}: {} unconfirmed, {} over cap, {} live",
                outcome.unconfirmed_removed,
                outcome.capped_removed,
                self.points.len()
            );
        }
        outcome
    }

    fn create(&mut self, candidate: &LandmarkCandidate, frame_index: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let point = LandmarkPoint {
            id,
            xyz: [candidate.position.x, candidate.position.y, candidate.position.z],
            intensity: candidate.intensity,
            confidence: candidate.confidence.clamp(0.0, 1.0),
            created_frame: frame_index,
            last_observed_frame: frame_index,
            observation_count: 1,
        };
        self.voxels
            .entry(self.voxel_of(&candidate.position))
            .or_default()
            .push(id);
        self.points.insert(id, point);
        id
    }

    /// Merges a re-observation. Returns `false` when the point was already seen
    /// this frame and the candidate is absorbed without counting.
    fn observe(&mut self, id: u64, candidate: &LandmarkCandidate, frame_index: u64) -> bool {
        let Some(point) = self.points.get_mut(&id) else {
            return false;
        };
        if point.last_observed_frame == frame_index {
            return false;
        }

        let old_position = point.position();
        let n = point.observation_count as f64;
        let merged = (old_position.coords * n + candidate.position.coords) / (n + 1.0);
        point.xyz = [merged.x, merged.y, merged.z];
        point.confidence =
            1.0 - (1.0 - point.confidence) * (1.0 - candidate.confidence.clamp(0.0, 1.0));
        point.observation_count += 1;
        point.last_observed_frame = frame_index;
        let new_position = point.position();
        trace!(
            target: "monovo_core::map",
            "landmark {id} re-observed ({} observations)",
            point.observation_count
        );

        let (old_key, new_key) = (self.voxel_of(&old_position), self.voxel_of(&new_position));
        if old_key != new_key {
            self.unlink(old_key, id);
            self.voxels.entry(new_key).or_default().push(id);
        }
        true
    }

    fn remove(&mut self, id: u64) {
        if let Some(point) = self.points.remove(&id) {
            let key = self.voxel_of(&point.position());
            self.unlink(key, id);
        }
    }

    fn unlink(&mut self, key: VoxelKey, id: u64) {
        if let Some(ids) = self.voxels.get_mut(&key) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.voxels.remove(&key);
            }
        }
    }

    fn voxel_of(&self, position: &Point3<f64>) -> VoxelKey {
        let size = self.config.merge_radius.max(f64::EPSILON);
        (
            (position.x / size).floor() as i64,
            (position.y / size).floor() as i64,
            (position.z / size).floor() as i64,
        )
    }

    fn nearest_within_radius(&self, position: &Point3<f64>) -> Option<u64> {
        let (kx, ky, kz) = self.voxel_of(position);
        let radius_sq = self.config.merge_radius * self.config.merge_radius;
        let mut best: Option<(u64, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(ids) = self.voxels.get(&(kx + dx, ky + dy, kz + dz)) else {
                        continue;
                    };
                    for id in ids {
                        let Some(point) = self.points.get(id) else {
                            continue;
                        };
                        let dist_sq = (point.position() - position).norm_squared();
                        if dist_sq <= radius_sq && best.is_none_or(|(_, d)| dist_sq < d) {
                            best = Some((*id, dist_sq));
                        }
                    }
                }
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn candidate(x: f64, y: f64, z: f64, confidence: f64) -> LandmarkCandidate {
        LandmarkCandidate {
            position: Point3::new(x, y, z),
            intensity: 128,
            confidence,
            reprojection_error_px: 0.1,
            parallax_deg: 3.0,
        }
    }

    fn grid(count: usize, offset: f64) -> Vec<LandmarkCandidate> {
        (0..count)
            .map(|i| candidate(i as f64 + offset, (i % 7) as f64, 5.0, 0.5))
            .collect()
    }

    #[test]
    fn unconfirmed_points_are_culled_after_the_window() {
        let mut map = LandmarkMap::new(MapConfig::default());
        let outcome = map.insert(&grid(100, 0.0), 1);
        assert_eq!(outcome.inserted.len(), 100);

        let window = map.config().unconfirmed_window;
        assert_eq!(map.cull(1 + window).total(), 0);
        assert_eq!(map.len(), 100);

        let culled = map.cull(2 + window);
        assert_eq!(culled.unconfirmed_removed, 100);
        assert!(map.is_empty());
    }

    #[test]
    fn reobserved_points_survive_with_more_observations() {
        let mut map = LandmarkMap::new(MapConfig::default());
        map.insert(&grid(100, 0.0), 1);
        let reobserved: Vec<_> = grid(100, 0.01).into_iter().take(40).collect();
        let outcome = map.insert(&reobserved, 3);
        assert_eq!(outcome.merged, 40);
        assert!(outcome.inserted.is_empty());

        map.cull(20);
        assert_eq!(map.len(), 40);
        assert!(map.iter().all(|p| p.observation_count >= 2));
    }

    #[test]
    fn merge_fuses_confidence_and_averages_position() {
        let mut map = LandmarkMap::new(MapConfig::default());
        map.insert(&[candidate(1.0, 1.0, 1.0, 0.5)], 0);
        map.insert(&[candidate(1.02, 1.0, 1.0, 0.4)], 1);

        let point = map.get(0).expect("landmark 0");
        assert_eq!(point.observation_count, 2);
        assert_relative_eq!(point.confidence, 0.7, epsilon = 1e-12);
        assert_relative_eq!(point.xyz[0], 1.01, epsilon = 1e-12);
        assert_eq!(point.last_observed_frame, 1);
        assert_eq!(point.created_frame, 0);
    }

    #[test]
    fn same_frame_duplicates_do_not_confirm_a_point() {
        let mut map = LandmarkMap::new(MapConfig::default());
        let outcome = map.insert(
            &[candidate(0.0, 0.0, 4.0, 0.5), candidate(0.01, 0.0, 4.0, 0.5)],
            2,
        );
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.absorbed, 1);
        assert_eq!(map.get(0).map(|p| p.observation_count), Some(1));
    }

    #[test]
    fn cap_discards_lowest_confidence_first() {
        let mut map = LandmarkMap::new(MapConfig {
            max_points: 3,
            ..MapConfig::default()
        });
        let candidates: Vec<_> = [0.9, 0.1, 0.5, 0.2, 0.8]
            .iter()
            .enumerate()
            .map(|(i, c)| candidate(i as f64, 0.0, 3.0, *c))
            .collect();
        map.insert(&candidates, 0);

        let outcome = map.cull(0);
        assert_eq!(outcome.capped_removed, 2);
        let kept: Vec<f64> = map.iter().map(|p| p.confidence).collect();
        assert_eq!(kept, vec![0.9, 0.5, 0.8]);
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let mut map = LandmarkMap::new(MapConfig::default());
        map.insert(&grid(10, 0.0), 0);
        let ids: Vec<u64> = map.snapshot().iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn points_moving_across_voxels_stay_reachable() {
        let mut map = LandmarkMap::new(MapConfig::default());
        map.insert(&[candidate(0.049, 0.0, 1.0, 0.5)], 0);
        map.insert(&[candidate(0.09, 0.0, 1.0, 0.5)], 1);
        map.insert(&[candidate(0.1, 0.0, 1.0, 0.5)], 2);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(0).map(|p| p.observation_count), Some(3));
    }
}
