use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::extractor::FeatureSet;
use super::feat_descriptor::{Descriptor, hamming_distance};

/// A correspondence between a previous-frame keypoint and a current-frame keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub prev_idx: usize,
    pub curr_idx: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Lowe ratio: accept only when `best < ratio * second_best`.
    /// `None` disables the test.
    pub ratio_threshold: Option<f32>,
    /// Maximum Hamming distance. Typical values for 256-bit ORB are 50-80.
    pub max_distance: Option<u32>,
    /// Matches are truncated to this count after sorting by distance.
    pub max_matches: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: Some(0.8),
            max_distance: Some(64),
            max_matches: 100,
        }
    }
}

/// Brute-force Hamming matcher with a mutual nearest-neighbour cross-check.
#[derive(Debug, Clone, Default)]
pub struct HammingFeatMatcher {
    config: MatcherConfig,
}

#[derive(Debug, Clone, Copy)]
struct Nearest {
    idx: usize,
    best: u32,
    second: u32,
}

impl HammingFeatMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Matches the previous frame's features against the current frame's.
    ///
    /// The result is unique per previous and per current keypoint, sorted by
    /// ascending distance and truncated to `max_matches`.
    pub fn match_sets(&self, prev: &FeatureSet, curr: &FeatureSet) -> Vec<Match> {
        self.match_descriptors(&prev.descriptors, &curr.descriptors)
    }

    pub fn match_descriptors(&self, prev: &[Descriptor], curr: &[Descriptor]) -> Vec<Match> {
        if prev.is_empty() || curr.is_empty() {
            return Vec::new();
        }

        let (forward, backward) = rayon::join(
            || nearest_neighbours(prev, curr),
            || nearest_neighbours(curr, prev),
        );

        let mut matches: Vec<Match> = forward
            .iter()
            .enumerate()
            .filter_map(|(prev_idx, nearest)| {
                let nearest = nearest.as_ref()?;
                let back = backward[nearest.idx].as_ref()?;
                (back.idx == prev_idx && self.passes_filters(nearest.best, nearest.second)).then(
                    || Match {
                        prev_idx,
                        curr_idx: nearest.idx,
                        distance: nearest.best,
                    },
                )
            })
            .collect();

        let mutual = matches.len();
        matches.sort_by_key(|m| (m.distance, m.curr_idx));
        matches.truncate(self.config.max_matches);

        debug!(
            target: "monovo_core::track",
            "matched {} prev x {} curr descriptors: {} mutual, kept {}",
            prev.len(),
            curr.len(),
            mutual,
            matches.len()
        );

        matches
    }

    fn passes_filters(&self, best_distance: u32, second_best_distance: u32) -> bool {
        if let Some(max_dist) = self.config.max_distance
            && best_distance > max_dist
        {
            return false;
        }

        // A tie with the runner-up is ambiguous and never passes.
        if let Some(ratio) = self.config.ratio_threshold
            && second_best_distance != u32::MAX
            && best_distance as f32 >= ratio * second_best_distance as f32
        {
            return false;
        }

        true
    }
}

fn nearest_neighbours(query: &[Descriptor], train: &[Descriptor]) -> Vec<Option<Nearest>> {
    query
        .par_iter()
        .map(|q| {
            let mut nearest: Option<Nearest> = None;
            for (idx, t) in train.iter().enumerate() {
                let distance = hamming_distance(q, t);
                match nearest.as_mut() {
                    None => {
                        nearest = Some(Nearest {
                            idx,
                            best: distance,
                            second: u32::MAX,
                        })
                    }
                    Some(n) if distance < n.best => {
                        n.second = n.best;
                        n.best = distance;
                        n.idx = idx;
                    }
                    Some(n) if distance < n.second => n.second = distance,
                    Some(_) => {}
                }
            }
            nearest
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::feat_descriptor::DESCRIPTOR_BYTES;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn random_descriptors(rng: &mut SmallRng, count: usize) -> Vec<Descriptor> {
        (0..count)
            .map(|_| {
                let mut d = [0u8; DESCRIPTOR_BYTES];
                rng.fill(&mut d[..]);
                d
            })
            .collect()
    }

    fn flip_bits(d: &Descriptor, bits: usize) -> Descriptor {
        let mut out = *d;
        for bit in 0..bits {
            out[bit / 8] ^= 1 << (bit % 8);
        }
        out
    }

    #[test]
    fn recovers_permuted_descriptors() {
        let mut rng = SmallRng::seed_from_u64(1);
        let prev = random_descriptors(&mut rng, 50);
        let curr: Vec<_> = prev.iter().rev().map(|d| flip_bits(d, 3)).collect();

        let matcher = HammingFeatMatcher::default();
        let matches = matcher.match_descriptors(&prev, &curr);

        assert_eq!(matches.len(), 50);
        for m in &matches {
            assert_eq!(m.curr_idx, 49 - m.prev_idx);
            assert_eq!(m.distance, 3);
        }
    }

    #[test]
    fn matches_are_unique_sorted_and_truncated() {
        let mut rng = SmallRng::seed_from_u64(2);
        let prev = random_descriptors(&mut rng, 40);
        let curr: Vec<_> = prev
            .iter()
            .enumerate()
            .map(|(i, d)| flip_bits(d, i % 10))
            .collect();

        let matcher = HammingFeatMatcher::new(MatcherConfig {
            max_matches: 25,
            ..MatcherConfig::default()
        });
        let matches = matcher.match_descriptors(&prev, &curr);

        assert_eq!(matches.len(), 25);
        assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
        let mut seen_curr: Vec<_> = matches.iter().map(|m| m.curr_idx).collect();
        seen_curr.sort_unstable();
        seen_curr.dedup();
        assert_eq!(seen_curr.len(), matches.len());
    }

    #[test]
    fn ambiguous_duplicates_are_rejected() {
        let mut rng = SmallRng::seed_from_u64(3);
        let prev = random_descriptors(&mut rng, 1);
        let curr = vec![prev[0], prev[0]];

        let matcher = HammingFeatMatcher::default();
        assert!(matcher.match_descriptors(&prev, &curr).is_empty());
    }

    #[test]
    fn distance_cap_filters_unrelated_descriptors() {
        let mut rng = SmallRng::seed_from_u64(4);
        let prev = random_descriptors(&mut rng, 10);
        let curr = random_descriptors(&mut rng, 10);

        let matcher = HammingFeatMatcher::default();
        assert!(matcher.match_descriptors(&prev, &curr).is_empty());
    }

    #[test]
    fn empty_inputs_produce_no_matches() {
        let matcher = HammingFeatMatcher::default();
        assert!(matcher.match_descriptors(&[], &[[0u8; DESCRIPTOR_BYTES]]).is_empty());
    }
}
