//! Per-frame feature extraction and frame-to-frame descriptor matching.

pub mod extractor;
pub mod feat_descriptor;
pub mod feat_matcher;
pub mod seed;

pub use extractor::{FeatureConfig, FeatureSet, FeatureTracker, Keypoint};
pub use feat_descriptor::{Descriptor, OrbDescriptor, hamming_distance};
pub use feat_matcher::{HammingFeatMatcher, Match, MatcherConfig};
pub use seed::{FeatureGridConfig, FeatureSeed, FeatureSeederTrait};
