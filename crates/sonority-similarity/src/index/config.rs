use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SimilarityError, SimilarityResult};
use crate::index::distance::DistanceType;

/// Largest accepted tree count.
pub const MAX_TREES: u32 = 1024;

/// Index defaults from the `[index]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub default_distance: DistanceType,
    pub default_trees: u32,
    /// Largest number of items kept in one tree leaf.
    pub leaf_size: usize,
    /// Seed for the split randomness. Random per build when unset.
    pub seed: Option<u64>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            default_distance: DistanceType::Angular,
            default_trees: 10,
            leaf_size: 32,
            seed: None,
        }
    }
}

/// Identity of an index: metric, distance function and tree count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexConfig {
    metric: String,
    distance: DistanceType,
    trees: u32,
}

impl IndexConfig {
    pub fn new(metric: impl Into<String>, distance: DistanceType, trees: u32) -> SimilarityResult<Self> {
        let metric = metric.into();
        if metric.is_empty() {
            return Err(SimilarityError::Configuration(
                "index metric must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_TREES).contains(&trees) {
            return Err(SimilarityError::Configuration(format!(
                "tree count must be between 1 and {MAX_TREES}, got {trees}"
            )));
        }
        Ok(Self {
            metric,
            distance,
            trees,
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub const fn distance(&self) -> DistanceType {
        self.distance
    }

    pub const fn trees(&self) -> u32 {
        self.trees
    }

    /// `<metric>_<distance>_<trees>`
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.metric, self.distance, self.trees)
    }

    pub fn file_name(&self) -> String {
        format!("{}.ann", self.key())
    }

    /// Parse a key produced by [`key`](Self::key).
    pub fn from_key(key: &str) -> SimilarityResult<Self> {
        let invalid = || SimilarityError::Configuration(format!("invalid index key {key:?}"));
        let mut parts = key.rsplitn(3, '_');
        let trees = parts.next().ok_or_else(invalid)?;
        let distance = parts.next().ok_or_else(invalid)?;
        let metric = parts.next().ok_or_else(invalid)?;
        let trees = trees.parse().map_err(|_| invalid())?;
        Self::new(metric, distance.parse()?, trees)
    }
}

impl fmt::Display for IndexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_and_file_name() {
        let config = IndexConfig::new("mfccs", DistanceType::Angular, 10).unwrap();
        assert_eq!(config.key(), "mfccs_angular_10");
        assert_eq!(config.file_name(), "mfccs_angular_10.ann");
    }

    #[test]
    fn test_from_key_round_trip() {
        let config = IndexConfig::new("bpm", DistanceType::Manhattan, 7).unwrap();
        assert_eq!(IndexConfig::from_key(&config.key()).unwrap(), config);
        assert!(IndexConfig::from_key("bpm_cosine_7").is_err());
        assert!(IndexConfig::from_key("bpm").is_err());
    }

    #[test]
    fn test_tree_count_bounds() {
        assert!(IndexConfig::new("bpm", DistanceType::Angular, 0).is_err());
        assert!(IndexConfig::new("bpm", DistanceType::Angular, MAX_TREES).is_ok());
        assert!(matches!(
            IndexConfig::new("bpm", DistanceType::Angular, MAX_TREES + 1),
            Err(SimilarityError::Configuration(_))
        ));
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: IndexSettings =
            toml::from_str("default_distance = \"euclidean\"\nseed = 7").unwrap();
        assert_eq!(settings.default_distance, DistanceType::Euclidean);
        assert_eq!(settings.default_trees, 10);
        assert_eq!(settings.seed, Some(7));
    }
}
