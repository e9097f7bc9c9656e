use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SimilarityError;

/// Distance function an index is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceType {
    /// `sqrt(2 - 2 cos θ)`, the Euclidean distance of the normalized
    /// vectors. A zero vector has cosine 0 with everything.
    #[default]
    Angular,
    Euclidean,
    Manhattan,
}

impl DistanceType {
    pub const ALL: [Self; 3] = [Self::Angular, Self::Euclidean, Self::Manhattan];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Angular => "angular",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
        }
    }

    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        let pairs = a.iter().zip(b).map(|(x, y)| (f64::from(*x), f64::from(*y)));
        match self {
            Self::Angular => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
                for (x, y) in pairs {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                let denom = (norm_a * norm_b).sqrt();
                let cos = if denom > 0.0 { dot / denom } else { 0.0 };
                (2.0 - 2.0 * cos).max(0.0).sqrt()
            }
            Self::Euclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
            Self::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
        }
    }
}

impl fmt::Display for DistanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceType {
    type Err = SimilarityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| {
                SimilarityError::Configuration(format!(
                    "unknown distance type {s:?} (expected angular, euclidean or manhattan)"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_distance_type() {
        assert_eq!("angular".parse::<DistanceType>().unwrap(), DistanceType::Angular);
        assert_eq!("manhattan".parse::<DistanceType>().unwrap(), DistanceType::Manhattan);
        assert!(matches!(
            "cosine".parse::<DistanceType>(),
            Err(SimilarityError::Configuration(_))
        ));
    }

    #[test]
    fn test_angular_distance() {
        let d = DistanceType::Angular;
        assert!(d.distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-9);
        assert!((d.distance(&[1.0, 0.0], &[0.0, 1.0]) - 2f64.sqrt()).abs() < 1e-9);
        assert!((d.distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-9);
        // zero vectors sit at cosine 0
        assert!((d.distance(&[0.0, 0.0], &[1.0, 0.0]) - 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_euclidean_and_manhattan() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert!((DistanceType::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-9);
        assert!((DistanceType::Manhattan.distance(&a, &b) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = [0.3, -1.2, 4.0];
        let b = [1.0, 0.5, -2.0];
        for d in DistanceType::ALL {
            assert_eq!(d.distance(&a, &b), d.distance(&b, &a));
        }
    }

    #[test]
    fn test_serde_lowercase() {
        let d: DistanceType = serde_json::from_str("\"euclidean\"").unwrap();
        assert_eq!(d, DistanceType::Euclidean);
        assert_eq!(d.to_string(), "euclidean");
    }
}
