//! Registry of metric definitions.
//!
//! The built-in catalog covers the timbral, rhythmic, tonal and
//! classifier-derived metrics. A TOML file with the same shape can replace
//! it:
//!
//! ```toml
//! [[metrics]]
//! name = "mfccs"
//! category = "timbral"
//! description = "MFCCs"
//! normalize = true
//!
//! [metrics.source]
//! kind = "projected"
//! path = "/lowlevel/mfcc/mean"
//! start = 1
//! end = 13
//!
//! [[hybrids]]
//! name = "mfccs_bpm"
//! category = "mixed"
//! description = "MFCCs and BPM"
//! ```
//!
//! A hybrid is named after its parts, joined by `_`, each of which must be
//! a metric of the same catalog.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{SimilarityError, SimilarityResult};
use crate::metrics::definition::{ClusterMember, MetricDefinition, MetricSource, HYBRID_SEPARATOR};

/// Default positional weight for the weighted cepstral metrics.
pub const DEFAULT_WEIGHT: f64 = 0.95;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    metrics: Vec<MetricDefinition>,
    #[serde(default)]
    hybrids: Vec<HybridEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HybridEntry {
    name: String,
    category: String,
    #[serde(default)]
    description: String,
}

/// The set of metrics vectors can be computed and indexed for.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    metrics: Vec<MetricDefinition>,
}

impl MetricCatalog {
    /// Build a catalog from definitions, validating each one and rejecting
    /// duplicate names.
    pub fn from_definitions(metrics: Vec<MetricDefinition>) -> SimilarityResult<Self> {
        let mut seen = HashSet::new();
        for metric in &metrics {
            metric.validate()?;
            if !seen.insert(metric.name.as_str()) {
                return Err(SimilarityError::Configuration(format!(
                    "metric {:?} is defined more than once",
                    metric.name
                )));
            }
        }
        let catalog = Self { metrics };
        for metric in &catalog.metrics {
            if let MetricSource::Hybrid { parts } = &metric.source {
                for part in parts {
                    let defined = catalog.get(&part.name).is_some_and(|d| d.same_transform(part));
                    if !defined {
                        return Err(SimilarityError::Configuration(format!(
                            "hybrid metric {:?} uses {:?}, which the catalog does not define the same way",
                            metric.name, part.name
                        )));
                    }
                }
            }
        }
        Ok(catalog)
    }

    /// Load a catalog from a TOML file.
    pub fn load(path: &Path) -> SimilarityResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: CatalogFile = toml::from_str(&content).map_err(|e| {
            SimilarityError::Configuration(format!(
                "failed to parse metric catalog from {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut catalog = Self::from_definitions(file.metrics)?;
        for hybrid in file.hybrids {
            catalog.add_hybrid(&hybrid.name, &hybrid.category, &hybrid.description)?;
        }
        Ok(catalog)
    }

    /// The catalog shipped with sonority.
    pub fn builtin() -> Self {
        Self {
            metrics: builtin_metrics(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Like [`get`](Self::get) but unknown names are a configuration error.
    pub fn require(&self, name: &str) -> SimilarityResult<&MetricDefinition> {
        self.get(name)
            .ok_or_else(|| SimilarityError::Configuration(format!("unknown metric {name:?}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.name.as_str()).collect()
    }

    /// Metrics not hidden with [`set_visible`](Self::set_visible).
    pub fn visible(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter().filter(|m| m.visible)
    }

    /// Register the hybrid of the metrics named in `name`, e.g. `mfccs_bpm`.
    ///
    /// Registering an existing hybrid again makes it visible.
    pub fn add_hybrid(
        &mut self,
        name: &str,
        category: &str,
        description: &str,
    ) -> SimilarityResult<&MetricDefinition> {
        if let Some(at) = self.metrics.iter().position(|m| m.name == name) {
            let existing = &mut self.metrics[at];
            if !existing.is_hybrid() {
                return Err(SimilarityError::Configuration(format!(
                    "metric {name:?} exists and is not a hybrid"
                )));
            }
            existing.visible = true;
            return Ok(existing);
        }

        let parts = name
            .split(HYBRID_SEPARATOR)
            .map(|part| self.require(part).cloned())
            .collect::<SimilarityResult<Vec<_>>>()?;
        if category.is_empty() {
            return Err(SimilarityError::Configuration(format!(
                "hybrid metric {name:?} needs a category"
            )));
        }
        let hybrid = MetricDefinition::hybrid(category, description, parts);
        hybrid.validate()?;
        log::debug!("Registered hybrid metric {} ({} dimensions)", name, hybrid.length());
        self.metrics.push(hybrid);
        Ok(&self.metrics[self.metrics.len() - 1])
    }

    /// Show or hide a metric in listings. Its vectors and indexes stay
    /// usable either way.
    pub fn set_visible(&mut self, name: &str, visible: bool) -> SimilarityResult<()> {
        let metric = self
            .metrics
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| SimilarityError::Configuration(format!("unknown metric {name:?}")))?;
        metric.visible = visible;
        Ok(())
    }

    /// Metrics whose transform needs normalization stats.
    pub fn normalized(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter().filter(|m| m.normalize)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// `(name, description)` pairs of the visible metrics, grouped by
    /// category.
    pub fn by_category(&self) -> BTreeMap<String, Vec<(String, String)>> {
        let mut grouped: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for metric in self.visible() {
            grouped
                .entry(metric.category.clone())
                .or_default()
                .push((metric.name.clone(), metric.description.clone()));
        }
        grouped
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn cepstral(name: &str, description: &str, path: &str) -> MetricDefinition {
    MetricDefinition::new(
        name,
        "timbral",
        description,
        MetricSource::Projected {
            path: path.to_string(),
            start: 1,
            end: 13,
        },
    )
    .normalized()
}

fn distribution(name: &str, description: &str, model: &str, classes: &[&str]) -> MetricDefinition {
    MetricDefinition::new(
        name,
        "high-level",
        description,
        MetricSource::Distribution {
            model: model.to_string(),
            classes: classes.iter().map(|c| (*c).to_string()).collect(),
        },
    )
}

fn cluster(name: &str, description: &str, members: &[(&str, &str)]) -> MetricDefinition {
    MetricDefinition::new(
        name,
        "high-level",
        description,
        MetricSource::BinaryCluster {
            members: members
                .iter()
                .map(|(model, class)| ClusterMember::new(*model, *class))
                .collect(),
        },
    )
}

fn builtin_metrics() -> Vec<MetricDefinition> {
    vec![
        cepstral("mfccs", "MFCCs", "/lowlevel/mfcc/mean"),
        cepstral("mfccsw", "MFCCs (weighted)", "/lowlevel/mfcc/mean").weighted(DEFAULT_WEIGHT),
        cepstral("gfccs", "GFCCs", "/lowlevel/gfcc/mean"),
        cepstral("gfccsw", "GFCCs (weighted)", "/lowlevel/gfcc/mean").weighted(DEFAULT_WEIGHT),
        MetricDefinition::new(
            "key",
            "harmonic",
            "Key/Scale",
            MetricSource::Key {
                key_path: "/tonal/key_key".to_string(),
                scale_path: "/tonal/key_scale".to_string(),
            },
        )
        .circular(),
        MetricDefinition::new(
            "bpm",
            "rhythm",
            "BPM",
            MetricSource::LogScalar {
                path: "/rhythm/bpm".to_string(),
            },
        )
        .circular(),
        MetricDefinition::new(
            "onsetrate",
            "rhythm",
            "Onset rate",
            MetricSource::LogScalar {
                path: "/rhythm/onset_rate".to_string(),
            },
        )
        .circular(),
        cluster(
            "moods",
            "Moods",
            &[
                ("mood_happy", "happy"),
                ("mood_sad", "sad"),
                ("mood_aggressive", "aggressive"),
                ("mood_relaxed", "relaxed"),
                ("mood_party", "party"),
                ("mood_acoustic", "acoustic"),
                ("mood_electronic", "electronic"),
            ],
        ),
        cluster(
            "instruments",
            "Instruments",
            &[
                ("mood_acoustic", "acoustic"),
                ("mood_electronic", "electronic"),
                ("voice_instrumental", "voice"),
                ("gender", "female"),
                ("timbre", "bright"),
            ],
        ),
        distribution(
            "dortmund",
            "Genre (dortmund model)",
            "genre_dortmund",
            &[
                "alternative",
                "blues",
                "electronic",
                "folkcountry",
                "funksoulrnb",
                "jazz",
                "pop",
                "raphiphop",
                "rock",
            ],
        ),
        distribution(
            "rosamerica",
            "Genre (rosamerica model)",
            "genre_rosamerica",
            &["cla", "dan", "hip", "jaz", "pop", "rhy", "roc", "spe"],
        ),
        distribution(
            "tzanetakis",
            "Genre (tzanetakis model)",
            "genre_tzanetakis",
            &["blu", "cla", "cou", "dis", "hip", "jaz", "met", "pop", "reg", "roc"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let builtin = MetricCatalog::builtin();
        let validated = MetricCatalog::from_definitions(builtin.metrics.clone()).unwrap();
        assert_eq!(validated.len(), 12);
    }

    #[test]
    fn test_builtin_lengths() {
        let catalog = MetricCatalog::builtin();
        assert_eq!(catalog.require("mfccs").unwrap().length(), 12);
        assert_eq!(catalog.require("gfccsw").unwrap().length(), 12);
        assert_eq!(catalog.require("key").unwrap().length(), 2);
        assert_eq!(catalog.require("bpm").unwrap().length(), 2);
        assert_eq!(catalog.require("moods").unwrap().length(), 7);
        assert_eq!(catalog.require("dortmund").unwrap().length(), 9);
        assert_eq!(catalog.require("rosamerica").unwrap().length(), 8);
        assert_eq!(catalog.require("tzanetakis").unwrap().length(), 10);
    }

    #[test]
    fn test_unknown_metric_is_configuration_error() {
        let catalog = MetricCatalog::builtin();
        assert!(matches!(
            catalog.require("mfc"),
            Err(SimilarityError::Configuration(_))
        ));
    }

    #[test]
    fn test_normalized_metrics() {
        let catalog = MetricCatalog::builtin();
        let names: Vec<_> = catalog.normalized().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["mfccs", "mfccsw", "gfccs", "gfccsw"]);
    }

    #[test]
    fn test_by_category() {
        let grouped = MetricCatalog::builtin().by_category();
        let rhythm = &grouped["rhythm"];
        assert_eq!(rhythm.len(), 2);
        assert_eq!(rhythm[0], ("bpm".to_string(), "BPM".to_string()));
        assert_eq!(grouped["timbral"].len(), 4);
    }

    #[test]
    fn test_add_hybrid() {
        let mut catalog = MetricCatalog::builtin();
        let hybrid = catalog.add_hybrid("mfccs_bpm", "mixed", "MFCCs and BPM").unwrap();
        assert_eq!(hybrid.length(), 14);
        assert!(!hybrid.normalize);
        assert_eq!(catalog.len(), 13);
        assert!(catalog.require("mfccs_bpm").unwrap().is_hybrid());
        assert!(MetricCatalog::from_definitions(catalog.metrics.clone()).is_ok());

        // Unknown parts, base names and missing categories are rejected.
        assert!(catalog.add_hybrid("mfccs_tempo", "mixed", "").is_err());
        assert!(catalog.add_hybrid("bpm", "mixed", "").is_err());
        assert!(catalog.add_hybrid("key_bpm", "", "").is_err());
        assert_eq!(catalog.len(), 13);
    }

    #[test]
    fn test_hybrid_parts_must_match_catalog() {
        let mut catalog = MetricCatalog::builtin();
        catalog.add_hybrid("key_bpm", "mixed", "").unwrap();
        let metrics: Vec<_> = catalog
            .iter()
            .filter(|m| m.name != "key")
            .cloned()
            .collect();
        assert!(MetricCatalog::from_definitions(metrics).is_err());
    }

    #[test]
    fn test_hidden_metrics_are_not_listed() {
        let mut catalog = MetricCatalog::builtin();
        catalog.set_visible("onsetrate", false).unwrap();
        assert_eq!(catalog.by_category()["rhythm"].len(), 1);
        assert_eq!(catalog.visible().count(), 11);
        // Hidden metrics still resolve.
        assert!(catalog.require("onsetrate").is_ok());

        catalog.set_visible("onsetrate", true).unwrap();
        assert_eq!(catalog.by_category()["rhythm"].len(), 2);
        assert!(catalog.set_visible("tempo", false).is_err());
    }

    #[test]
    fn test_re_adding_hybrid_shows_it() {
        let mut catalog = MetricCatalog::builtin();
        catalog.add_hybrid("bpm_onsetrate", "rhythm", "").unwrap();
        catalog.set_visible("bpm_onsetrate", false).unwrap();
        assert!(catalog.add_hybrid("bpm_onsetrate", "rhythm", "").unwrap().visible);
        assert_eq!(catalog.len(), 13);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let metrics = vec![
            cepstral("mfccs", "MFCCs", "/lowlevel/mfcc/mean"),
            cepstral("mfccs", "MFCCs again", "/lowlevel/mfcc/mean"),
        ];
        assert!(MetricCatalog::from_definitions(metrics).is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let toml_content = r#"
[[metrics]]
name = "mfccs"
category = "timbral"
description = "MFCCs"
normalize = true

[metrics.source]
kind = "projected"
path = "/lowlevel/mfcc/mean"
start = 1
end = 13

[[metrics]]
name = "bpm"
category = "rhythm"
circular = true

[metrics.source]
kind = "log_scalar"
path = "/rhythm/bpm"

[[metrics]]
name = "genre"
category = "high-level"

[metrics.source]
kind = "distribution"
model = "genre_dortmund"
classes = ["pop", "rock"]

[[hybrids]]
name = "genre_bpm"
category = "mixed"
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.toml");
        std::fs::write(&path, toml_content).unwrap();

        let catalog = MetricCatalog::load(&path).unwrap();
        assert_eq!(catalog.names(), vec!["mfccs", "bpm", "genre", "genre_bpm"]);
        assert_eq!(catalog.require("genre_bpm").unwrap().length(), 4);
        assert!(catalog.require("mfccs").unwrap().normalize);
        assert_eq!(catalog.require("bpm").unwrap().length(), 2);
        assert_eq!(catalog.require("genre").unwrap().length(), 2);
    }

    #[test]
    fn test_load_rejects_invalid_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.toml");
        std::fs::write(
            &path,
            r#"
[[metrics]]
name = "bpm"
category = "rhythm"

[metrics.source]
kind = "log_scalar"
path = "/rhythm/bpm"
"#,
        )
        .unwrap();

        assert!(matches!(
            MetricCatalog::load(&path),
            Err(SimilarityError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml [[[[").unwrap();
        assert!(MetricCatalog::load(&path).is_err());
    }
}
