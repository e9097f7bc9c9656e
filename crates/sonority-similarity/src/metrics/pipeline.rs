//! Metric transforms as independent steps.
//!
//! A vector is produced by [`extract`], then [`normalize`] and [`weight`]
//! when the definition asks for them, and finally [`wrap_circular`] for
//! periodic scalars. [`VectorBuilder`] strings the steps together for one
//! metric.

use sonority_core::model::FeatureDocument;
use std::f64::consts::TAU;

use crate::error::{SimilarityError, SimilarityResult};
use crate::metrics::definition::{MetricDefinition, MetricSource};
use crate::stats::NormalizationStats;

/// Keys in circle-of-fifths order. Position `i` maps to `i / 12` turns.
const CIRCLE_OF_FIFTHS: [&str; 12] = [
    "C", "G", "D", "A", "E", "B", "F#", "C#", "G#", "D#", "A#", "F",
];

/// A minor key sits three fifths counter-clockwise of its parallel major,
/// on top of its relative major.
const MINOR_OFFSET: f64 = -3.0 / 12.0;

fn invalid(definition: &MetricDefinition, doc: &FeatureDocument, reason: String) -> SimilarityError {
    SimilarityError::InvalidFeatureData {
        metric: definition.name.clone(),
        id: doc.id,
        reason,
    }
}

fn number_at(doc: &FeatureDocument, path: &str) -> Result<f64, String> {
    doc.lowlevel_at(path)
        .ok_or_else(|| format!("missing field {path}"))?
        .as_f64()
        .ok_or_else(|| format!("field {path} is not a number"))
}

fn text_at<'a>(doc: &'a FeatureDocument, path: &str) -> Result<&'a str, String> {
    doc.lowlevel_at(path)
        .ok_or_else(|| format!("missing field {path}"))?
        .as_str()
        .ok_or_else(|| format!("field {path} is not a string"))
}

fn slice_at(doc: &FeatureDocument, path: &str, start: usize, end: usize) -> Result<Vec<f64>, String> {
    let values = doc
        .lowlevel_at(path)
        .ok_or_else(|| format!("missing field {path}"))?
        .as_array()
        .ok_or_else(|| format!("field {path} is not an array"))?;
    if values.len() < end {
        return Err(format!(
            "field {path} has {} values, need at least {end}",
            values.len()
        ));
    }
    values[start..end]
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64()
                .ok_or_else(|| format!("element {} of {path} is not a number", start + i))
        })
        .collect()
}

/// Position of a key in turns around the circle of fifths.
fn key_turns(key: &str, scale: &str) -> Result<f64, String> {
    let canonical = match key {
        "Db" => "C#",
        "Eb" => "D#",
        "Gb" => "F#",
        "Ab" => "G#",
        "Bb" => "A#",
        other => other,
    };
    let position = CIRCLE_OF_FIFTHS
        .iter()
        .position(|k| *k == canonical)
        .ok_or_else(|| format!("unknown key {key:?}"))?;
    let offset = match scale {
        "major" => 0.0,
        "minor" => MINOR_OFFSET,
        other => return Err(format!("unknown scale {other:?}")),
    };
    Ok(position as f64 / 12.0 + offset)
}

/// Map `2p - 1` over the cluster, subtract the mean and scale to unit
/// length. An all-zero centered vector is returned unscaled.
fn center_cluster(probabilities: &[f64]) -> Vec<f64> {
    let signed: Vec<f64> = probabilities.iter().map(|p| p - (1.0 - p)).collect();
    let mean = signed.iter().sum::<f64>() / signed.len() as f64;
    let centered: Vec<f64> = signed.iter().map(|v| v - mean).collect();
    let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        centered
    } else {
        centered.into_iter().map(|v| v / norm).collect()
    }
}

fn extract_raw(source: &MetricSource, doc: &FeatureDocument) -> Result<Vec<f64>, String> {
    match source {
        MetricSource::Projected { path, start, end } => slice_at(doc, path, *start, *end),
        MetricSource::Key {
            key_path,
            scale_path,
        } => {
            let key = text_at(doc, key_path)?;
            let scale = text_at(doc, scale_path)?;
            Ok(vec![key_turns(key, scale)?])
        }
        MetricSource::LogScalar { path } => {
            let value = number_at(doc, path)?;
            if value <= 0.0 {
                return Err(format!("field {path} must be positive, got {value}"));
            }
            Ok(vec![value.log2()])
        }
        MetricSource::Scalar { path } => Ok(vec![number_at(doc, path)?]),
        MetricSource::BinaryCluster { members } => {
            let probabilities = members
                .iter()
                .map(|member| {
                    doc.classifier(&member.model)
                        .ok_or_else(|| format!("missing classifier {}", member.model))?
                        .probability_of(&member.class)
                        .ok_or_else(|| {
                            format!("classifier {} has no class {}", member.model, member.class)
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(center_cluster(&probabilities))
        }
        MetricSource::Distribution { model, classes } => {
            let output = doc
                .classifier(model)
                .ok_or_else(|| format!("missing classifier {model}"))?;
            classes
                .iter()
                .map(|class| {
                    output
                        .probability_of(class)
                        .ok_or_else(|| format!("classifier {model} has no class {class}"))
                })
                .collect()
        }
        MetricSource::Hybrid { parts } => {
            let mut values = Vec::new();
            for part in parts {
                values.extend(extract_raw(&part.source, doc)?);
            }
            Ok(values)
        }
    }
}

/// Read the metric's raw values from a document, before normalization,
/// weighting or wrapping. For a hybrid these are the raw values of its
/// parts, one after the other.
pub fn extract(definition: &MetricDefinition, doc: &FeatureDocument) -> SimilarityResult<Vec<f64>> {
    extract_raw(&definition.source, doc).map_err(|reason| invalid(definition, doc, reason))
}

/// Z-score each dimension in place. A zero stddev divides by one.
pub fn normalize(values: &mut [f64], stats: &NormalizationStats) {
    for ((value, mean), stddev) in values.iter_mut().zip(&stats.means).zip(&stats.stddevs) {
        let scale = if *stddev == 0.0 { 1.0 } else { *stddev };
        *value = (*value - mean) / scale;
    }
}

/// Multiply element `i` by `weight^i`.
pub fn weight(values: &mut [f64], weight: f64) {
    let mut factor = 1.0;
    for value in values.iter_mut() {
        *value *= factor;
        factor *= weight;
    }
}

/// Map a position in turns onto the unit circle.
pub fn wrap_circular(turns: f64) -> [f64; 2] {
    let angle = TAU * turns;
    [angle.cos(), angle.sin()]
}

/// Applies one metric's transform to feature documents.
#[derive(Debug, Clone)]
pub struct VectorBuilder {
    definition: MetricDefinition,
    stats: Option<NormalizationStats>,
    /// Builders of a hybrid's parts, in order. Empty otherwise.
    parts: Vec<VectorBuilder>,
}

impl VectorBuilder {
    /// Prepare a builder for `definition`.
    ///
    /// Normalized metrics need `stats`; without them this fails with
    /// [`SimilarityError::StatsNotComputed`]. Hybrids are prepared with
    /// [`VectorBuilder::hybrid`].
    pub fn new(
        definition: &MetricDefinition,
        stats: Option<&NormalizationStats>,
    ) -> SimilarityResult<Self> {
        definition.validate()?;
        if definition.is_hybrid() {
            return Err(SimilarityError::Configuration(format!(
                "hybrid metric {} is built from the builders of its parts",
                definition.name
            )));
        }
        let stats = if definition.normalize {
            let stats = stats.ok_or_else(|| SimilarityError::StatsNotComputed {
                metric: definition.name.clone(),
            })?;
            let width = definition.source.width();
            if stats.means.len() != width || stats.stddevs.len() != width {
                return Err(SimilarityError::Configuration(format!(
                    "stats for {} have {} dimensions, metric has {width}",
                    definition.name,
                    stats.means.len()
                )));
            }
            Some(stats.clone())
        } else {
            None
        };
        Ok(Self {
            definition: definition.clone(),
            stats,
            parts: Vec::new(),
        })
    }

    /// Prepare a hybrid builder from one builder per part, in the order
    /// the definition lists them.
    pub fn hybrid(definition: &MetricDefinition, parts: Vec<VectorBuilder>) -> SimilarityResult<Self> {
        definition.validate()?;
        let MetricSource::Hybrid { parts: expected } = &definition.source else {
            return Err(SimilarityError::Configuration(format!(
                "metric {} is not a hybrid",
                definition.name
            )));
        };
        let matches = expected.len() == parts.len()
            && expected.iter().zip(&parts).all(|(e, p)| *e == p.definition);
        if !matches {
            return Err(SimilarityError::Configuration(format!(
                "part builders do not match hybrid metric {}",
                definition.name
            )));
        }
        Ok(Self {
            definition: definition.clone(),
            stats: None,
            parts,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    pub fn length(&self) -> usize {
        self.definition.length()
    }

    /// Compute the metric vector for one document.
    pub fn transform(&self, doc: &FeatureDocument) -> SimilarityResult<Vec<f64>> {
        if !self.parts.is_empty() {
            return self.transform_parts(doc);
        }
        let mut values = extract(&self.definition, doc)?;

        if let Some(stats) = &self.stats {
            normalize(&mut values, stats);
        }
        if let Some(w) = self.definition.weight {
            weight(&mut values, w);
        }
        if self.definition.circular {
            values = wrap_circular(values[0]).to_vec();
        }

        if values.iter().any(|v| !v.is_finite()) {
            return Err(invalid(
                &self.definition,
                doc,
                "transform produced a non-finite value".to_string(),
            ));
        }
        debug_assert_eq!(values.len(), self.length());
        Ok(values)
    }

    fn transform_parts(&self, doc: &FeatureDocument) -> SimilarityResult<Vec<f64>> {
        let mut values = Vec::with_capacity(self.length());
        for part in &self.parts {
            match part.transform(doc) {
                Ok(vector) => values.extend(vector),
                Err(SimilarityError::InvalidFeatureData { metric, reason, .. }) => {
                    return Err(invalid(&self.definition, doc, format!("{metric}: {reason}")));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }
}
