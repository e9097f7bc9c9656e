use serde::{Deserialize, Serialize};

use crate::error::{SimilarityError, SimilarityResult};

/// Joins part names into a hybrid metric name, e.g. `mfccs_bpm`.
pub const HYBRID_SEPARATOR: char = '_';

/// One member of a binary-classifier cluster: the classifier id and the
/// class whose probability is read from its `all` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub model: String,
    pub class: String,
}

impl ClusterMember {
    #[must_use]
    pub fn new(model: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            class: class.into(),
        }
    }
}

/// Where a metric reads its raw values from.
///
/// Low-level paths are JSON pointers into the feature document
/// (e.g. `/lowlevel/mfcc/mean`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSource {
    /// Elements `start..end` of a numeric array.
    Projected {
        path: String,
        start: usize,
        end: usize,
    },
    /// Musical key on the circle of fifths, shifted by the scale.
    /// Produces a position in turns.
    Key {
        key_path: String,
        scale_path: String,
    },
    /// A positive scalar taken as `log2(x)`, in turns.
    LogScalar { path: String },
    /// A scalar used as-is.
    Scalar { path: String },
    /// Probabilities of several binary classifiers, turned into a
    /// zero-mean, unit-norm vector.
    BinaryCluster { members: Vec<ClusterMember> },
    /// The full class distribution of one multi-class classifier, in the
    /// listed class order.
    Distribution { model: String, classes: Vec<String> },
    /// The finished vectors of other metrics, concatenated in order.
    Hybrid { parts: Vec<MetricDefinition> },
}

impl MetricSource {
    /// Number of raw values produced before any circular wrap.
    pub fn width(&self) -> usize {
        match self {
            Self::Projected { start, end, .. } => end.saturating_sub(*start),
            Self::Key { .. } | Self::LogScalar { .. } | Self::Scalar { .. } => 1,
            Self::BinaryCluster { members } => members.len(),
            Self::Distribution { classes, .. } => classes.len(),
            Self::Hybrid { parts } => parts.iter().map(MetricDefinition::length).sum(),
        }
    }

    /// Short human-readable description of the raw data source.
    pub fn describe(&self) -> String {
        match self {
            Self::Projected { path, start, end } => format!("{path}[{start}..{end}]"),
            Self::Key {
                key_path,
                scale_path,
            } => format!("key({key_path}, {scale_path})"),
            Self::LogScalar { path } => format!("log2({path})"),
            Self::Scalar { path } => path.clone(),
            Self::BinaryCluster { members } => {
                let names: Vec<_> = members
                    .iter()
                    .map(|m| format!("{}:{}", m.model, m.class))
                    .collect();
                format!("cluster({})", names.join(", "))
            }
            Self::Distribution { model, .. } => format!("distribution({model})"),
            Self::Hybrid { parts } => {
                let names: Vec<_> = parts.iter().map(|p| p.name.as_str()).collect();
                format!("hybrid({})", names.join(", "))
            }
        }
    }
}

/// A named, fixed-length numeric projection of a feature document.
///
/// The transform is composed from the definition's flags: raw extraction,
/// then optional z-score normalization, then optional positional
/// weighting (`weight^i`), then optional circular wrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,

    pub category: String,

    #[serde(default)]
    pub description: String,

    pub source: MetricSource,

    /// Z-score against stored normalization stats.
    #[serde(default)]
    pub normalize: bool,

    /// Scale element `i` by `weight^i`.
    #[serde(default)]
    pub weight: Option<f64>,

    /// Map the scalar (in turns) onto the unit circle.
    #[serde(default)]
    pub circular: bool,

    /// Listed by `metrics list`; hidden metrics keep their vectors.
    #[serde(default = "visible_by_default")]
    pub visible: bool,
}

const fn visible_by_default() -> bool {
    true
}

impl MetricDefinition {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        source: MetricSource,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            description: description.into(),
            source,
            normalize: false,
            weight: None,
            circular: false,
            visible: true,
        }
    }

    /// Concatenation of `parts`, named after them.
    #[must_use]
    pub fn hybrid(
        category: impl Into<String>,
        description: impl Into<String>,
        parts: Vec<MetricDefinition>,
    ) -> Self {
        let name = parts
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(&HYBRID_SEPARATOR.to_string());
        Self::new(name, category, description, MetricSource::Hybrid { parts })
    }

    /// Whether both definitions produce the same vectors, regardless of
    /// how they are listed.
    pub fn same_transform(&self, other: &Self) -> bool {
        self.name == other.name
            && self.source == other.source
            && self.normalize == other.normalize
            && self.weight == other.weight
            && self.circular == other.circular
    }

    pub fn is_hybrid(&self) -> bool {
        matches!(self.source, MetricSource::Hybrid { .. })
    }

    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }

    #[must_use]
    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    #[must_use]
    pub fn circular(mut self) -> Self {
        self.circular = true;
        self
    }

    /// Fixed dimensionality of every vector this metric produces.
    pub fn length(&self) -> usize {
        if self.circular {
            2
        } else {
            self.source.width()
        }
    }

    /// Check that the flags and source fit together.
    pub fn validate(&self) -> SimilarityResult<()> {
        let fail = |reason: &str| {
            Err(SimilarityError::Configuration(format!(
                "metric {:?}: {reason}",
                self.name
            )))
        };

        if self.name.is_empty() {
            return fail("name must not be empty");
        }
        if let MetricSource::Hybrid { parts } = &self.source {
            return self.validate_hybrid(parts);
        }
        // Names end up in index file names.
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return fail("name may only contain ASCII letters, digits and '-'");
        }
        if self.source.width() == 0 {
            return fail("source produces no values");
        }
        if let MetricSource::BinaryCluster { members } = &self.source {
            if members.len() < 2 {
                return fail("a binary-classifier cluster needs at least two members");
            }
        }
        if self.circular {
            if self.source.width() != 1 {
                return fail("circular wrap needs a scalar source");
            }
            if self.normalize || self.weight.is_some() {
                return fail("circular metrics cannot be normalized or weighted");
            }
        } else if matches!(
            self.source,
            MetricSource::Key { .. } | MetricSource::LogScalar { .. }
        ) {
            return fail("key and log-scalar sources must be circular");
        }
        if let Some(weight) = self.weight {
            if !(weight.is_finite() && weight > 0.0) {
                return fail("weight must be a positive finite number");
            }
        }
        Ok(())
    }

    fn validate_hybrid(&self, parts: &[MetricDefinition]) -> SimilarityResult<()> {
        let fail = |reason: String| {
            Err(SimilarityError::Configuration(format!(
                "hybrid metric {:?}: {reason}",
                self.name
            )))
        };

        if parts.len() < 2 {
            return fail("needs at least two parts".to_string());
        }
        let names: Vec<_> = self.name.split(HYBRID_SEPARATOR).collect();
        if names.len() != parts.len() || names.iter().zip(parts).any(|(n, p)| *n != p.name) {
            return fail(format!(
                "name must be its part names joined by '{HYBRID_SEPARATOR}'"
            ));
        }
        for (i, part) in parts.iter().enumerate() {
            if part.is_hybrid() {
                return fail(format!("part {} is itself a hybrid", part.name));
            }
            if parts[..i].iter().any(|p| p.name == part.name) {
                return fail(format!("part {} is listed twice", part.name));
            }
            part.validate()?;
        }
        if self.normalize || self.weight.is_some() || self.circular {
            return fail("flags apply to the parts, not the hybrid".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projected() -> MetricSource {
        MetricSource::Projected {
            path: "/lowlevel/mfcc/mean".to_string(),
            start: 1,
            end: 13,
        }
    }

    #[test]
    fn test_length_of_projected_metric() {
        let def = MetricDefinition::new("mfccs", "timbral", "MFCCs", projected()).normalized();
        assert_eq!(def.length(), 12);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_length_of_circular_metric() {
        let def = MetricDefinition::new(
            "bpm",
            "rhythm",
            "BPM",
            MetricSource::LogScalar {
                path: "/rhythm/bpm".to_string(),
            },
        )
        .circular();
        assert_eq!(def.length(), 2);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_circular_rejects_vector_source() {
        let def = MetricDefinition::new("bad", "timbral", "", projected()).circular();
        assert!(matches!(
            def.validate(),
            Err(SimilarityError::Configuration(_))
        ));
    }

    #[test]
    fn test_circular_rejects_normalization() {
        let def = MetricDefinition::new(
            "bad",
            "rhythm",
            "",
            MetricSource::Scalar {
                path: "/rhythm/bpm".to_string(),
            },
        )
        .circular()
        .normalized();
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_log_scalar_requires_circular() {
        let def = MetricDefinition::new(
            "bad",
            "rhythm",
            "",
            MetricSource::LogScalar {
                path: "/rhythm/bpm".to_string(),
            },
        );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_name_must_be_file_safe() {
        let def = MetricDefinition::new("mfcc/../x", "timbral", "", projected());
        assert!(def.validate().is_err());
        let def = MetricDefinition::new("mfcc_2", "timbral", "", projected());
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_weight_must_be_positive() {
        let def = MetricDefinition::new("bad", "timbral", "", projected()).weighted(0.0);
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_empty_projection_rejected() {
        let def = MetricDefinition::new(
            "bad",
            "timbral",
            "",
            MetricSource::Projected {
                path: "/x".to_string(),
                start: 4,
                end: 4,
            },
        );
        assert!(def.validate().is_err());
    }

    fn bpm() -> MetricDefinition {
        MetricDefinition::new(
            "bpm",
            "rhythm",
            "BPM",
            MetricSource::LogScalar {
                path: "/rhythm/bpm".to_string(),
            },
        )
        .circular()
    }

    #[test]
    fn test_hybrid_length_and_name() {
        let mfccs = MetricDefinition::new("mfccs", "timbral", "MFCCs", projected()).normalized();
        let def = MetricDefinition::hybrid("mixed", "MFCCs and BPM", vec![mfccs, bpm()]);
        assert_eq!(def.name, "mfccs_bpm");
        assert_eq!(def.length(), 14);
        assert!(def.is_hybrid());
        assert!(def.visible);
        assert_eq!(def.source.describe(), "hybrid(mfccs, bpm)");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_hybrid_rules() {
        let single = MetricDefinition::hybrid("rhythm", "", vec![bpm()]);
        assert!(single.validate().is_err());

        let twice = MetricDefinition::hybrid("rhythm", "", vec![bpm(), bpm()]);
        assert!(twice.validate().is_err());

        let mut renamed = MetricDefinition::hybrid(
            "mixed",
            "",
            vec![bpm(), MetricDefinition::new("mfccs", "timbral", "", projected())],
        );
        renamed.name = "bpm-mfccs".to_string();
        assert!(renamed.validate().is_err());

        let inner = MetricDefinition::hybrid(
            "mixed",
            "",
            vec![bpm(), MetricDefinition::new("mfccs", "timbral", "", projected())],
        );
        let nested = MetricDefinition::hybrid("mixed", "", vec![inner, bpm()]);
        assert!(nested.validate().is_err());

        let flagged = MetricDefinition::hybrid(
            "mixed",
            "",
            vec![bpm(), MetricDefinition::new("mfccs", "timbral", "", projected())],
        )
        .normalized();
        assert!(flagged.validate().is_err());
    }

    #[test]
    fn test_visible_defaults_to_true_in_toml() {
        let def: MetricDefinition = toml::from_str(
            r#"
name = "bpm"
category = "rhythm"
circular = true

[source]
kind = "log_scalar"
path = "/rhythm/bpm"
"#,
        )
        .unwrap();
        assert!(def.visible);
    }

    #[test]
    fn test_describe_source() {
        assert_eq!(projected().describe(), "/lowlevel/mfcc/mean[1..13]");
    }
}
