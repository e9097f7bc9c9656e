use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ids::InternalId;

/// Output block of one precomputed classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    /// Class name to probability.
    #[serde(default)]
    pub all: BTreeMap<String, f64>,

    /// The winning class.
    #[serde(default)]
    pub value: Option<String>,

    /// Probability of the winning class.
    #[serde(default)]
    pub probability: Option<f64>,
}

impl ClassifierOutput {
    #[must_use]
    pub fn new(all: BTreeMap<String, f64>) -> Self {
        let winner = all
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(class, p)| (class.clone(), *p));
        Self {
            all,
            value: winner.as_ref().map(|(class, _)| class.clone()),
            probability: winner.map(|(_, p)| p),
        }
    }

    /// Probability assigned to `class`, if the classifier reported it.
    pub fn probability_of(&self, class: &str) -> Option<f64> {
        self.all.get(class).copied()
    }
}

/// Immutable analysis result for one submission.
///
/// `lowlevel` holds the signal statistics exactly as they were submitted;
/// `classifiers` maps a classifier id (e.g. `mood_happy`) to its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDocument {
    pub id: InternalId,
    pub lowlevel: serde_json::Value,
    #[serde(default)]
    pub classifiers: BTreeMap<String, ClassifierOutput>,
}

impl FeatureDocument {
    #[must_use]
    pub fn new(id: InternalId, lowlevel: serde_json::Value) -> Self {
        Self {
            id,
            lowlevel,
            classifiers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, model: impl Into<String>, output: ClassifierOutput) -> Self {
        self.classifiers.insert(model.into(), output);
        self
    }

    /// Look up a low-level value by JSON pointer (e.g. `/rhythm/bpm`).
    pub fn lowlevel_at(&self, pointer: &str) -> Option<&serde_json::Value> {
        self.lowlevel.pointer(pointer)
    }

    pub fn classifier(&self, model: &str) -> Option<&ClassifierOutput> {
        self.classifiers.get(model)
    }
}
