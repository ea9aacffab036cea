//! Weighted subscores and their composite.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tolerance used when comparing a composite against a threshold.
const SCORE_EPSILON: f64 = 1e-9;

/// One named criterion of a grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscore {
    pub name: String,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Non-negative weight.
    pub weight: f64,
}

impl Subscore {
    /// Creates a subscore, clamping the score into `[0, 1]` and the weight to
    /// a finite non-negative value.
    pub fn new(name: impl Into<String>, score: f64, weight: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        let weight = if weight.is_finite() && weight > 0.0 { weight } else { 0.0 };
        Self {
            name: name.into(),
            score,
            weight,
        }
    }

    /// A binary criterion: 1.0 when `passed`, else 0.0.
    pub fn check(name: impl Into<String>, passed: bool, weight: f64) -> Self {
        Self::new(name, if passed { 1.0 } else { 0.0 }, weight)
    }

    pub fn passed(&self) -> bool {
        self.score >= 1.0 - SCORE_EPSILON
    }
}

/// Weighted set of subscores plus diagnostic metadata.
///
/// Built only through [`Grade::from_subscores`] (or [`Grade::combine`], which
/// uses the same rule), so the composite always matches the subscores.
/// Deserializing recomputes the composite and ignores the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GradeRecord")]
pub struct Grade {
    subscores: Vec<Subscore>,
    composite: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, serde_json::Value>,
}

/// Serialized form of a [`Grade`].
#[derive(Deserialize)]
struct GradeRecord {
    subscores: Vec<Subscore>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl From<GradeRecord> for Grade {
    fn from(record: GradeRecord) -> Self {
        let subscores = record
            .subscores
            .into_iter()
            .map(|s| Subscore::new(s.name, s.score, s.weight))
            .collect();
        let mut grade = Grade::from_subscores(subscores);
        grade.metadata = record.metadata;
        grade
    }
}

impl Grade {
    /// Composite is `sum(score * weight) / sum(weight)`, or 0 when every
    /// weight is zero.
    pub fn from_subscores(subscores: Vec<Subscore>) -> Self {
        let total_weight: f64 = subscores.iter().map(|s| s.weight).sum();
        let composite = if total_weight > 0.0 {
            let weighted: f64 = subscores.iter().map(|s| s.score * s.weight).sum();
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            subscores,
            composite,
            metadata: BTreeMap::new(),
        }
    }

    /// Flattens several grades into one, keeping subscore order. Metadata
    /// keys from later grades win.
    pub fn combine(grades: impl IntoIterator<Item = Grade>) -> Self {
        let mut subscores = Vec::new();
        let mut metadata = BTreeMap::new();
        for grade in grades {
            subscores.extend(grade.subscores);
            metadata.extend(grade.metadata);
        }
        let mut combined = Self::from_subscores(subscores);
        combined.metadata = metadata;
        combined
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn composite(&self) -> f64 {
        self.composite
    }

    pub fn subscores(&self) -> &[Subscore] {
        &self.subscores
    }

    pub fn subscore(&self, name: &str) -> Option<&Subscore> {
        self.subscores.iter().find(|s| s.name == name)
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Whether the composite reaches `threshold`.
    pub fn meets(&self, threshold: f64) -> bool {
        self.composite + SCORE_EPSILON >= threshold
    }
}
