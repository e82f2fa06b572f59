//! Confidence model
//!
//! Pure scoring functions. A final score is the unweighted mean of the base
//! confidence and every supplied factor, clamped to [`MIN_SCORE`, `MAX_SCORE`]
//! so that neither zero nor saturated values propagate as certainties.

use std::collections::{BTreeMap, HashMap};

use crate::config::ConfidenceConfig;

/// Floor applied to every final score
pub const MIN_SCORE: f32 = 0.1;

/// Ceiling applied to every final score
pub const MAX_SCORE: f32 = 1.0;

/// Named factor values contributing to a score
pub type Factors = BTreeMap<String, f32>;

/// Map a raw value into [0, 1]; NaN counts as no evidence
pub fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Score a base confidence against named factors
pub fn score(base_confidence: f32, factors: &Factors) -> f32 {
    score_values(base_confidence, factors.values().copied())
}

/// Score a base confidence against an arbitrary sequence of factor values
pub fn score_values(base_confidence: f32, factors: impl IntoIterator<Item = f32>) -> f32 {
    let (sum, count) = factors
        .into_iter()
        .fold((unit(base_confidence), 1u32), |(sum, count), value| {
            (sum + unit(value), count + 1)
        });

    (sum / count as f32).clamp(MIN_SCORE, MAX_SCORE)
}

/// Extraction confidence from base evidence, type prior and context quality
pub fn entity_confidence(base_confidence: f32, type_prior: f32, context_confidence: f32) -> f32 {
    score_values(base_confidence, [type_prior, context_confidence])
}

/// Length evidence: longer surface forms are more reliable, saturating at 20 chars
pub fn length_factor(surface_form: &str) -> f32 {
    (surface_form.trim().chars().count() as f32 / 20.0).min(1.0)
}

/// Incremental mean after adding one observation to `count` prior ones
pub fn running_mean(current: f32, count: u32, observation: f32) -> f32 {
    if count == 0 {
        return unit(observation);
    }
    (current * count as f32 + unit(observation)) / (count + 1) as f32
}

/// Entity-type prior lookup table
///
/// Lookups try the exact label first, then the upper-cased label, then fall
/// back to the default prior.
#[derive(Debug, Clone, PartialEq)]
pub struct TypePriors {
    priors: HashMap<String, f32>,
    default_prior: f32,
}

impl TypePriors {
    /// Create an empty table with the given default
    pub fn new(default_prior: f32) -> Self {
        Self {
            priors: HashMap::new(),
            default_prior: unit(default_prior),
        }
    }

    /// Add or replace a prior
    pub fn with_prior(mut self, label: impl Into<String>, prior: f32) -> Self {
        self.priors.insert(label.into(), unit(prior));
        self
    }

    /// Overlay another table's entries onto this one
    pub fn overridden_by(mut self, overrides: &HashMap<String, f32>) -> Self {
        for (label, prior) in overrides {
            self.priors.insert(label.clone(), unit(*prior));
        }
        self
    }

    /// Prior for a label
    pub fn prior(&self, label: &str) -> f32 {
        self.priors
            .get(label)
            .or_else(|| self.priors.get(&label.to_uppercase()))
            .copied()
            .unwrap_or(self.default_prior)
    }

    /// Default prior for unknown labels
    pub fn default_prior(&self) -> f32 {
        self.default_prior
    }
}

impl Default for TypePriors {
    fn default() -> Self {
        Self::from(&ConfidenceConfig::default())
    }
}

impl From<&ConfidenceConfig> for TypePriors {
    fn from(config: &ConfidenceConfig) -> Self {
        Self::new(config.default_prior).overridden_by(&config.type_priors)
    }
}
