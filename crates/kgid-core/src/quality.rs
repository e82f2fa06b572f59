//! Quality assessment
//!
//! Scores objects with the confidence model, assigns a quality tier, and keeps
//! every assessment so history queries (latest, trend, filtering) can be
//! answered later.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::confidence::{self, Factors};
use crate::config::QualityThresholds;

/// Number of recent assessments considered for a trend
const TREND_WINDOW: usize = 10;

/// Slope beyond which a trend counts as moving
const TREND_SLOPE_CUTOFF: f64 = 0.01;

/// Discrete reliability bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Unreliable,
    Low,
    Medium,
    High,
}

impl QualityTier {
    /// Tier for a score under the given cut points
    pub fn from_score(score: f32, thresholds: &QualityThresholds) -> Self {
        if score >= thresholds.high {
            Self::High
        } else if score >= thresholds.medium {
            Self::Medium
        } else if score >= thresholds.low {
            Self::Low
        } else {
            Self::Unreliable
        }
    }

    /// Lowercase tier name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreliable => "unreliable",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Unique identifier
    pub id: Uuid,

    /// Reference to the assessed object (e.g. "entity://...")
    pub object_ref: String,

    /// Base confidence as supplied
    pub base_confidence: f32,

    /// Final clamped score
    pub confidence: f32,

    /// Tier derived from `confidence`
    pub tier: QualityTier,

    /// Factors that contributed to the score
    pub factors: Factors,

    /// Caller metadata
    pub metadata: HashMap<String, serde_json::Value>,

    /// Assessment timestamp
    pub assessed_at: DateTime<Utc>,
}

/// Direction of recent confidence movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

/// Confidence trend over an object's recent assessments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceTrend {
    pub direction: TrendDirection,
    /// Least-squares slope per assessment
    pub slope: f64,
    pub samples: usize,
    pub latest: Option<f32>,
}

/// Aggregate counters over all assessments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityStatistics {
    pub total_assessments: usize,
    pub assessed_objects: usize,
    pub average_confidence: f64,
    pub by_tier: BTreeMap<QualityTier, usize>,
}

#[derive(Debug, Default)]
struct AssessmentLog {
    entries: Vec<QualityAssessment>,
}

/// Confidence scorer and tier classifier with assessment history
#[derive(Debug, Default)]
pub struct QualityAssessor {
    thresholds: QualityThresholds,
    log: RwLock<AssessmentLog>,
}

impl QualityAssessor {
    /// Create an assessor with the given tier cut points
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            log: RwLock::default(),
        }
    }

    /// Tier cut points in use
    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Tier for a score
    pub fn tier_for(&self, score: f32) -> QualityTier {
        QualityTier::from_score(score, &self.thresholds)
    }

    /// Score an object and record the assessment
    ///
    /// Never fails: out-of-range inputs are clamped by the confidence model.
    pub fn assess_confidence(
        &self,
        object_ref: &str,
        base_confidence: f32,
        factors: &Factors,
        metadata: HashMap<String, serde_json::Value>,
    ) -> QualityAssessment {
        let score = confidence::score(base_confidence, factors);
        let assessment = QualityAssessment {
            id: Uuid::new_v4(),
            object_ref: object_ref.to_string(),
            base_confidence,
            confidence: score,
            tier: self.tier_for(score),
            factors: factors.clone(),
            metadata,
            assessed_at: Utc::now(),
        };

        debug!(
            object_ref,
            base_confidence,
            confidence = score,
            tier = %assessment.tier,
            factors = factors.len(),
            "Assessed confidence"
        );

        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .push(assessment.clone());
        assessment
    }

    /// Most recent assessment of an object
    pub fn latest_assessment(&self, object_ref: &str) -> Option<QualityAssessment> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .rev()
            .find(|a| a.object_ref == object_ref)
            .cloned()
    }

    /// Every assessment of an object, oldest first
    pub fn assessments_for(&self, object_ref: &str) -> Vec<QualityAssessment> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|a| a.object_ref == object_ref)
            .cloned()
            .collect()
    }

    /// Every assessment, oldest first
    pub fn assessments(&self) -> Vec<QualityAssessment> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    /// Trend of an object's last assessments
    pub fn confidence_trend(&self, object_ref: &str) -> ConfidenceTrend {
        let history = self.assessments_for(object_ref);
        let recent = &history[history.len().saturating_sub(TREND_WINDOW)..];
        let latest = recent.last().map(|a| a.confidence);

        if recent.len() < 2 {
            return ConfidenceTrend {
                direction: TrendDirection::InsufficientData,
                slope: 0.0,
                samples: recent.len(),
                latest,
            };
        }

        let values: Vec<f64> = recent.iter().map(|a| a.confidence as f64).collect();
        let slope = least_squares_slope(&values);
        let direction = if slope > TREND_SLOPE_CUTOFF {
            TrendDirection::Improving
        } else if slope < -TREND_SLOPE_CUTOFF {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };

        ConfidenceTrend {
            direction,
            slope,
            samples: values.len(),
            latest,
        }
    }

    /// References whose latest assessment reaches `min_tier` and `min_confidence`
    ///
    /// Unassessed references are excluded.
    pub fn filter_by_quality<'a, I>(
        &self,
        object_refs: I,
        min_tier: QualityTier,
        min_confidence: Option<f32>,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let min_confidence = min_confidence.unwrap_or(0.0);
        object_refs
            .into_iter()
            .filter(|r| {
                self.latest_assessment(r)
                    .is_some_and(|a| a.tier >= min_tier && a.confidence >= min_confidence)
            })
            .map(str::to_string)
            .collect()
    }

    /// Aggregate statistics over the assessment log
    pub fn statistics(&self) -> QualityStatistics {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = QualityStatistics {
            total_assessments: log.entries.len(),
            ..Default::default()
        };
        if log.entries.is_empty() {
            return stats;
        }

        let mut objects = std::collections::HashSet::new();
        let mut sum = 0.0f64;
        for assessment in &log.entries {
            objects.insert(assessment.object_ref.as_str());
            sum += assessment.confidence as f64;
            *stats.by_tier.entry(assessment.tier).or_default() += 1;
        }
        stats.assessed_objects = objects.len();
        stats.average_confidence = sum / log.entries.len() as f64;
        stats
    }

    /// Replace the assessment log with exported entries
    pub(crate) fn restore(&self, entries: Vec<QualityAssessment>) {
        self.log.write().unwrap_or_else(PoisonError::into_inner).entries = entries;
    }
}

fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
