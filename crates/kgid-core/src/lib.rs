//! kgid Core - Identity resolution, provenance and confidence
//!
//! This crate owns the state that every extraction strategy feeds into:
//! - Mention / entity / relationship registries with deduplicating resolution
//! - The provenance ledger (one operation record per unit of work)
//! - Confidence scoring and quality tier assessment
//! - Configuration and the export snapshot consumed by graph stores
//!
//! Strategies live outside this crate and talk to it only through the
//! operations exposed on [`KnowledgeContext`] and its services.

pub mod confidence;
pub mod config;
pub mod context;
pub mod export;
pub mod identity;
pub mod provenance;
pub mod quality;
pub mod similarity;

pub use confidence::{Factors, TypePriors};
pub use config::{
    ConfigError, ConfidenceConfig, ExtractionConfig, KgidConfig, LoggingConfig, QualityThresholds,
    ResolutionConfig,
};
pub use context::KnowledgeContext;
pub use export::GraphExport;
pub use identity::{
    EntityResolution, IdentityService, IdentityStats, LinkOutcome, MentionCreated,
    ResolutionAction,
};
pub use provenance::{
    LedgerStatistics, LineageDirection, OperationCompletion, OperationRecord, OperationStatus,
    ProvenanceLedger,
};
pub use quality::{
    ConfidenceTrend, QualityAssessment, QualityAssessor, QualityStatistics, QualityTier,
    TrendDirection,
};
pub use similarity::{ExactMatch, FuzzyMatch, SimilarityPolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for kgid operations
#[derive(Error, Debug)]
pub enum KgidError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Mention {mention_id} is already linked to entity {entity_id}")]
    AlreadyLinked { mention_id: Uuid, entity_id: Uuid },

    #[error("Operation {0} is already completed")]
    AlreadyCompleted(Uuid),

    #[error("Extraction failure: {0}")]
    ExtractionFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KgidError {
    /// Stable discriminator callers can branch on
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyLinked { .. } => ErrorKind::AlreadyLinked,
            Self::AlreadyCompleted(_) => ErrorKind::AlreadyCompleted,
            Self::ExtractionFailure(_) => ErrorKind::ExtractionFailure,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<ConfigError> for KgidError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Error category exposed across the strategy boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyLinked,
    AlreadyCompleted,
    ExtractionFailure,
    Config,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyLinked => write!(f, "already_linked"),
            Self::AlreadyCompleted => write!(f, "already_completed"),
            Self::ExtractionFailure => write!(f, "extraction_failure"),
            Self::Config => write!(f, "config"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

pub type Result<T> = std::result::Result<T, KgidError>;

// ============================================================================
// Knowledge Graph Artifacts
// ============================================================================

/// A single occurrence of a surface string in a source unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Unique identifier
    pub id: Uuid,

    /// Exact text as it appeared
    pub surface_form: String,

    /// Trimmed, whitespace-collapsed, casefolded form used for matching
    pub normalized_form: String,

    /// Start character offset in the source unit
    pub start_pos: usize,

    /// End character offset (exclusive)
    pub end_pos: usize,

    /// Opaque reference to the originating text unit
    pub source_ref: String,

    /// Candidate type label
    pub entity_type: String,

    /// Extraction confidence (0.0 - 1.0)
    pub confidence: f32,

    /// Entity this mention resolved to, set once
    pub entity_id: Option<Uuid>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Mention {
    /// Whether resolution has completed for this mention
    pub fn is_linked(&self) -> bool {
        self.entity_id.is_some()
    }

    /// Character span length
    pub fn span_len(&self) -> usize {
        self.end_pos - self.start_pos
    }
}

/// A canonical referent that one or more mentions resolve to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier, stable for the lifetime of the system
    pub id: Uuid,

    /// Representative surface form
    pub canonical_name: String,

    /// Normalized form of the canonical name
    pub normalized_name: String,

    /// Every normalized form that has resolved to this entity
    pub aliases: BTreeSet<String>,

    /// Type label
    pub entity_type: String,

    /// Aggregate confidence over linked mentions
    pub confidence: f32,

    /// Number of mentions linked so far
    pub mention_count: u32,

    /// Open-ended attribute bag (embedding, domain tag, ...)
    pub attributes: HashMap<String, serde_json::Value>,

    /// Creation order within the registry, used for deterministic tie-breaks
    pub sequence: u64,

    /// When this entity was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Fold one more mention confidence into the running mean
    pub fn absorb_mention(&mut self, confidence: f32) {
        self.confidence =
            confidence::running_mean(self.confidence, self.mention_count, confidence);
        self.mention_count += 1;
        self.updated_at = Utc::now();
    }

    /// Merge attribute evidence, newer values win
    pub fn merge_attributes(&mut self, attributes: HashMap<String, serde_json::Value>) {
        if attributes.is_empty() {
            return;
        }
        self.attributes.extend(attributes);
        self.updated_at = Utc::now();
    }

    /// Whether a normalized form is known for this entity
    pub fn answers_to(&self, normalized: &str) -> bool {
        self.normalized_name == normalized || self.aliases.contains(normalized)
    }
}

/// A typed, directed edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier
    pub id: Uuid,

    /// Source entity ID
    pub source_id: Uuid,

    /// Target entity ID
    pub target_id: Uuid,

    /// Relationship type (predicate)
    pub relationship_type: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Attributes, including the extraction source reference
    pub attributes: HashMap<String, serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Whether this edge points back at its own source
    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}

/// Storage-style reference for a mention, used as provenance output
pub fn mention_ref(id: Uuid) -> String {
    format!("mention://{id}")
}

/// Storage-style reference for an entity
pub fn entity_ref(id: Uuid) -> String {
    format!("entity://{id}")
}

/// Storage-style reference for a relationship
pub fn relationship_ref(id: Uuid) -> String {
    format!("relationship://{id}")
}

// ============================================================================
// Tests
// ============================================================================
