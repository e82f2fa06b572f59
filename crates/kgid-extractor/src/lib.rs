//! kgid Extractor - Strategies and the extraction loop
//!
//! Strategies turn text into [`Candidate`] records and raw relations; the
//! [`pipeline`] feeds them through identity resolution, provenance and
//! quality assessment in `kgid-core`. Strategies never touch core state.

use kgid_core::Result;
use serde::{Deserialize, Serialize};

pub mod embedding;
pub mod logging;
pub mod ner;
pub mod ontology;
pub mod pipeline;
pub mod relation;

pub use embedding::EmbeddingProvider;
pub use logging::init_tracing;
pub use ner::{HybridStrategy, RuleBasedNer};
pub use ontology::{CompletionBackend, DomainOntology, OntologyStrategy};
pub use pipeline::{ExtractionOptions, ExtractionPipeline, ExtractionReport, ReportStatus};
pub use relation::KeywordRelationExtractor;

/// Entity candidate produced by any strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Surface text as it appears in the source
    pub text: String,
    /// Type label (e.g. "PERSON", "ORG" or an ontology type)
    pub entity_type: String,
    /// Character span in the source, when the strategy knows it
    pub span: Option<(usize, usize)>,
    /// Strategy confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Surrounding text used for disambiguation
    #[serde(default)]
    pub context: String,
    /// Confidence was defaulted by the strategy, not reported by its source
    #[serde(default)]
    pub confidence_synthetic: bool,
}

impl Candidate {
    pub fn new(text: impl Into<String>, entity_type: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            entity_type: entity_type.into(),
            span: None,
            confidence,
            context: String::new(),
            confidence_synthetic: false,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some((start, end));
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Mark the confidence as a default filled in by the strategy
    pub fn with_synthetic_confidence(mut self) -> Self {
        self.confidence_synthetic = true;
        self
    }
}

/// Relation between two candidates, referenced by surface text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelation {
    pub source: String,
    pub relation: String,
    pub target: String,
    pub confidence: f32,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub confidence_synthetic: bool,
}

/// Everything one strategy run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    pub candidates: Vec<Candidate>,
    pub relations: Vec<RawRelation>,
}

/// Trait for candidate producers
pub trait ExtractionStrategy: Send + Sync {
    /// Tool identifier recorded in provenance
    fn name(&self) -> &str;

    fn extract(&self, text: &str) -> Result<RawExtraction>;
}

/// Trait for relation extractors working over already found candidates
pub trait RelationExtractor: Send + Sync {
    fn extract(&self, text: &str, candidates: &[Candidate]) -> Result<Vec<RawRelation>>;
}

/// Convert a byte range of `text` into a character range
pub(crate) fn char_span(text: &str, byte_start: usize, byte_end: usize) -> (usize, usize) {
    let start = text[..byte_start].chars().count();
    let len = text[byte_start..byte_end].chars().count();
    (start, start + len)
}

/// Locate `needle` in `text` and return its character range
pub(crate) fn find_char_span(text: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }
    text.find(needle)
        .map(|start| char_span(text, start, start + needle.len()))
}
