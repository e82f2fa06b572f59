//! Ontology-guided extraction
//!
//! Builds a prompt from a domain ontology, sends it through a caller-supplied
//! [`CompletionBackend`] and parses the JSON answer into candidates and
//! relations. Only ontology types survive parsing.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{find_char_span, Candidate, ExtractionStrategy, RawExtraction, RawRelation};
use kgid_core::{KgidError, Result};

/// Confidence assumed when the completion omits one
const DEFAULT_CONFIDENCE: f32 = 0.8;

/// Text completion service (LLM or otherwise)
///
/// Timeouts and retries belong to the implementation.
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Named type with a description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyType {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl OntologyType {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Domain ontology constraining what the strategy may extract
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainOntology {
    pub domain_name: String,
    #[serde(default)]
    pub domain_description: String,
    pub entity_types: Vec<OntologyType>,
    #[serde(default)]
    pub relationship_types: Vec<OntologyType>,
    #[serde(default)]
    pub extraction_guidelines: Vec<String>,
}

impl DomainOntology {
    /// Description of an entity type, if the ontology defines it
    pub fn entity_description(&self, entity_type: &str) -> Option<&str> {
        self.entity_types
            .iter()
            .find(|t| t.name == entity_type)
            .map(|t| t.description.as_str())
    }
}

/// Why a completion could not be used
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("completion is not valid extraction JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CompletionPayload {
    #[serde(default)]
    entities: Vec<CompletionEntity>,
    #[serde(default)]
    relationships: Vec<CompletionRelation>,
}

#[derive(Debug, Deserialize)]
struct CompletionEntity {
    text: String,
    #[serde(rename = "type")]
    entity_type: String,
    confidence: Option<f32>,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct CompletionRelation {
    source: String,
    relation: String,
    target: String,
    confidence: Option<f32>,
    #[serde(default)]
    context: String,
}

/// Extraction strategy driven by a domain ontology and a completion backend
pub struct OntologyStrategy {
    ontology: DomainOntology,
    backend: Box<dyn CompletionBackend>,
    tool_id: String,
}

impl OntologyStrategy {
    pub fn new(ontology: DomainOntology, backend: Box<dyn CompletionBackend>) -> Self {
        let tool_id = format!("ontology:{}", backend.name());
        Self {
            ontology,
            backend,
            tool_id,
        }
    }

    pub fn ontology(&self) -> &DomainOntology {
        &self.ontology
    }

    /// Build the extraction prompt
    pub fn build_prompt(&self, text: &str) -> String {
        let describe = |types: &[OntologyType]| {
            types
                .iter()
                .map(|t| format!("- {}: {}", t.name, t.description))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let guidelines = self
            .ontology
            .extraction_guidelines
            .iter()
            .map(|g| format!("- {g}"))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Extract entities and relationships from the text using the domain ontology.\n\n\
             DOMAIN: {}\n{}\n\n\
             ENTITY TYPES:\n{}\n\n\
             RELATIONSHIP TYPES:\n{}\n\n\
             GUIDELINES:\n{}\n\n\
             TEXT:\n{}\n\n\
             Answer with JSON only:\n\
             {{\"entities\": [{{\"text\": \"exact text\", \"type\": \"TYPE\", \"confidence\": 0.9, \"context\": \"surrounding text\"}}],\n \
             \"relationships\": [{{\"source\": \"entity text\", \"relation\": \"TYPE\", \"target\": \"entity text\", \"confidence\": 0.9, \"context\": \"text\"}}]}}\n\
             Only use the types listed above and exact text from the source.",
            self.ontology.domain_name,
            self.ontology.domain_description,
            describe(&self.ontology.entity_types),
            describe(&self.ontology.relationship_types),
            guidelines,
            text
        )
    }

    /// Parse a completion into candidates and relations
    ///
    /// Entities of types outside the ontology are discarded, as are relations
    /// whose endpoints were not extracted.
    pub fn parse_response(
        &self,
        response: &str,
        original_text: &str,
    ) -> std::result::Result<RawExtraction, ResponseError> {
        let payload: CompletionPayload = serde_json::from_str(strip_code_fence(response))?;

        let allowed: HashSet<&str> = self
            .ontology
            .entity_types
            .iter()
            .map(|t| t.name.as_str())
            .collect();

        let mut candidates = Vec::new();
        for entity in payload.entities {
            let text = entity.text.trim();
            if text.is_empty() || !allowed.contains(entity.entity_type.as_str()) {
                debug!(text, entity_type = %entity.entity_type, "Discarding off-ontology entity");
                continue;
            }
            let mut candidate = Candidate::new(
                text,
                entity.entity_type.as_str(),
                entity.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            )
            .with_context(entity.context);
            if entity.confidence.is_none() {
                candidate = candidate.with_synthetic_confidence();
            }
            candidate.span = find_char_span(original_text, text);
            candidates.push(candidate);
        }

        let known: HashSet<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let relations = payload
            .relationships
            .into_iter()
            .filter(|r| known.contains(r.source.trim()) && known.contains(r.target.trim()))
            .map(|r| RawRelation {
                source: r.source.trim().to_string(),
                relation: r.relation,
                target: r.target.trim().to_string(),
                confidence: r.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                context: r.context,
                confidence_synthetic: r.confidence.is_none(),
            })
            .collect();

        Ok(RawExtraction {
            candidates,
            relations,
        })
    }
}

impl ExtractionStrategy for OntologyStrategy {
    fn name(&self) -> &str {
        &self.tool_id
    }

    fn extract(&self, text: &str) -> Result<RawExtraction> {
        let prompt = self.build_prompt(text);
        let response = self.backend.complete(&prompt).map_err(|e| {
            warn!(backend = self.backend.name(), error = %e, "Completion failed");
            KgidError::ExtractionFailure(format!("{} completion failed: {e}", self.backend.name()))
        })?;

        self.parse_response(&response, text)
            .map_err(|e| KgidError::ExtractionFailure(e.to_string()))
    }
}

/// Remove a surrounding Markdown code fence, if any
fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ============================================================================
// Tests
// ============================================================================
