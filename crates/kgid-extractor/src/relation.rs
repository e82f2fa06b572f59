//! Relation Extraction (RE) module
//!
//! Finds directed relations between candidates using keyword phrases that
//! appear between a subject and a later object within a character window.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Candidate, RawRelation, RelationExtractor};
use kgid_core::{identity::normalize_surface_form, Result};

/// Relation types recognized by the keyword extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationType {
    WorksAt,        // PERSON -> ORG
    AffiliatedWith, // PERSON -> ORG
    Founded,        // PERSON -> ORG
    FoundedBy,      // ORG -> PERSON
    LocatedIn,      // ORG -> GPE
    PartOf,         // ORG -> ORG
    BornIn,         // PERSON -> GPE
    RelatedTo,
}

impl RelationType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorksAt => "worksAt",
            Self::AffiliatedWith => "affiliatedWith",
            Self::Founded => "founded",
            Self::FoundedBy => "foundedBy",
            Self::LocatedIn => "locatedIn",
            Self::PartOf => "partOf",
            Self::BornIn => "bornIn",
            Self::RelatedTo => "relatedTo",
        }
    }

    /// Parse a relation name, ignoring case and separators
    pub fn parse(s: &str) -> Option<Self> {
        let key: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "worksat" => Some(Self::WorksAt),
            "affiliatedwith" => Some(Self::AffiliatedWith),
            "founded" => Some(Self::Founded),
            "foundedby" => Some(Self::FoundedBy),
            "locatedin" => Some(Self::LocatedIn),
            "partof" => Some(Self::PartOf),
            "bornin" => Some(Self::BornIn),
            "relatedto" => Some(Self::RelatedTo),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pattern for extracting relations
#[derive(Debug, Clone)]
pub struct RelationPattern {
    /// Subject entity type
    pub subject_type: String,
    /// Object entity type
    pub object_type: String,
    pub relation: RelationType,
    /// Phrases that must appear between subject and object
    pub keywords: Vec<String>,
    /// Maximum gap between subject end and object start (in characters)
    pub max_distance: usize,
    pub confidence: f32,
}

/// Keyword-driven relation extractor
pub struct KeywordRelationExtractor {
    patterns: Vec<RelationPattern>,
}

impl KeywordRelationExtractor {
    /// Create an extractor with the default English patterns
    pub fn new() -> Self {
        let mut re = Self {
            patterns: Vec::new(),
        };
        re.init_patterns();
        re
    }

    /// Create an extractor with no patterns
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    fn init_patterns(&mut self) {
        self.add_pattern(
            "PERSON",
            "ORG",
            RelationType::WorksAt,
            &["works at", "works for", "employed by", "professor at", "researcher at", "joined"],
            60,
            0.8,
        );
        self.add_pattern(
            "PERSON",
            "ORG",
            RelationType::AffiliatedWith,
            &["affiliated with", "member of", "fellow of"],
            60,
            0.75,
        );
        self.add_pattern(
            "PERSON",
            "ORG",
            RelationType::Founded,
            &["founded", "co-founded"],
            40,
            0.8,
        );
        self.add_pattern("ORG", "PERSON", RelationType::FoundedBy, &["founded by"], 40, 0.8);
        self.add_pattern(
            "ORG",
            "GPE",
            RelationType::LocatedIn,
            &["in", "based in", "located in", "headquartered in"],
            30,
            0.7,
        );
        self.add_pattern(
            "ORG",
            "ORG",
            RelationType::PartOf,
            &["part of", "division of", "subsidiary of"],
            40,
            0.75,
        );
        self.add_pattern("PERSON", "GPE", RelationType::BornIn, &["born in", "native of"], 40, 0.8);
    }

    /// Add a relation pattern
    pub fn add_pattern(
        &mut self,
        subject_type: &str,
        object_type: &str,
        relation: RelationType,
        keywords: &[&str],
        max_distance: usize,
        confidence: f32,
    ) {
        self.patterns.push(RelationPattern {
            subject_type: subject_type.to_string(),
            object_type: object_type.to_string(),
            relation,
            keywords: keywords.iter().map(|k| normalize_surface_form(k)).collect(),
            max_distance,
            confidence,
        });
    }

    /// Whether any keyword occurs as whole words in `between`
    fn contains_keywords(between: &str, keywords: &[String]) -> bool {
        let stripped = between.replace(|c: char| c.is_ascii_punctuation() && c != '-', " ");
        let padded = format!(" {} ", normalize_surface_form(&stripped));
        keywords.iter().any(|k| padded.contains(&format!(" {k} ")))
    }

    fn find_pattern_relations(&self, text: &str, candidates: &[Candidate]) -> Vec<RawRelation> {
        let chars: Vec<char> = text.chars().collect();
        let mut relations = Vec::new();

        for pattern in &self.patterns {
            let subjects = candidates
                .iter()
                .filter(|c| c.entity_type == pattern.subject_type);

            for subject in subjects {
                let Some((_, subject_end)) = subject.span else {
                    continue;
                };

                let objects = candidates
                    .iter()
                    .filter(|c| c.entity_type == pattern.object_type);

                for object in objects {
                    let Some((object_start, _)) = object.span else {
                        continue;
                    };
                    if object_start < subject_end
                        || object_start - subject_end > pattern.max_distance
                        || object_start > chars.len()
                    {
                        continue;
                    }

                    let between: String = chars[subject_end..object_start].iter().collect();
                    if Self::contains_keywords(&between, &pattern.keywords) {
                        relations.push(RawRelation {
                            source: subject.text.clone(),
                            relation: pattern.relation.to_string(),
                            target: object.text.clone(),
                            confidence: pattern.confidence,
                            context: between.trim().to_string(),
                            confidence_synthetic: false,
                        });
                    }
                }
            }
        }

        debug!(relations = relations.len(), "Keyword relation extraction complete");
        relations
    }
}

impl Default for KeywordRelationExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationExtractor for KeywordRelationExtractor {
    fn extract(&self, text: &str, candidates: &[Candidate]) -> Result<Vec<RawRelation>> {
        Ok(self.find_pattern_relations(text, candidates))
    }
}

// ============================================================================
// Tests
// ============================================================================
