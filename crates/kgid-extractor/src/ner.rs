//! Named Entity Recognition (NER) module
//!
//! Provides:
//! - Rule-based: regex patterns + dictionary matching over English text
//! - Hybrid: several strategies merged into one candidate set, with an
//!   optional relation extractor run over the merged candidates

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{char_span, Candidate, ExtractionStrategy, RawExtraction, RelationExtractor};
use kgid_core::{identity::normalize_surface_form, Result};

// ============================================================================
// Entity Labels
// ============================================================================

/// Labels produced by the rule-based tagger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLabel {
    Person,
    Org,
    Gpe,
    Facility,
    Product,
    Event,
    Law,
    Date,
    Time,
    Money,
    Percent,
}

impl EntityLabel {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Org => "ORG",
            Self::Gpe => "GPE",
            Self::Facility => "FACILITY",
            Self::Product => "PRODUCT",
            Self::Event => "EVENT",
            Self::Law => "LAW",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Money => "MONEY",
            Self::Percent => "PERCENT",
        }
    }
}

impl std::fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Rule-based NER
// ============================================================================

const PERSON_NAME: &str = r"[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*";
const MONTHS: &str =
    "January|February|March|April|May|June|July|August|September|October|November|December";

/// Dictionary match confidence for a canonical term
const TERM_CONFIDENCE: f32 = 0.95;

/// Dictionary match confidence for an alias
const ALIAS_CONFIDENCE: f32 = 0.9;

struct PatternRule {
    regex: Regex,
    label: EntityLabel,
    confidence: f32,
}

struct DictionaryRule {
    regex: Regex,
    term: String,
    label: EntityLabel,
    confidence: f32,
}

/// Rule-based NER using regex patterns and dictionaries
pub struct RuleBasedNer {
    patterns: Vec<PatternRule>,
    dictionary: Vec<DictionaryRule>,
}

impl RuleBasedNer {
    /// Create a tagger with the default English rules
    pub fn new() -> Self {
        let mut ner = Self::empty();
        ner.init_patterns();
        ner.init_dictionary();
        ner
    }

    /// Create a tagger with no rules
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            dictionary: Vec::new(),
        }
    }

    fn init_patterns(&mut self) {
        // Titled persons
        self.add_pattern(
            &format!(r"\b(?:Dr|Prof|Mr|Mrs|Ms)\.\s+{PERSON_NAME}"),
            EntityLabel::Person,
            0.85,
        );
        self.add_pattern(
            &format!(r"\bProfessor\s+{PERSON_NAME}"),
            EntityLabel::Person,
            0.85,
        );

        // Organizations with a trailing designator
        self.add_pattern(
            r"\b(?:[A-Z][a-z]+\s+)+(?:University|Institute|College|Laboratory|Labs|Foundation|Corporation|Company|Inc\.|Corp\.|Ltd\.)",
            EntityLabel::Org,
            0.85,
        );
        self.add_pattern(
            r"\bUniversity\s+of\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*",
            EntityLabel::Org,
            0.85,
        );

        // Dates and times
        self.add_pattern(r"\b\d{4}-\d{2}-\d{2}\b", EntityLabel::Date, 0.95);
        self.add_pattern(
            &format!(r"\b(?:{MONTHS})\s+\d{{1,2}},\s+\d{{4}}\b"),
            EntityLabel::Date,
            0.9,
        );
        self.add_pattern(r"\b\d{1,2}:\d{2}\s*(?:[ap]\.?m\.?)?", EntityLabel::Time, 0.85);

        // Amounts
        self.add_pattern(
            r"\$\d{1,3}(?:,\d{3})*(?:\.\d+)?(?:\s+(?:million|billion))?",
            EntityLabel::Money,
            0.95,
        );
        self.add_pattern(r"\b\d+(?:\.\d+)?%", EntityLabel::Percent, 0.9);
    }

    fn init_dictionary(&mut self) {
        self.add_term(
            "United States",
            EntityLabel::Gpe,
            &["USA", "United States of America"],
        );
        self.add_term("United Kingdom", EntityLabel::Gpe, &["UK", "Britain"]);
        self.add_term("European Union", EntityLabel::Gpe, &["EU"]);
        self.add_term("New York", EntityLabel::Gpe, &["NYC", "New York City"]);
        self.add_term("London", EntityLabel::Gpe, &[]);
        self.add_term("Paris", EntityLabel::Gpe, &[]);
    }

    /// Add a regex pattern; invalid patterns are skipped with a warning
    pub fn add_pattern(&mut self, pattern: &str, label: EntityLabel, confidence: f32) {
        match Regex::new(pattern) {
            Ok(regex) => self.patterns.push(PatternRule {
                regex,
                label,
                confidence,
            }),
            Err(e) => warn!(pattern, error = %e, "Skipping invalid NER pattern"),
        }
    }

    /// Add a dictionary term with aliases, matched case-insensitively on word boundaries
    pub fn add_term(&mut self, term: &str, label: EntityLabel, aliases: &[&str]) {
        let forms = std::iter::once((term, TERM_CONFIDENCE))
            .chain(aliases.iter().map(|alias| (*alias, ALIAS_CONFIDENCE)));

        for (form, confidence) in forms {
            let boundary = |c: Option<char>| {
                if c.is_some_and(char::is_alphanumeric) {
                    r"\b"
                } else {
                    ""
                }
            };
            let pattern = format!(
                "(?i){}{}{}",
                boundary(form.chars().next()),
                regex::escape(form),
                boundary(form.chars().last())
            );
            match Regex::new(&pattern) {
                Ok(regex) => self.dictionary.push(DictionaryRule {
                    regex,
                    term: term.to_string(),
                    label,
                    confidence,
                }),
                Err(e) => warn!(term = form, error = %e, "Skipping invalid dictionary term"),
            }
        }
    }

    fn extract_by_patterns(&self, text: &str) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for rule in &self.patterns {
            for mat in rule.regex.find_iter(text) {
                let surface = mat.as_str().trim_end();
                let (start, end) = char_span(text, mat.start(), mat.start() + surface.len());
                candidates.push(
                    Candidate::new(surface, rule.label.as_str(), rule.confidence)
                        .with_span(start, end),
                );
            }
        }
        candidates
    }

    fn extract_by_dictionary(&self, text: &str) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for rule in &self.dictionary {
            for mat in rule.regex.find_iter(text) {
                let (start, end) = char_span(text, mat.start(), mat.end());
                candidates.push(
                    Candidate::new(mat.as_str(), rule.label.as_str(), rule.confidence)
                        .with_span(start, end)
                        .with_context(format!("dictionary term: {}", rule.term)),
                );
            }
        }
        candidates
    }

    /// Remove overlapping candidates, keeping the longest span then the highest confidence
    fn deduplicate(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let span = |c: &Candidate| c.span.unwrap_or_default();
        let len = |c: &Candidate| span(c).1 - span(c).0;
        candidates.sort_by(|a, b| {
            len(b)
                .cmp(&len(a))
                .then(b.confidence.total_cmp(&a.confidence))
                .then(span(a).0.cmp(&span(b).0))
        });

        let mut kept: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            let (start, end) = span(&candidate);
            let overlaps = kept.iter().any(|k| {
                let (k_start, k_end) = span(k);
                start < k_end && k_start < end
            });
            if !overlaps {
                kept.push(candidate);
            }
        }

        kept.sort_by_key(|c| span(c).0);
        kept
    }
}

impl Default for RuleBasedNer {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionStrategy for RuleBasedNer {
    fn name(&self) -> &str {
        "rule_based_ner"
    }

    fn extract(&self, text: &str) -> Result<RawExtraction> {
        let mut candidates = self.extract_by_patterns(text);
        candidates.extend(self.extract_by_dictionary(text));
        let candidates = self.deduplicate(candidates);

        debug!(candidates = candidates.len(), "Rule-based extraction complete");
        Ok(RawExtraction {
            candidates,
            relations: Vec::new(),
        })
    }
}

// ============================================================================
// Hybrid Strategy
// ============================================================================

/// Runs several strategies and merges their candidates
///
/// Candidates agreeing on normalized text and type are merged: the highest
/// confidence wins, and agreement between strategies adds `agreement_boost`.
pub struct HybridStrategy {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    relation_extractor: Option<Box<dyn RelationExtractor>>,
    agreement_boost: f32,
}

impl HybridStrategy {
    /// Create an empty hybrid strategy
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            relation_extractor: None,
            agreement_boost: 0.05,
        }
    }

    /// Add a candidate producer
    pub fn with_strategy(mut self, strategy: Box<dyn ExtractionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Run a relation extractor over the merged candidates
    pub fn with_relation_extractor(mut self, extractor: Box<dyn RelationExtractor>) -> Self {
        self.relation_extractor = Some(extractor);
        self
    }

    /// Set the confidence boost for candidates found by more than one strategy
    pub fn with_agreement_boost(mut self, boost: f32) -> Self {
        self.agreement_boost = boost.clamp(0.0, 1.0);
        self
    }

    /// Merge candidate lists from multiple sources
    pub fn merge_candidates(&self, sources: Vec<Vec<Candidate>>) -> Vec<Candidate> {
        let mut merged: HashMap<(String, String), (Candidate, usize)> = HashMap::new();
        let mut order = Vec::new();

        for candidates in sources {
            for candidate in candidates {
                let key = (
                    normalize_surface_form(&candidate.text),
                    candidate.entity_type.clone(),
                );
                match merged.get_mut(&key) {
                    Some((existing, votes)) => {
                        *votes += 1;
                        if candidate.confidence > existing.confidence {
                            let span = existing.span.or(candidate.span);
                            *existing = candidate;
                            existing.span = existing.span.or(span);
                        } else if existing.span.is_none() {
                            existing.span = candidate.span;
                        }
                    }
                    None => {
                        order.push(key.clone());
                        merged.insert(key, (candidate, 1));
                    }
                }
            }
        }

        order
            .into_iter()
            .filter_map(|key| merged.remove(&key))
            .map(|(mut candidate, votes)| {
                if votes > 1 {
                    candidate.confidence = (candidate.confidence + self.agreement_boost).min(1.0);
                }
                candidate
            })
            .collect()
    }
}

impl Default for HybridStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionStrategy for HybridStrategy {
    fn name(&self) -> &str {
        "hybrid"
    }

    fn extract(&self, text: &str) -> Result<RawExtraction> {
        let mut sources = Vec::with_capacity(self.strategies.len());
        let mut relations = Vec::new();

        for strategy in &self.strategies {
            let raw = strategy.extract(text)?;
            debug!(
                strategy = strategy.name(),
                candidates = raw.candidates.len(),
                relations = raw.relations.len(),
                "Strategy finished"
            );
            sources.push(raw.candidates);
            relations.extend(raw.relations);
        }

        let candidates = self.merge_candidates(sources);
        if let Some(extractor) = &self.relation_extractor {
            relations.extend(extractor.extract(text, &candidates)?);
        }

        Ok(RawExtraction {
            candidates,
            relations,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
