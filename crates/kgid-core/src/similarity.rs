//! Similarity policies for non-exact entity matching
//!
//! Exact matching on normalized forms always runs first inside the identity
//! service. A policy is only consulted when no exact match exists, and must
//! return a score strictly below 1.0 for non-identical inputs.

use std::fmt;

use crate::config::ResolutionConfig;

/// Pluggable scoring of a normalized mention against a normalized entity form
pub trait SimilarityPolicy: Send + Sync + fmt::Debug {
    /// Policy name for logging
    fn name(&self) -> &str;

    /// Similarity in (0, 1) when the pair is close enough to match
    fn similarity(&self, mention: &str, known: &str) -> Option<f32>;
}

/// Exact matching only; never produces a fuzzy match
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl SimilarityPolicy for ExactMatch {
    fn name(&self) -> &str {
        "exact"
    }

    fn similarity(&self, _mention: &str, _known: &str) -> Option<f32> {
        None
    }
}

/// Edit distance and token containment matching
#[derive(Debug, Clone, Copy)]
pub struct FuzzyMatch {
    threshold: f32,
}

impl FuzzyMatch {
    /// Create a fuzzy policy with a minimum similarity
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Minimum similarity for a match
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for FuzzyMatch {
    fn default() -> Self {
        Self::new(ResolutionConfig::default().fuzzy_threshold)
    }
}

impl SimilarityPolicy for FuzzyMatch {
    fn name(&self) -> &str {
        "fuzzy"
    }

    fn similarity(&self, mention: &str, known: &str) -> Option<f32> {
        if mention.is_empty() || known.is_empty() || mention == known {
            return None;
        }

        let score = edit_similarity(mention, known).max(token_containment(mention, known));
        // Only exact matches may report 1.0
        let score = score.min(0.999);

        (score >= self.threshold).then_some(score)
    }
}

/// Build the policy named by the resolution config
pub fn policy_from_config(config: &ResolutionConfig) -> Box<dyn SimilarityPolicy> {
    if config.fuzzy_matching {
        Box::new(FuzzyMatch::new(config.fuzzy_threshold))
    } else {
        Box::new(ExactMatch)
    }
}

/// 1 - levenshtein / max_len, over characters
pub fn edit_similarity(a: &str, b: &str) -> f32 {
    strsim::normalized_levenshtein(a, b) as f32
}

/// Share of tokens covered when one side's tokens are a contiguous run in the other
///
/// "acme university" inside "the acme university" scores 2/3.
pub fn token_containment(a: &str, b: &str) -> f32 {
    let a_tokens: Vec<&str> = a.split_whitespace().collect();
    let b_tokens: Vec<&str> = b.split_whitespace().collect();
    let (short, long) = if a_tokens.len() <= b_tokens.len() {
        (a_tokens, b_tokens)
    } else {
        (b_tokens, a_tokens)
    };

    if short.is_empty() {
        return 0.0;
    }

    let contained = long.windows(short.len()).any(|window| window == short.as_slice());
    if contained {
        short.len() as f32 / long.len() as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_similarity() {
        assert!((edit_similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-6);
        assert_eq!(edit_similarity("", "abc"), 0.0);
        assert_eq!(edit_similarity("same", "same"), 1.0);
        assert_eq!(edit_similarity("", ""), 1.0);
        // Counted in characters, not bytes
        assert!((edit_similarity("zürich", "zurich") - 5.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_exact_policy_never_matches() {
        assert_eq!(ExactMatch.similarity("acme", "acme corp"), None);
    }

    #[test]
    fn test_fuzzy_typo_match() {
        let policy = FuzzyMatch::new(0.85);
        let score = policy
            .similarity("acme universty", "acme university")
            .expect("one deletion should match");
        assert!(score > 0.85 && score < 1.0);
    }

    #[test]
    fn test_fuzzy_identical_is_left_to_exact() {
        assert_eq!(FuzzyMatch::new(0.5).similarity("acme", "acme"), None);
    }

    #[test]
    fn test_token_containment() {
        let score = token_containment("acme university", "the acme university");
        assert!((score - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(token_containment("acme college", "the acme university"), 0.0);
    }

    #[test]
    fn test_policy_from_config() {
        let exact = policy_from_config(&ResolutionConfig::default());
        assert_eq!(exact.name(), "exact");

        let fuzzy = policy_from_config(&ResolutionConfig {
            fuzzy_matching: true,
            fuzzy_threshold: 0.6,
        });
        assert_eq!(fuzzy.name(), "fuzzy");
    }
}
