//! kgid Configuration Management
//!
//! Handles configuration from environment variables and TOML files with
//! defaults matching the behaviour of the statistical tagger strategy.
//! Every value here can also be overridden per service instance or per call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KgidConfig {
    /// Confidence model configuration
    pub confidence: ConfidenceConfig,

    /// Quality tier cut points
    pub quality: QualityThresholds,

    /// Candidate filtering for the extraction loop
    pub extraction: ExtractionConfig,

    /// Entity resolution policy
    pub resolution: ResolutionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl KgidConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(threshold) = env_value::<f32>("KGID_CONFIDENCE_THRESHOLD")? {
            config.extraction.confidence_threshold = threshold;
        }
        if let Some(length) = env_value::<usize>("KGID_MIN_SURFACE_LENGTH")? {
            config.extraction.min_surface_length = length;
        }
        if let Ok(tool_id) = std::env::var("KGID_TOOL_ID") {
            config.extraction.tool_id = tool_id;
        }

        if let Some(prior) = env_value::<f32>("KGID_DEFAULT_PRIOR")? {
            config.confidence.default_prior = prior;
        }
        if let Ok(priors) = std::env::var("KGID_TYPE_PRIORS") {
            config.confidence.type_priors.extend(parse_priors(&priors)?);
        }

        if let Some(high) = env_value::<f32>("KGID_QUALITY_HIGH")? {
            config.quality.high = high;
        }
        if let Some(medium) = env_value::<f32>("KGID_QUALITY_MEDIUM")? {
            config.quality.medium = medium;
        }
        if let Some(low) = env_value::<f32>("KGID_QUALITY_LOW")? {
            config.quality.low = low;
        }

        if let Some(fuzzy) = env_value::<bool>("KGID_FUZZY_MATCHING")? {
            config.resolution.fuzzy_matching = fuzzy;
        }
        if let Some(threshold) = env_value::<f32>("KGID_FUZZY_THRESHOLD")? {
            config.resolution.fuzzy_threshold = threshold;
        }

        if let Ok(level) = std::env::var("KGID_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = env_value::<bool>("KGID_LOG_JSON")? {
            config.logging.json_format = json;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let defaults = Self::default();

        // Only override if env values differ from defaults
        if env_config.extraction.confidence_threshold != defaults.extraction.confidence_threshold {
            self.extraction.confidence_threshold = env_config.extraction.confidence_threshold;
        }
        if env_config.extraction.min_surface_length != defaults.extraction.min_surface_length {
            self.extraction.min_surface_length = env_config.extraction.min_surface_length;
        }
        if env_config.extraction.tool_id != defaults.extraction.tool_id {
            self.extraction.tool_id = env_config.extraction.tool_id;
        }
        if env_config.confidence.default_prior != defaults.confidence.default_prior {
            self.confidence.default_prior = env_config.confidence.default_prior;
        }
        for (label, prior) in env_config.confidence.type_priors {
            if defaults.confidence.type_priors.get(&label) != Some(&prior) {
                self.confidence.type_priors.insert(label, prior);
            }
        }
        if env_config.quality != defaults.quality {
            self.quality = env_config.quality;
        }
        if env_config.resolution.fuzzy_matching != defaults.resolution.fuzzy_matching {
            self.resolution.fuzzy_matching = env_config.resolution.fuzzy_matching;
        }
        if env_config.resolution.fuzzy_threshold != defaults.resolution.fuzzy_threshold {
            self.resolution.fuzzy_threshold = env_config.resolution.fuzzy_threshold;
        }
        if env_config.logging.level != defaults.logging.level {
            self.logging.level = env_config.logging.level;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check value ranges and threshold ordering
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("extraction.confidence_threshold", self.extraction.confidence_threshold)?;
        check_unit("confidence.default_prior", self.confidence.default_prior)?;
        for (label, prior) in &self.confidence.type_priors {
            check_unit(&format!("confidence.type_priors.{label}"), *prior)?;
        }
        check_unit("resolution.fuzzy_threshold", self.resolution.fuzzy_threshold)?;
        self.quality.validate()
    }
}

/// Confidence model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Prior per entity type label
    pub type_priors: HashMap<String, f32>,

    /// Prior for labels missing from the table
    pub default_prior: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        let type_priors = [
            ("PERSON", 0.9),
            ("ORG", 0.85),
            ("GPE", 0.9),
            ("PRODUCT", 0.8),
            ("EVENT", 0.8),
            ("WORK_OF_ART", 0.75),
            ("LAW", 0.85),
            ("LANGUAGE", 0.9),
            ("FACILITY", 0.85),
            ("MONEY", 0.95),
            ("DATE", 0.9),
            ("TIME", 0.9),
        ]
        .into_iter()
        .map(|(label, prior)| (label.to_string(), prior))
        .collect();

        Self {
            type_priors,
            default_prior: 0.8,
        }
    }
}

/// Ordered cut points mapping final confidence to a quality tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum confidence for the high tier
    pub high: f32,

    /// Minimum confidence for the medium tier
    pub medium: f32,

    /// Minimum confidence for the low tier; anything below is unreliable
    pub low: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            high: 0.9,
            medium: 0.7,
            low: 0.5,
        }
    }
}

impl QualityThresholds {
    /// Cut points must lie in [0, 1] and strictly descend
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("quality.high", self.high)?;
        check_unit("quality.medium", self.medium)?;
        check_unit("quality.low", self.low)?;

        if !(self.high > self.medium && self.medium > self.low) {
            return Err(ConfigError::InvalidValue {
                key: "quality".to_string(),
                value: format!(
                    "high={} medium={} low={} (must strictly descend)",
                    self.high, self.medium, self.low
                ),
            });
        }
        Ok(())
    }
}

/// Candidate filtering defaults for the extraction loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Candidates below this confidence are dropped
    pub confidence_threshold: f32,

    /// Candidates whose trimmed text is shorter than this are dropped
    pub min_surface_length: usize,

    /// Tool identifier recorded on provenance operations
    pub tool_id: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            min_surface_length: 2,
            tool_id: "kgid-extractor".to_string(),
        }
    }
}

/// Entity resolution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Fall back to fuzzy matching when no exact match exists
    pub fuzzy_matching: bool,

    /// Minimum similarity for a fuzzy match
    pub fuzzy_threshold: f32,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            fuzzy_matching: false,
            fuzzy_threshold: 0.85,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

fn check_unit(key: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Parse `LABEL=prior` pairs separated by commas
pub fn parse_priors(raw: &str) -> Result<HashMap<String, f32>, ConfigError> {
    let mut priors = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let invalid = || ConfigError::InvalidValue {
            key: "KGID_TYPE_PRIORS".to_string(),
            value: pair.to_string(),
        };
        let (label, prior) = pair.split_once('=').ok_or_else(invalid)?;
        let prior: f32 = prior.trim().parse().map_err(|_| invalid())?;
        priors.insert(label.trim().to_string(), prior);
    }
    Ok(priors)
}
