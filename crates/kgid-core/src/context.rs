//! Knowledge context
//!
//! Owns every registry the extraction loop writes into. Strategies and the
//! orchestration layer hold a reference to one context instead of reaching
//! for process-wide state.

use chrono::Utc;
use tracing::info;

use crate::confidence::TypePriors;
use crate::config::KgidConfig;
use crate::export::{GraphExport, EXPORT_VERSION};
use crate::identity::IdentityService;
use crate::provenance::ProvenanceLedger;
use crate::quality::QualityAssessor;
use crate::similarity::policy_from_config;
use crate::Result;

/// Service context bundling identity, provenance and quality state
#[derive(Debug)]
pub struct KnowledgeContext {
    config: KgidConfig,
    priors: TypePriors,
    identity: IdentityService,
    provenance: ProvenanceLedger,
    quality: QualityAssessor,
}

impl Default for KnowledgeContext {
    fn default() -> Self {
        Self::build(KgidConfig::default())
    }
}

impl KnowledgeContext {
    /// Create a context from validated configuration
    pub fn new(config: KgidConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: KgidConfig) -> Self {
        Self {
            priors: TypePriors::from(&config.confidence),
            identity: IdentityService::with_policy(policy_from_config(&config.resolution)),
            provenance: ProvenanceLedger::new(),
            quality: QualityAssessor::new(config.quality),
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &KgidConfig {
        &self.config
    }

    /// Entity-type priors derived from configuration
    pub fn priors(&self) -> &TypePriors {
        &self.priors
    }

    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    pub fn provenance(&self) -> &ProvenanceLedger {
        &self.provenance
    }

    pub fn quality(&self) -> &QualityAssessor {
        &self.quality
    }

    /// Snapshot every registry
    pub fn export(&self) -> GraphExport {
        let export = GraphExport {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
            entities: self.identity.entities(),
            mentions: self.identity.mentions(),
            relationships: self.identity.relationships(),
            operations: self.provenance.operations(),
            assessments: self.quality.assessments(),
        };
        info!(
            entities = export.entities.len(),
            mentions = export.mentions.len(),
            relationships = export.relationships.len(),
            operations = export.operations.len(),
            "Exported knowledge context"
        );
        export
    }

    /// Build a context from a validated snapshot
    pub fn import(config: KgidConfig, export: GraphExport) -> Result<Self> {
        export.validate()?;
        let context = Self::new(config)?;

        info!(
            entities = export.entities.len(),
            mentions = export.mentions.len(),
            relationships = export.relationships.len(),
            "Importing knowledge context"
        );

        context
            .identity
            .restore(export.entities, export.mentions, export.relationships);
        context.provenance.restore(export.operations);
        context.quality.restore(export.assessments);
        Ok(context)
    }
}
