//! Extraction pipeline
//!
//! Drives one strategy over a text unit and feeds every candidate through
//! the knowledge context:
//!
//! 1. Drop candidates below the confidence threshold or shorter than the
//!    minimum surface length
//! 2. Open an operation, create the mention, resolve and link the entity
//! 3. Score (base, type prior, context) and assess quality
//! 4. Close the operation with its artifact references, or as failed
//!
//! A mention created before a later step fails stays valid and unlinked.
//! Relations are only stored between entities resolved in the same unit;
//! the rest are dropped and counted. Spans and confidences the strategy did
//! not observe are flagged `span_synthetic` / `confidence_synthetic` on the
//! operation, the assessment and the report.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::embedding::{embedding_attributes, embedding_context, EmbeddingProvider};
use crate::{Candidate, ExtractionStrategy, RawExtraction, RawRelation};
use kgid_core::confidence::{self, Factors};
use kgid_core::identity::normalize_surface_form;
use kgid_core::{
    entity_ref, mention_ref, relationship_ref, ErrorKind, ExtractionConfig, KgidError,
    KnowledgeContext, QualityTier, Relationship, ResolutionAction, Result,
};

/// Context confidence assumed for a unit when the caller does not supply one
pub const DEFAULT_CONTEXT_CONFIDENCE: f32 = 0.8;

/// Per-call extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOptions {
    /// Candidates below this confidence are dropped
    pub confidence_threshold: f32,
    /// Candidates whose trimmed surface is shorter are dropped
    pub min_surface_length: usize,
    /// Quality of the source unit, used as the context factor
    pub context_confidence: f32,
    /// Add the surface length factor to quality assessments (off by default,
    /// so the tier follows the mean of base, type prior and context)
    pub length_factor: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

impl From<&ExtractionConfig> for ExtractionOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            min_surface_length: config.min_surface_length,
            context_confidence: DEFAULT_CONTEXT_CONFIDENCE,
            length_factor: false,
        }
    }
}

impl ExtractionOptions {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_context_confidence(mut self, confidence: f32) -> Self {
        self.context_confidence = confidence;
        self
    }

    pub fn with_length_factor(mut self, enabled: bool) -> Self {
        self.length_factor = enabled;
        self
    }

    fn accepts(&self, candidate: &Candidate) -> bool {
        candidate.confidence >= self.confidence_threshold
            && candidate.text.trim().chars().count() >= self.min_surface_length
    }
}

/// Outcome discriminator callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Every accepted candidate was processed
    Success,
    /// Some candidates failed; their operations are closed as failed
    Partial,
    /// The unit failed as a whole
    Error,
}

/// One candidate that made it into the registries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub operation_id: Uuid,
    pub mention_id: Uuid,
    pub entity_id: Uuid,
    pub surface_form: String,
    pub normalized_form: String,
    pub canonical_name: String,
    pub entity_type: String,
    pub span: (usize, usize),
    /// The span was not found in the unit and is a placeholder
    pub span_synthetic: bool,
    pub action: ResolutionAction,
    pub similarity_score: f32,
    /// Mention confidence: mean of base, type prior and context
    pub confidence: f32,
    pub quality_confidence: f32,
    pub quality_tier: QualityTier,
    /// The strategy defaulted the base confidence
    pub confidence_synthetic: bool,
}

/// Where a candidate sits in its unit
#[derive(Debug, Clone, Copy)]
struct Placement {
    span: (usize, usize),
    synthetic: bool,
}

impl Placement {
    /// Strategy span, else the first occurrence, else a tagged `(0, len)` placeholder
    fn locate(candidate: &Candidate, text: &str) -> Self {
        let surface = candidate.text.trim();
        match candidate.span.or_else(|| crate::find_char_span(text, surface)) {
            Some(span) => Self {
                span,
                synthetic: false,
            },
            None => Self {
                span: (0, surface.chars().count()),
                synthetic: true,
            },
        }
    }
}

/// One candidate whose processing failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub operation_id: Uuid,
    pub surface_form: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Mention left unlinked by the failure, if one was created
    pub mention_id: Option<Uuid>,
}

/// Unit-level error with the operation it was recorded under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    pub kind: ErrorKind,
    pub message: String,
    pub operation_id: Option<Uuid>,
}

/// Result of extracting one text unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub status: ReportStatus,
    pub source_ref: String,
    pub strategy: String,
    /// Operation covering the strategy run
    pub operation_id: Option<Uuid>,
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<Relationship>,
    pub failures: Vec<CandidateFailure>,
    /// Candidates removed by the threshold or length filter
    pub filtered_candidates: usize,
    /// Relations whose endpoints did not resolve
    pub dropped_relations: usize,
    pub error: Option<ReportError>,
}

impl ExtractionReport {
    fn new(source_ref: &str, strategy: &str) -> Self {
        Self {
            status: ReportStatus::Success,
            source_ref: source_ref.to_string(),
            strategy: strategy.to_string(),
            operation_id: None,
            entities: Vec::new(),
            relationships: Vec::new(),
            failures: Vec::new(),
            filtered_candidates: 0,
            dropped_relations: 0,
            error: None,
        }
    }

    fn failed(mut self, error: &KgidError, operation_id: Option<Uuid>) -> Self {
        self.status = ReportStatus::Error;
        self.error = Some(ReportError {
            kind: error.kind(),
            message: error.to_string(),
            operation_id,
        });
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}

/// Strategy plus knowledge context plus extraction settings
pub struct ExtractionPipeline {
    context: Arc<KnowledgeContext>,
    strategy: Box<dyn ExtractionStrategy>,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    options: ExtractionOptions,
}

impl ExtractionPipeline {
    /// Create a pipeline using the context's extraction defaults
    pub fn new(context: Arc<KnowledgeContext>, strategy: Box<dyn ExtractionStrategy>) -> Self {
        let options = ExtractionOptions::from(&context.config().extraction);
        Self {
            context,
            strategy,
            embedder: None,
            options,
        }
    }

    /// Override the instance-level options
    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach embeddings to newly created entities
    pub fn with_embedder(mut self, embedder: Box<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn context(&self) -> &Arc<KnowledgeContext> {
        &self.context
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Extract one unit with the instance options
    pub fn extract(&self, text: &str, source_ref: &str) -> ExtractionReport {
        self.extract_with(text, source_ref, &self.options)
    }

    /// Extract one unit with per-call options
    #[instrument(skip(self, text, options), fields(strategy = self.strategy.name()))]
    pub fn extract_with(
        &self,
        text: &str,
        source_ref: &str,
        options: &ExtractionOptions,
    ) -> ExtractionReport {
        let strategy = self.strategy.name();
        let tool_id = self.context.config().extraction.tool_id.as_str();
        let mut report = ExtractionReport::new(source_ref, strategy);
        let ledger = self.context.provenance();

        let run_id = ledger.start_operation(
            strategy,
            "run_strategy",
            vec![source_ref.to_string()],
            HashMap::from([
                ("text_length".to_string(), json!(text.chars().count())),
                ("confidence_threshold".to_string(), json!(options.confidence_threshold)),
                ("orchestrator".to_string(), json!(tool_id)),
            ]),
        );
        report.operation_id = Some(run_id);

        let raw = match validate_unit(text, source_ref).and_then(|_| self.run_strategy(text)) {
            Ok(raw) => raw,
            Err(e) => {
                let e = match e {
                    KgidError::ValidationError(_) | KgidError::ExtractionFailure(_) => e,
                    other => KgidError::ExtractionFailure(format!("{strategy}: {other}")),
                };
                close_failed(self.context.as_ref(), run_id, &e);
                return report.failed(&e, Some(run_id));
            }
        };

        let (accepted, filtered): (Vec<Candidate>, Vec<Candidate>) =
            raw.candidates.into_iter().partition(|c| options.accepts(c));
        report.filtered_candidates = filtered.len();

        if let Err(e) = ledger.complete_operation(
            run_id,
            Vec::new(),
            true,
            Some(HashMap::from([
                ("candidates".to_string(), json!(accepted.len())),
                ("filtered".to_string(), json!(filtered.len())),
                ("relations".to_string(), json!(raw.relations.len())),
            ])),
            None,
        ) {
            return report.failed(&e, Some(run_id));
        }

        for candidate in &accepted {
            match self.process_candidate(candidate, text, source_ref, options) {
                Ok(entity) => report.entities.push(entity),
                Err(failure) => report.failures.push(failure),
            }
        }

        self.store_relations(&raw.relations, source_ref, options, &mut report);

        if !report.failures.is_empty() {
            report.status = if report.entities.is_empty() {
                ReportStatus::Error
            } else {
                ReportStatus::Partial
            };
        }

        info!(
            source_ref,
            status = ?report.status,
            entities = report.entities.len(),
            relationships = report.relationships.len(),
            failures = report.failures.len(),
            filtered = report.filtered_candidates,
            dropped_relations = report.dropped_relations,
            "Extraction unit finished"
        );
        report
    }

    /// Extract many units concurrently on the blocking pool
    ///
    /// Reports come back in input order; a panicking unit yields an error report.
    pub async fn extract_batch(
        self: Arc<Self>,
        units: Vec<(String, String)>,
    ) -> Vec<ExtractionReport> {
        let handles: Vec<_> = units
            .into_iter()
            .map(|(text, source_ref)| {
                let pipeline = Arc::clone(&self);
                let fallback_ref = source_ref.clone();
                let handle =
                    tokio::task::spawn_blocking(move || pipeline.extract(&text, &source_ref));
                (fallback_ref, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (source_ref, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(%source_ref, error = %e, "Extraction task failed");
                    let error = KgidError::Other(anyhow::anyhow!("extraction task failed: {e}"));
                    ExtractionReport::new(&source_ref, self.strategy.name()).failed(&error, None)
                }
            };
            reports.push(report);
        }
        reports
    }

    /// Run the strategy, turning a panic into an extraction failure
    fn run_strategy(&self, text: &str) -> Result<RawExtraction> {
        panic::catch_unwind(AssertUnwindSafe(|| self.strategy.extract(text))).unwrap_or_else(
            |payload| {
                Err(KgidError::ExtractionFailure(format!(
                    "{} panicked: {}",
                    self.strategy.name(),
                    panic_message(payload.as_ref())
                )))
            },
        )
    }

    fn process_candidate(
        &self,
        candidate: &Candidate,
        text: &str,
        source_ref: &str,
        options: &ExtractionOptions,
    ) -> std::result::Result<ExtractedEntity, CandidateFailure> {
        let ledger = self.context.provenance();
        let placement = Placement::locate(candidate, text);
        let operation_id = ledger.start_operation(
            self.strategy.name(),
            "extract_entity",
            vec![source_ref.to_string()],
            HashMap::from([
                ("surface_form".to_string(), json!(candidate.text)),
                ("entity_type".to_string(), json!(candidate.entity_type)),
                ("base_confidence".to_string(), json!(candidate.confidence)),
                ("span".to_string(), json!(placement.span)),
                ("span_synthetic".to_string(), json!(placement.synthetic)),
                (
                    "confidence_synthetic".to_string(),
                    json!(candidate.confidence_synthetic),
                ),
            ]),
        );

        let mut mention_id = None;
        let outcome = self.resolve_candidate(
            candidate,
            placement,
            source_ref,
            options,
            operation_id,
            &mut mention_id,
        );

        match outcome {
            Ok(entity) => {
                let outputs = vec![mention_ref(entity.mention_id), entity_ref(entity.entity_id)];
                let metadata = HashMap::from([
                    ("action".to_string(), json!(entity.action)),
                    ("quality_tier".to_string(), json!(entity.quality_tier)),
                    ("confidence".to_string(), json!(entity.confidence)),
                ]);
                match ledger.complete_operation(operation_id, outputs, true, Some(metadata), None) {
                    Ok(_) => Ok(entity),
                    Err(e) => Err(failure(operation_id, candidate, &e, mention_id)),
                }
            }
            Err(e) => {
                close_failed(self.context.as_ref(), operation_id, &e);
                Err(failure(operation_id, candidate, &e, mention_id))
            }
        }
    }

    fn resolve_candidate(
        &self,
        candidate: &Candidate,
        placement: Placement,
        source_ref: &str,
        options: &ExtractionOptions,
        operation_id: Uuid,
        mention_id: &mut Option<Uuid>,
    ) -> Result<ExtractedEntity> {
        let identity = self.context.identity();
        let surface = candidate.text.trim();
        let prior = self.context.priors().prior(&candidate.entity_type);
        let confidence =
            confidence::entity_confidence(candidate.confidence, prior, options.context_confidence);

        let span = placement.span;

        let mention = identity.create_mention(
            surface,
            span.0,
            span.1,
            source_ref,
            &candidate.entity_type,
            confidence,
        )?;
        *mention_id = Some(mention.mention_id);

        let resolution = identity.find_or_create_entity(
            surface,
            &candidate.entity_type,
            &candidate.context,
            confidence,
        )?;
        identity.link_mention_to_entity(mention.mention_id, resolution.entity_id)?;

        if resolution.action == ResolutionAction::Created {
            if let Some(embedder) = &self.embedder {
                let context = embedding_context(
                    &resolution.entity_type,
                    &resolution.canonical_name,
                    None,
                );
                identity.merge_entity_attributes(
                    resolution.entity_id,
                    embedding_attributes(embedder.as_ref(), &context),
                )?;
            }
        }

        let mut factors = Factors::from([
            ("entity_type_confidence".to_string(), prior),
            ("context_quality".to_string(), options.context_confidence),
        ]);
        if options.length_factor {
            factors.insert("entity_length".to_string(), confidence::length_factor(surface));
        }
        let assessment = self.context.quality().assess_confidence(
            &mention_ref(mention.mention_id),
            candidate.confidence,
            &factors,
            HashMap::from([
                ("extraction_tool".to_string(), json!(self.strategy.name())),
                ("entity_type".to_string(), json!(candidate.entity_type)),
                ("source_ref".to_string(), json!(source_ref)),
                ("operation_id".to_string(), json!(operation_id)),
                ("span_synthetic".to_string(), json!(placement.synthetic)),
                (
                    "confidence_synthetic".to_string(),
                    json!(candidate.confidence_synthetic),
                ),
            ]),
        );

        debug!(
            %operation_id,
            mention_id = %mention.mention_id,
            entity_id = %resolution.entity_id,
            action = %resolution.action,
            confidence,
            tier = %assessment.tier,
            "Candidate resolved"
        );

        Ok(ExtractedEntity {
            operation_id,
            mention_id: mention.mention_id,
            entity_id: resolution.entity_id,
            surface_form: surface.to_string(),
            normalized_form: mention.normalized_form,
            canonical_name: resolution.canonical_name,
            entity_type: resolution.entity_type,
            span,
            span_synthetic: placement.synthetic,
            action: resolution.action,
            similarity_score: resolution.similarity_score,
            confidence,
            quality_confidence: assessment.confidence,
            quality_tier: assessment.tier,
            confidence_synthetic: candidate.confidence_synthetic,
        })
    }

    fn store_relations(
        &self,
        relations: &[RawRelation],
        source_ref: &str,
        options: &ExtractionOptions,
        report: &mut ExtractionReport,
    ) {
        let accepted: Vec<&RawRelation> = relations
            .iter()
            .filter(|r| r.confidence >= options.confidence_threshold)
            .collect();
        if accepted.is_empty() {
            return;
        }

        let resolved: HashMap<String, Uuid> = report
            .entities
            .iter()
            .map(|e| (e.normalized_form.clone(), e.entity_id))
            .collect();
        let identity = self.context.identity();
        let ledger = self.context.provenance();

        let operation_id = ledger.start_operation(
            self.strategy.name(),
            "extract_relationships",
            vec![source_ref.to_string()],
            HashMap::from([("relations".to_string(), json!(accepted.len()))]),
        );

        let mut outputs = Vec::new();
        for relation in accepted {
            let endpoints = (
                resolved.get(&normalize_surface_form(&relation.source)),
                resolved.get(&normalize_surface_form(&relation.target)),
            );
            let (Some(&source_id), Some(&target_id)) = endpoints else {
                debug!(
                    source = %relation.source,
                    target = %relation.target,
                    relation = %relation.relation,
                    "Dropping relation with unresolved endpoint"
                );
                report.dropped_relations += 1;
                continue;
            };

            let mut attributes = HashMap::from([
                ("extracted_from".to_string(), json!(source_ref)),
                ("context".to_string(), json!(relation.context)),
                ("strategy".to_string(), json!(self.strategy.name())),
            ]);
            if relation.confidence_synthetic {
                attributes.insert("confidence_synthetic".to_string(), json!(true));
            }
            match identity.add_relationship(
                source_id,
                target_id,
                &relation.relation,
                relation.confidence.clamp(0.0, 1.0),
                attributes,
            ) {
                Ok(stored) => {
                    outputs.push(relationship_ref(stored.id));
                    report.relationships.push(stored);
                }
                Err(e) => {
                    warn!(relation = %relation.relation, error = %e, "Relation rejected");
                    report.dropped_relations += 1;
                }
            }
        }

        let metadata = HashMap::from([
            ("stored".to_string(), json!(outputs.len())),
            ("dropped".to_string(), json!(report.dropped_relations)),
        ]);
        if let Err(e) =
            ledger.complete_operation(operation_id, outputs, true, Some(metadata), None)
        {
            warn!(%operation_id, error = %e, "Could not close relationship operation");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn validate_unit(text: &str, source_ref: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(KgidError::ValidationError("text cannot be empty".to_string()));
    }
    if source_ref.trim().is_empty() {
        return Err(KgidError::ValidationError("source_ref is required".to_string()));
    }
    Ok(())
}

fn close_failed(context: &KnowledgeContext, operation_id: Uuid, error: &KgidError) {
    if let Err(e) = context
        .provenance()
        .fail_operation(operation_id, error.to_string())
    {
        warn!(%operation_id, error = %e, "Could not close failed operation");
    }
}

fn failure(
    operation_id: Uuid,
    candidate: &Candidate,
    error: &KgidError,
    mention_id: Option<Uuid>,
) -> CandidateFailure {
    warn!(
        %operation_id,
        surface = %candidate.text,
        error = %error,
        "Candidate failed"
    );
    CandidateFailure {
        operation_id,
        surface_form: candidate.text.clone(),
        kind: error.kind(),
        message: error.to_string(),
        mention_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgid_core::OperationStatus;

    struct Fixed(RawExtraction);

    impl ExtractionStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn extract(&self, _text: &str) -> Result<RawExtraction> {
            Ok(self.0.clone())
        }
    }

    struct Exploding;

    impl ExtractionStrategy for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn extract(&self, _text: &str) -> Result<RawExtraction> {
            panic!("tagger model missing")
        }
    }

    fn pipeline(candidates: Vec<Candidate>) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Arc::new(KnowledgeContext::default()),
            Box::new(Fixed(RawExtraction {
                candidates,
                relations: Vec::new(),
            })),
        )
    }

    #[test]
    fn test_filters_threshold_and_length() {
        let p = pipeline(vec![
            Candidate::new("Acme", "ORG", 0.9),
            Candidate::new("Beta", "ORG", 0.5),
            Candidate::new("X", "ORG", 0.99),
        ]);
        let report = p.extract("Acme Beta X", "doc://1");

        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.entities.len(), 1);
        assert_eq!(report.filtered_candidates, 2);
    }

    #[test]
    fn test_per_call_threshold_override() {
        let p = pipeline(vec![Candidate::new("Beta", "ORG", 0.5)]);
        let options = p.options().clone().with_threshold(0.4);
        let report = p.extract_with("Beta", "doc://1", &options);
        assert_eq!(report.entities.len(), 1);
    }

    #[test]
    fn test_every_operation_is_closed() {
        let p = pipeline(vec![
            Candidate::new("Acme", "ORG", 0.9),
            Candidate::new("Dr. Smith", "PERSON", 0.9),
        ]);
        p.extract("Dr. Smith joined Acme", "doc://1");

        let ledger = p.context().provenance();
        assert!(ledger.open_operations().is_empty());
        // One strategy run plus one per candidate
        assert_eq!(ledger.operations().len(), 3);
    }

    #[test]
    fn test_empty_text_closes_run_as_failed() {
        let p = pipeline(vec![]);
        let report = p.extract("   ", "doc://1");

        assert_eq!(report.status, ReportStatus::Error);
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);

        let op = p.context().provenance().get_operation(error.operation_id.unwrap()).unwrap();
        assert_eq!(op.status(), OperationStatus::Failed);
    }

    #[test]
    fn test_candidate_failure_is_recorded() {
        // A blank type passes mention creation but fails entity resolution
        let p = pipeline(vec![
            Candidate::new("Acme", "ORG", 0.9),
            Candidate::new("Broken", " ", 0.9),
        ]);
        let report = p.extract("Acme Broken", "doc://1");

        assert_eq!(report.status, ReportStatus::Partial);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.kind, ErrorKind::Validation);

        let op = p.context().provenance().get_operation(failure.operation_id).unwrap();
        assert_eq!(op.status(), OperationStatus::Failed);
        assert!(op.outputs().is_empty());

        // The mention survives, unlinked
        let mention = p
            .context()
            .identity()
            .get_mention(failure.mention_id.unwrap())
            .unwrap();
        assert!(!mention.is_linked());
    }

    #[test]
    fn test_span_located_when_missing() {
        let p = pipeline(vec![Candidate::new("Acme", "ORG", 0.9)]);
        let report = p.extract("We met at Acme today", "doc://1");
        assert_eq!(report.entities[0].span, (10, 14));
        assert!(!report.entities[0].span_synthetic);
    }

    #[test]
    fn test_default_tier_uses_three_way_mean() {
        let p = pipeline(vec![Candidate::new("Dr. Smith", "PERSON", 0.95)]);
        assert!(!p.options().length_factor);
        let options = p.options().clone().with_context_confidence(0.9);
        let report = p.extract_with("Dr. Smith works at Acme", "doc://1", &options);

        let smith = &report.entities[0];
        let expected = (0.95 + 0.9 + 0.9) / 3.0;
        assert!((smith.confidence - expected).abs() < 1e-6);
        assert!((smith.quality_confidence - expected).abs() < 1e-6);
        assert_eq!(smith.quality_tier, QualityTier::High);
    }

    #[test]
    fn test_unlocated_span_is_tagged_synthetic() {
        let p = pipeline(vec![Candidate::new("Globex Corporation", "ORG", 0.9)]);
        let report = p.extract("Acme hired someone", "doc://1");

        let entity = &report.entities[0];
        assert_eq!(entity.span, (0, 18));
        assert!(entity.span_synthetic);
        assert!(!entity.confidence_synthetic);

        let op = p.context().provenance().get_operation(entity.operation_id).unwrap();
        assert_eq!(op.parameters["span_synthetic"], json!(true));

        let assessment = p
            .context()
            .quality()
            .latest_assessment(&mention_ref(entity.mention_id))
            .unwrap();
        assert_eq!(assessment.metadata["span_synthetic"], json!(true));
    }

    #[test]
    fn test_defaulted_confidence_is_tagged_synthetic() {
        let p = pipeline(vec![
            Candidate::new("Acme", "ORG", 0.8).with_synthetic_confidence(),
            Candidate::new("Beta", "ORG", 0.9),
        ]);
        let report = p.extract("Acme and Beta", "doc://1");

        assert!(report.entities[0].confidence_synthetic);
        assert!(!report.entities[0].span_synthetic);
        assert!(!report.entities[1].confidence_synthetic);

        let op = p
            .context()
            .provenance()
            .get_operation(report.entities[0].operation_id)
            .unwrap();
        assert_eq!(op.parameters["confidence_synthetic"], json!(true));

        let assessment = p
            .context()
            .quality()
            .latest_assessment(&mention_ref(report.entities[0].mention_id))
            .unwrap();
        assert_eq!(assessment.metadata["confidence_synthetic"], json!(true));
    }

    #[test]
    fn test_strategy_panic_closes_run_as_failed() {
        let p = ExtractionPipeline::new(Arc::new(KnowledgeContext::default()), Box::new(Exploding));
        let report = p.extract("Dr. Smith works at Acme", "doc://1");

        assert_eq!(report.status, ReportStatus::Error);
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::ExtractionFailure);
        assert!(error.message.contains("tagger model missing"));

        let run_id = error.operation_id.unwrap();
        assert_eq!(report.operation_id, Some(run_id));
        let op = p.context().provenance().get_operation(run_id).unwrap();
        assert_eq!(op.status(), OperationStatus::Failed);
        assert!(p.context().provenance().open_operations().is_empty());
    }
}
