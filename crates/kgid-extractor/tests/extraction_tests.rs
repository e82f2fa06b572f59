//! Extraction loop integration tests
//!
//! Drive the full loop (strategy, identity, provenance, quality) against an
//! in-memory knowledge context.

use std::collections::HashSet;
use std::sync::Arc;

use kgid_core::{
    ErrorKind, GraphExport, KgidConfig, KnowledgeContext, OperationStatus, QualityTier,
    ResolutionAction,
};
use kgid_extractor::ontology::OntologyType;
use kgid_extractor::{
    Candidate, CompletionBackend, DomainOntology, EmbeddingProvider, ExtractionOptions,
    ExtractionPipeline, ExtractionStrategy, HybridStrategy, KeywordRelationExtractor,
    OntologyStrategy, RawExtraction, RawRelation, ReportStatus, RuleBasedNer,
};

/// Strategy returning a canned extraction
struct Canned(RawExtraction);

impl ExtractionStrategy for Canned {
    fn name(&self) -> &str {
        "canned"
    }

    fn extract(&self, _text: &str) -> kgid_core::Result<RawExtraction> {
        Ok(self.0.clone())
    }
}

fn canned(candidates: Vec<Candidate>, relations: Vec<RawRelation>) -> Box<dyn ExtractionStrategy> {
    Box::new(Canned(RawExtraction {
        candidates,
        relations,
    }))
}

fn rules_with_relations() -> Box<dyn ExtractionStrategy> {
    Box::new(
        HybridStrategy::new()
            .with_strategy(Box::new(RuleBasedNer::new()))
            .with_relation_extractor(Box::new(KeywordRelationExtractor::new())),
    )
}

// =============================================================================
// Scoring Scenarios
// =============================================================================

#[test]
fn test_dr_smith_scores_medium() {
    let context = Arc::new(KnowledgeContext::default());
    let pipeline = ExtractionPipeline::new(context.clone(), rules_with_relations());

    let report = pipeline.extract("Dr. Smith works at Acme University", "doc://smith");
    assert_eq!(report.status, ReportStatus::Success);

    let smith = report
        .entities
        .iter()
        .find(|e| e.entity_type == "PERSON")
        .expect("person extracted");
    // mean(0.85, 0.9, 0.8)
    assert!((smith.confidence - 0.85).abs() < 1e-6);
    assert!((smith.quality_confidence - 0.85).abs() < 1e-6);
    assert_eq!(smith.quality_tier, QualityTier::Medium);

    let assessment = context
        .quality()
        .latest_assessment(&kgid_core::mention_ref(smith.mention_id))
        .unwrap();
    assert_eq!(assessment.tier.as_str(), "medium");

    assert_eq!(report.relationships.len(), 1);
    assert_eq!(report.relationships[0].relationship_type, "worksAt");
    assert_eq!(report.relationships[0].source_id, smith.entity_id);
}

#[test]
fn test_length_factor_joins_assessment() {
    let context = Arc::new(KnowledgeContext::default());
    let pipeline = ExtractionPipeline::new(context, rules_with_relations())
        .with_options(ExtractionOptions::default().with_length_factor(true));

    let report = pipeline.extract("Dr. Smith works at Acme University", "doc://smith");
    let smith = &report.entities[0];
    // mean(0.85, 0.9, 0.8, 9/20)
    assert!((smith.quality_confidence - 0.75).abs() < 1e-6);
    assert_eq!(smith.quality_tier, QualityTier::Medium);
}

// =============================================================================
// Identity Scenarios
// =============================================================================

#[test]
fn test_case_variants_resolve_to_one_entity() {
    let context = Arc::new(KnowledgeContext::default());

    let first = ExtractionPipeline::new(
        context.clone(),
        canned(vec![Candidate::new("Acme University", "ORG", 0.9)], vec![]),
    )
    .extract("Acme University", "doc://a");
    let second = ExtractionPipeline::new(
        context.clone(),
        canned(vec![Candidate::new("ACME UNIVERSITY", "ORG", 0.9)], vec![]),
    )
    .extract("ACME UNIVERSITY", "doc://b");

    assert_eq!(first.entities[0].action, ResolutionAction::Created);
    assert_eq!(second.entities[0].action, ResolutionAction::Found);
    assert_eq!(second.entities[0].similarity_score, 1.0);
    assert_eq!(first.entities[0].entity_id, second.entities[0].entity_id);

    let stats = context.identity().stats();
    assert_eq!(stats.total_entities, 1);
    assert_eq!(stats.total_mentions, 2);
    assert_eq!(
        context
            .identity()
            .mentions_for_entity(first.entities[0].entity_id)
            .len(),
        2
    );
}

#[test]
fn test_relation_with_failed_endpoint_is_dropped() {
    let context = Arc::new(KnowledgeContext::default());
    let strategy = canned(
        vec![
            Candidate::new("Acme University", "ORG", 0.9),
            // Blank type fails entity resolution
            Candidate::new("Dr. Smith", "", 0.9),
        ],
        vec![RawRelation {
            source: "Dr. Smith".to_string(),
            relation: "worksAt".to_string(),
            target: "Acme University".to_string(),
            confidence: 0.9,
            context: "works at".to_string(),
            confidence_synthetic: false,
        }],
    );
    let report = ExtractionPipeline::new(context.clone(), strategy)
        .extract("Dr. Smith works at Acme University", "doc://1");

    assert_eq!(report.status, ReportStatus::Partial);
    assert_eq!(report.dropped_relations, 1);
    assert!(report.relationships.is_empty());
    assert!(context.identity().relationships().is_empty());
    assert!(context.provenance().open_operations().is_empty());
}

// =============================================================================
// Provenance
// =============================================================================

#[test]
fn test_every_started_operation_completes_once() {
    let context = Arc::new(KnowledgeContext::default());
    let pipeline = ExtractionPipeline::new(context.clone(), rules_with_relations());

    pipeline.extract("Dr. Smith works at Acme University", "doc://1");
    pipeline.extract("Prof. Jones founded Beta Labs in London", "doc://2");
    pipeline.extract("", "doc://3");

    let operations = context.provenance().operations();
    assert!(!operations.is_empty());
    for op in &operations {
        assert_ne!(op.status(), OperationStatus::Open);
        op.validate().unwrap();
    }

    let stats = context.provenance().statistics();
    assert_eq!(stats.open, 0);
    assert_eq!(stats.failed, 1);
}

#[test]
fn test_mention_lineage_reaches_source() {
    let context = Arc::new(KnowledgeContext::default());
    let pipeline = ExtractionPipeline::new(context.clone(), rules_with_relations());
    let report = pipeline.extract("Dr. Smith works at Acme University", "doc://1");

    let lineage = context.provenance().lineage(
        &kgid_core::mention_ref(report.entities[0].mention_id),
        kgid_core::LineageDirection::Backward,
        5,
    );
    assert_eq!(lineage.len(), 1);
    assert_eq!(lineage[0].inputs, vec!["doc://1".to_string()]);
    assert_eq!(lineage[0].operation_type, "extract_entity");
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn test_export_round_trip_keeps_endpoints() {
    let context = Arc::new(KnowledgeContext::default());
    let pipeline = ExtractionPipeline::new(context.clone(), rules_with_relations());
    pipeline.extract("Dr. Smith works at Acme University", "doc://1");
    pipeline.extract("Dr. Smith joined Acme University", "doc://2");

    let json = context.export().to_json().unwrap();
    let restored =
        KnowledgeContext::import(KgidConfig::default(), GraphExport::from_json(&json).unwrap())
            .unwrap();

    let entity_ids: HashSet<_> = restored.identity().entities().iter().map(|e| e.id).collect();
    let relationships = restored.identity().relationships();
    assert_eq!(relationships.len(), 2);
    for rel in relationships {
        assert!(entity_ids.contains(&rel.source_id));
        assert!(entity_ids.contains(&rel.target_id));
    }
    assert_eq!(
        restored.provenance().operations().len(),
        context.provenance().operations().len()
    );
}

// =============================================================================
// Strategies
// =============================================================================

struct Scripted(&'static str);

impl CompletionBackend for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

struct Offline;

impl CompletionBackend for Offline {
    fn name(&self) -> &str {
        "offline"
    }

    fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("backend unreachable")
    }
}

fn academic() -> DomainOntology {
    DomainOntology {
        domain_name: "academia".to_string(),
        entity_types: vec![
            OntologyType::new("RESEARCHER", "A person doing research"),
            OntologyType::new("INSTITUTION", "A university or lab"),
        ],
        relationship_types: vec![OntologyType::new("AFFILIATED_WITH", "Works at")],
        ..Default::default()
    }
}

#[test]
fn test_ontology_strategy_through_pipeline() {
    let response = r#"{
        "entities": [
            {"text": "Dr. Smith", "type": "RESEARCHER", "confidence": 0.9},
            {"text": "Acme University", "type": "INSTITUTION", "confidence": 0.9}
        ],
        "relationships": [
            {"source": "Dr. Smith", "relation": "AFFILIATED_WITH", "target": "Acme University", "confidence": 0.85}
        ]
    }"#;
    let context = Arc::new(KnowledgeContext::default());
    let strategy = OntologyStrategy::new(academic(), Box::new(Scripted(response)));
    let report = ExtractionPipeline::new(context.clone(), Box::new(strategy))
        .extract("Dr. Smith works at Acme University", "doc://1");

    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.strategy, "ontology:scripted");
    assert_eq!(report.entities.len(), 2);
    // Unknown ontology types fall back to the default prior
    assert!((report.entities[0].confidence - (0.9 + 0.8 + 0.8) / 3.0).abs() < 1e-6);
    assert_eq!(report.relationships[0].relationship_type, "AFFILIATED_WITH");
}

#[test]
fn test_strategy_failure_is_recorded() {
    let context = Arc::new(KnowledgeContext::default());
    let strategy = OntologyStrategy::new(academic(), Box::new(Offline));
    let report = ExtractionPipeline::new(context.clone(), Box::new(strategy))
        .extract("Dr. Smith works at Acme University", "doc://1");

    assert_eq!(report.status, ReportStatus::Error);
    let error = report.error.expect("error payload");
    assert_eq!(error.kind, ErrorKind::ExtractionFailure);
    assert!(error.message.contains("backend unreachable"));

    let op = context
        .provenance()
        .get_operation(error.operation_id.unwrap())
        .unwrap();
    assert_eq!(op.status(), OperationStatus::Failed);
    assert!(context.identity().mentions().is_empty());
}

// =============================================================================
// Embeddings
// =============================================================================

struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn model(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        8
    }

    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("rate limited")
    }
}

#[test]
fn test_placeholder_embedding_is_tagged() {
    let context = Arc::new(KnowledgeContext::default());
    let report = ExtractionPipeline::new(
        context.clone(),
        canned(vec![Candidate::new("Acme University", "ORG", 0.9)], vec![]),
    )
    .with_embedder(Box::new(FailingEmbedder))
    .extract("Acme University", "doc://1");

    let entity = context
        .identity()
        .get_entity(report.entities[0].entity_id)
        .unwrap();
    assert_eq!(entity.attributes["embedding_synthetic"], serde_json::json!(true));
    assert_eq!(
        entity.attributes["embedding"].as_array().map(Vec::len),
        Some(8)
    );
}

// =============================================================================
// Batch
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_extraction_dedupes_across_units() {
    let context = Arc::new(KnowledgeContext::default());
    let pipeline = Arc::new(ExtractionPipeline::new(context.clone(), rules_with_relations()));

    let units: Vec<(String, String)> = (0..12)
        .map(|i| {
            (
                "Dr. Smith works at Acme University".to_string(),
                format!("doc://{i}"),
            )
        })
        .chain(std::iter::once((String::new(), "doc://empty".to_string())))
        .collect();

    let reports = pipeline.extract_batch(units).await;
    assert_eq!(reports.len(), 13);
    assert_eq!(reports[0].source_ref, "doc://0");
    assert_eq!(reports[12].status, ReportStatus::Error);
    assert!(reports[..12].iter().all(|r| r.is_success()));

    let stats = context.identity().stats();
    assert_eq!(stats.total_entities, 2);
    assert_eq!(stats.total_mentions, 24);
    assert_eq!(stats.total_relationships, 12);
    assert!(context.provenance().open_operations().is_empty());
}

/// Strategy that panics on units mentioning "boom"
struct Fragile;

impl ExtractionStrategy for Fragile {
    fn name(&self) -> &str {
        "fragile"
    }

    fn extract(&self, text: &str) -> kgid_core::Result<RawExtraction> {
        if text.contains("boom") {
            panic!("tokenizer state corrupted");
        }
        Ok(RawExtraction {
            candidates: vec![Candidate::new("Acme University", "ORG", 0.9)],
            relations: vec![],
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_panicking_unit_is_audited() {
    let context = Arc::new(KnowledgeContext::default());
    let pipeline = Arc::new(ExtractionPipeline::new(context.clone(), Box::new(Fragile)));

    let units = vec![
        ("Acme University".to_string(), "doc://ok".to_string()),
        ("boom".to_string(), "doc://boom".to_string()),
    ];
    let reports = pipeline.extract_batch(units).await;

    assert!(reports[0].is_success());
    let failed = &reports[1];
    assert_eq!(failed.status, ReportStatus::Error);
    let error = failed.error.as_ref().expect("error payload");
    assert_eq!(error.kind, ErrorKind::ExtractionFailure);
    assert!(error.message.contains("tokenizer state corrupted"));

    let run_id = error.operation_id.expect("run operation recorded");
    let op = context.provenance().get_operation(run_id).unwrap();
    assert_eq!(op.status(), OperationStatus::Failed);
    assert_eq!(op.inputs, vec!["doc://boom".to_string()]);
    assert!(context.provenance().open_operations().is_empty());
}

#[test]
fn test_paraphrased_ontology_entity_is_tagged() {
    let response = r#"{"entities": [
        {"text": "Globex Corporation", "type": "INSTITUTION"}
    ]}"#;
    let context = Arc::new(KnowledgeContext::default());
    let strategy = OntologyStrategy::new(academic(), Box::new(Scripted(response)));
    let report = ExtractionPipeline::new(context.clone(), Box::new(strategy))
        .extract("Acme hired someone", "doc://1");

    let entity = &report.entities[0];
    assert!(entity.span_synthetic);
    assert!(entity.confidence_synthetic);

    let assessment = context
        .quality()
        .latest_assessment(&kgid_core::mention_ref(entity.mention_id))
        .unwrap();
    assert_eq!(assessment.metadata["span_synthetic"], serde_json::json!(true));
    assert_eq!(assessment.metadata["confidence_synthetic"], serde_json::json!(true));
}
