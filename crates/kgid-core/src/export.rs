//! Graph export snapshot
//!
//! A self-describing JSON document with every entity, mention, relationship,
//! operation record and quality assessment. Downstream graph stores load it
//! as-is; `KnowledgeContext::import` restores it into a fresh context.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provenance::OperationRecord;
use crate::quality::QualityAssessment;
use crate::{Entity, KgidError, Mention, Relationship, Result};

/// Snapshot format version
pub const EXPORT_VERSION: &str = "1";

/// Full snapshot of a knowledge context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub entities: Vec<Entity>,
    pub mentions: Vec<Mention>,
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub operations: Vec<OperationRecord>,
    #[serde(default)]
    pub assessments: Vec<QualityAssessment>,
}

impl GraphExport {
    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| KgidError::Other(anyhow::anyhow!("export serialization failed: {e}")))
    }

    /// Parse and validate a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self> {
        let export: Self = serde_json::from_str(json)
            .map_err(|e| KgidError::ValidationError(format!("invalid export document: {e}")))?;
        export.validate()?;
        Ok(export)
    }

    /// Check referential integrity of the snapshot
    pub fn validate(&self) -> Result<()> {
        if self.version != EXPORT_VERSION {
            return Err(KgidError::ValidationError(format!(
                "unsupported export version {}",
                self.version
            )));
        }

        let entity_ids: HashSet<Uuid> = self.entities.iter().map(|e| e.id).collect();
        if entity_ids.len() != self.entities.len() {
            return Err(KgidError::ValidationError(
                "duplicate entity ids in export".to_string(),
            ));
        }

        let mut linked: HashMap<Uuid, u32> = HashMap::new();
        for mention in &self.mentions {
            if let Some(entity_id) = mention.entity_id {
                if !entity_ids.contains(&entity_id) {
                    return Err(KgidError::ValidationError(format!(
                        "mention {} links to unknown entity {entity_id}",
                        mention.id
                    )));
                }
                *linked.entry(entity_id).or_default() += 1;
            }
        }

        for entity in &self.entities {
            let count = linked.get(&entity.id).copied().unwrap_or_default();
            if count != entity.mention_count {
                return Err(KgidError::ValidationError(format!(
                    "entity {} reports {} mentions but {count} are linked",
                    entity.id, entity.mention_count
                )));
            }
        }

        for relationship in &self.relationships {
            for endpoint in [relationship.source_id, relationship.target_id] {
                if !entity_ids.contains(&endpoint) {
                    return Err(KgidError::ValidationError(format!(
                        "relationship {} references unknown entity {endpoint}",
                        relationship.id
                    )));
                }
            }
        }

        for operation in &self.operations {
            operation.validate()?;
        }

        Ok(())
    }
}
