//! Identity resolution service
//!
//! Three-level identity: surface form → mention → entity. Each registry
//! (mentions, entities, relationships) sits behind its own lock, held for a
//! single call only. When more than one registry is touched the locks are
//! always taken in the order mentions → entities → relationships.
//!
//! Entity resolution matches and creates inside one critical section on the
//! entity registry, so two concurrent resolutions of the same new surface
//! form produce exactly one entity.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::similarity::{ExactMatch, SimilarityPolicy};
use crate::{Entity, KgidError, Mention, Relationship, Result};

/// Trim, collapse internal whitespace and casefold a surface form
pub fn normalize_surface_form(surface_form: &str) -> String {
    surface_form
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Operation results
// ============================================================================

/// Result of `create_mention`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionCreated {
    pub mention_id: Uuid,
    /// Always `None` on creation; linking is a separate step
    pub entity_id: Option<Uuid>,
    pub normalized_form: String,
}

/// Whether resolution reused or created an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    Found,
    Created,
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found => write!(f, "found"),
            Self::Created => write!(f, "created"),
        }
    }
}

/// Result of `find_or_create_entity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResolution {
    pub entity_id: Uuid,
    pub canonical_name: String,
    pub entity_type: String,
    pub action: ResolutionAction,
    /// 1.0 for exact matches and new entities, (0, 1) for fuzzy matches
    pub similarity_score: f32,
    /// Entity confidence at resolution time
    pub confidence: f32,
}

/// Result of `link_mention_to_entity`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked,
    /// The mention was already linked to this same entity
    Unchanged,
}

/// Registry counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityStats {
    pub total_mentions: usize,
    pub linked_mentions: usize,
    pub total_entities: usize,
    pub total_relationships: usize,
    pub unique_surface_forms: usize,
    pub avg_mentions_per_entity: f32,
}

// ============================================================================
// Registries
// ============================================================================

#[derive(Debug, Default)]
struct MentionRegistry {
    by_id: HashMap<Uuid, Mention>,
    order: Vec<Uuid>,
    /// normalized form -> mention ids
    surface_index: HashMap<String, Vec<Uuid>>,
}

impl MentionRegistry {
    fn insert(&mut self, mention: Mention) {
        self.surface_index
            .entry(mention.normalized_form.clone())
            .or_default()
            .push(mention.id);
        self.order.push(mention.id);
        self.by_id.insert(mention.id, mention);
    }
}

#[derive(Debug, Default)]
struct EntityRegistry {
    by_id: HashMap<Uuid, Entity>,
    order: Vec<Uuid>,
    next_sequence: u64,
}

impl EntityRegistry {
    fn insert(&mut self, entity: Entity) {
        self.next_sequence = self.next_sequence.max(entity.sequence + 1);
        self.order.push(entity.id);
        self.by_id.insert(entity.id, entity);
    }
}

#[derive(Debug, Default)]
struct RelationshipRegistry {
    by_id: HashMap<Uuid, Relationship>,
    order: Vec<Uuid>,
}

fn same_type<'a>(
    registry: &'a EntityRegistry,
    entity_type: &'a str,
) -> impl Iterator<Item = &'a Entity> + 'a {
    registry
        .order
        .iter()
        .filter_map(|id| registry.by_id.get(id))
        .filter(move |e| e.entity_type == entity_type)
}

/// Resolution candidate during matching
struct Match<'a> {
    entity: &'a Entity,
    score: f32,
}

/// Higher score, then higher confidence, then earlier creation wins
fn rank(a: &Match<'_>, b: &Match<'_>) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then(a.entity.confidence.total_cmp(&b.entity.confidence))
        .then(b.entity.sequence.cmp(&a.entity.sequence))
}

// ============================================================================
// Identity Service
// ============================================================================

/// Owns the mention, entity and relationship registries
#[derive(Debug)]
pub struct IdentityService {
    mentions: RwLock<MentionRegistry>,
    entities: RwLock<EntityRegistry>,
    relationships: RwLock<RelationshipRegistry>,
    policy: Box<dyn SimilarityPolicy>,
}

impl Default for IdentityService {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityService {
    /// Create a service with exact matching only
    pub fn new() -> Self {
        Self::with_policy(Box::new(ExactMatch))
    }

    /// Create a service with a custom non-exact matching policy
    pub fn with_policy(policy: Box<dyn SimilarityPolicy>) -> Self {
        Self {
            mentions: RwLock::default(),
            entities: RwLock::default(),
            relationships: RwLock::default(),
            policy,
        }
    }

    /// Name of the active similarity policy
    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Create and store a new, unlinked mention
    pub fn create_mention(
        &self,
        surface_form: &str,
        start_pos: usize,
        end_pos: usize,
        source_ref: &str,
        entity_type: &str,
        confidence: f32,
    ) -> Result<MentionCreated> {
        if surface_form.trim().is_empty() {
            return Err(KgidError::ValidationError(
                "surface_form cannot be empty".to_string(),
            ));
        }
        if start_pos >= end_pos {
            return Err(KgidError::ValidationError(format!(
                "invalid span: start_pos {start_pos} must be less than end_pos {end_pos}"
            )));
        }
        if source_ref.trim().is_empty() {
            return Err(KgidError::ValidationError(
                "source_ref is required".to_string(),
            ));
        }
        validate_confidence(confidence)?;

        let normalized_form = normalize_surface_form(surface_form);
        let mention = Mention {
            id: Uuid::new_v4(),
            surface_form: surface_form.to_string(),
            normalized_form: normalized_form.clone(),
            start_pos,
            end_pos,
            source_ref: source_ref.to_string(),
            entity_type: entity_type.to_string(),
            confidence,
            entity_id: None,
            created_at: Utc::now(),
        };
        let mention_id = mention.id;

        self.mentions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mention);

        debug!(%mention_id, normalized = %normalized_form, %source_ref, "Created mention");

        Ok(MentionCreated {
            mention_id,
            entity_id: None,
            normalized_form,
        })
    }

    /// Resolve a surface form to an existing entity of the same type, or create one
    pub fn find_or_create_entity(
        &self,
        mention_text: &str,
        entity_type: &str,
        context: &str,
        confidence: f32,
    ) -> Result<EntityResolution> {
        if mention_text.trim().is_empty() {
            return Err(KgidError::ValidationError(
                "mention_text cannot be empty".to_string(),
            ));
        }
        if entity_type.trim().is_empty() {
            return Err(KgidError::ValidationError(
                "entity_type cannot be empty".to_string(),
            ));
        }
        validate_confidence(confidence)?;

        let normalized = normalize_surface_form(mention_text);

        // Match and create under one write lock
        let mut registry = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let exact = same_type(&registry, entity_type)
            .filter(|e| e.answers_to(&normalized))
            .map(|entity| Match { entity, score: 1.0 })
            .max_by(rank);

        let best = exact.or_else(|| {
            same_type(&registry, entity_type)
                .filter_map(|entity| {
                    entity
                        .aliases
                        .iter()
                        .chain(std::iter::once(&entity.normalized_name))
                        .filter_map(|known| self.policy.similarity(&normalized, known))
                        .max_by(f32::total_cmp)
                        .map(|score| Match { entity, score })
                })
                .max_by(rank)
        });

        if let Some(Match { entity, score }) = best {
            debug!(
                entity_id = %entity.id,
                similarity = score,
                policy = self.policy.name(),
                "Resolved mention text to existing entity"
            );
            return Ok(EntityResolution {
                entity_id: entity.id,
                canonical_name: entity.canonical_name.clone(),
                entity_type: entity.entity_type.clone(),
                action: ResolutionAction::Found,
                similarity_score: score,
                confidence: entity.confidence,
            });
        }

        let now = Utc::now();
        let mut attributes = HashMap::new();
        if !context.trim().is_empty() {
            attributes.insert("context".to_string(), serde_json::json!(context));
        }
        let entity = Entity {
            id: Uuid::new_v4(),
            canonical_name: mention_text.trim().to_string(),
            normalized_name: normalized.clone(),
            aliases: BTreeSet::from([normalized]),
            entity_type: entity_type.to_string(),
            confidence,
            mention_count: 0,
            attributes,
            sequence: registry.next_sequence,
            created_at: now,
            updated_at: now,
        };
        let resolution = EntityResolution {
            entity_id: entity.id,
            canonical_name: entity.canonical_name.clone(),
            entity_type: entity.entity_type.clone(),
            action: ResolutionAction::Created,
            similarity_score: 1.0,
            confidence,
        };
        registry.insert(entity);

        info!(
            entity_id = %resolution.entity_id,
            canonical_name = %resolution.canonical_name,
            entity_type = %resolution.entity_type,
            "Created entity"
        );
        Ok(resolution)
    }

    /// Set a mention's entity link exactly once
    pub fn link_mention_to_entity(&self, mention_id: Uuid, entity_id: Uuid) -> Result<LinkOutcome> {
        let mut mentions = self
            .mentions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mention = mentions
            .by_id
            .get_mut(&mention_id)
            .ok_or_else(|| KgidError::NotFound(format!("mention {mention_id}")))?;
        let entity = entities
            .by_id
            .get_mut(&entity_id)
            .ok_or_else(|| KgidError::NotFound(format!("entity {entity_id}")))?;

        match mention.entity_id {
            Some(existing) if existing == entity_id => Ok(LinkOutcome::Unchanged),
            Some(existing) => Err(KgidError::AlreadyLinked {
                mention_id,
                entity_id: existing,
            }),
            None => {
                mention.entity_id = Some(entity_id);
                entity.aliases.insert(mention.normalized_form.clone());
                entity.absorb_mention(mention.confidence);
                debug!(%mention_id, %entity_id, "Linked mention");
                Ok(LinkOutcome::Linked)
            }
        }
    }

    /// Merge new attribute evidence into an entity
    pub fn merge_entity_attributes(
        &self,
        entity_id: Uuid,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Result<Entity> {
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entity = entities
            .by_id
            .get_mut(&entity_id)
            .ok_or_else(|| KgidError::NotFound(format!("entity {entity_id}")))?;
        entity.merge_attributes(attributes);
        Ok(entity.clone())
    }

    /// Store a relationship between two existing entities
    pub fn add_relationship(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        relationship_type: &str,
        confidence: f32,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Result<Relationship> {
        if relationship_type.trim().is_empty() {
            return Err(KgidError::ValidationError(
                "relationship_type cannot be empty".to_string(),
            ));
        }
        validate_confidence(confidence)?;

        let entities = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for endpoint in [source_id, target_id] {
            if !entities.by_id.contains_key(&endpoint) {
                return Err(KgidError::NotFound(format!("entity {endpoint}")));
            }
        }

        let relationship = Relationship {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            relationship_type: relationship_type.to_string(),
            confidence,
            attributes,
            created_at: Utc::now(),
        };

        let mut relationships = self
            .relationships
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        relationships.order.push(relationship.id);
        relationships
            .by_id
            .insert(relationship.id, relationship.clone());

        debug!(
            relationship_id = %relationship.id,
            %source_id,
            %target_id,
            relationship_type,
            "Added relationship"
        );
        Ok(relationship)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Get a mention by ID
    pub fn get_mention(&self, mention_id: Uuid) -> Option<Mention> {
        self.mentions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&mention_id)
            .cloned()
    }

    /// Get an entity by ID
    pub fn get_entity(&self, entity_id: Uuid) -> Option<Entity> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&entity_id)
            .cloned()
    }

    /// Entity a mention resolved to, if linked
    pub fn entity_for_mention(&self, mention_id: Uuid) -> Option<Entity> {
        let entity_id = self.get_mention(mention_id)?.entity_id?;
        self.get_entity(entity_id)
    }

    /// All mentions linked to an entity, in creation order
    pub fn mentions_for_entity(&self, entity_id: Uuid) -> Vec<Mention> {
        let mentions = self
            .mentions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        mentions
            .order
            .iter()
            .filter_map(|id| mentions.by_id.get(id))
            .filter(|m| m.entity_id == Some(entity_id))
            .cloned()
            .collect()
    }

    /// Mentions sharing a normalized surface form
    pub fn mentions_with_surface(&self, surface_form: &str) -> Vec<Mention> {
        let mentions = self
            .mentions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        mentions
            .surface_index
            .get(&normalize_surface_form(surface_form))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| mentions.by_id.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Relationships where the entity is either endpoint
    pub fn relationships_for_entity(&self, entity_id: Uuid) -> Vec<Relationship> {
        let relationships = self
            .relationships
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        relationships
            .order
            .iter()
            .filter_map(|id| relationships.by_id.get(id))
            .filter(|r| r.source_id == entity_id || r.target_id == entity_id)
            .cloned()
            .collect()
    }

    /// Every mention, in creation order
    pub fn mentions(&self) -> Vec<Mention> {
        let mentions = self
            .mentions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        mentions
            .order
            .iter()
            .filter_map(|id| mentions.by_id.get(id))
            .cloned()
            .collect()
    }

    /// Every entity, in creation order
    pub fn entities(&self) -> Vec<Entity> {
        let entities = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        entities
            .order
            .iter()
            .filter_map(|id| entities.by_id.get(id))
            .cloned()
            .collect()
    }

    /// Every relationship, in creation order
    pub fn relationships(&self) -> Vec<Relationship> {
        let relationships = self
            .relationships
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        relationships
            .order
            .iter()
            .filter_map(|id| relationships.by_id.get(id))
            .cloned()
            .collect()
    }

    /// Registry statistics
    pub fn stats(&self) -> IdentityStats {
        let mentions = self
            .mentions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let entities = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let relationships = self
            .relationships
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let linked_mentions = mentions.by_id.values().filter(|m| m.is_linked()).count();
        let avg_mentions_per_entity = if entities.by_id.is_empty() {
            0.0
        } else {
            linked_mentions as f32 / entities.by_id.len() as f32
        };

        IdentityStats {
            total_mentions: mentions.by_id.len(),
            linked_mentions,
            total_entities: entities.by_id.len(),
            total_relationships: relationships.by_id.len(),
            unique_surface_forms: mentions.surface_index.len(),
            avg_mentions_per_entity,
        }
    }

    /// Rebuild registries from exported records
    ///
    /// Callers are expected to have validated referential integrity first.
    pub(crate) fn restore(
        &self,
        mut entities: Vec<Entity>,
        mentions: Vec<Mention>,
        relationships: Vec<Relationship>,
    ) {
        let mut mention_registry = self
            .mentions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entity_registry = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut relationship_registry = self
            .relationships
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        *mention_registry = MentionRegistry::default();
        *entity_registry = EntityRegistry::default();
        *relationship_registry = RelationshipRegistry::default();

        entities.sort_by_key(|e| e.sequence);
        for entity in entities {
            entity_registry.insert(entity);
        }
        for mention in mentions {
            mention_registry.insert(mention);
        }
        for relationship in relationships {
            relationship_registry.order.push(relationship.id);
            relationship_registry
                .by_id
                .insert(relationship.id, relationship);
        }
    }
}

fn validate_confidence(confidence: f32) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(KgidError::ValidationError(format!(
            "confidence must be between 0.0 and 1.0, got {confidence}"
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::FuzzyMatch;
    use crate::ErrorKind;
    use std::sync::Arc;

    #[test]
    fn test_normalize_surface_form() {
        assert_eq!(normalize_surface_form("  ACME   University \n"), "acme university");
    }

    #[test]
    fn test_create_mention_validation() {
        let service = IdentityService::new();

        let err = service
            .create_mention("   ", 0, 3, "doc://1", "ORG", 0.8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .create_mention("Acme", 4, 4, "doc://1", "ORG", 0.8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .create_mention("Acme", 0, 4, "", "ORG", 0.8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .create_mention("Acme", 0, 4, "doc://1", "ORG", 1.2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(service.stats().total_mentions, 0);
    }

    #[test]
    fn test_create_mention_is_unlinked() {
        let service = IdentityService::new();
        let created = service
            .create_mention(" Acme University ", 10, 27, "doc://1", "ORG", 0.85)
            .unwrap();

        assert_eq!(created.entity_id, None);
        assert_eq!(created.normalized_form, "acme university");

        let mention = service.get_mention(created.mention_id).unwrap();
        assert_eq!(mention.surface_form, " Acme University ");
        assert!(!mention.is_linked());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let service = IdentityService::new();

        let first = service
            .find_or_create_entity("Acme University", "ORG", "", 0.85)
            .unwrap();
        assert_eq!(first.action, ResolutionAction::Created);
        assert_eq!(first.canonical_name, "Acme University");

        let second = service
            .find_or_create_entity("Acme University", "ORG", "", 0.85)
            .unwrap();
        assert_eq!(second.action, ResolutionAction::Found);
        assert_eq!(second.entity_id, first.entity_id);
        assert_eq!(second.similarity_score, 1.0);
        assert_eq!(service.stats().total_entities, 1);
    }

    #[test]
    fn test_resolution_respects_entity_type() {
        let service = IdentityService::new();
        let org = service
            .find_or_create_entity("Jordan", "PERSON", "", 0.8)
            .unwrap();
        let place = service
            .find_or_create_entity("Jordan", "GPE", "", 0.8)
            .unwrap();

        assert_ne!(org.entity_id, place.entity_id);
        assert_eq!(place.action, ResolutionAction::Created);
    }

    #[test]
    fn test_link_mention_once() {
        let service = IdentityService::new();
        let mention = service
            .create_mention("Acme", 0, 4, "doc://1", "ORG", 0.6)
            .unwrap();
        let acme = service.find_or_create_entity("Acme", "ORG", "", 0.9).unwrap();
        let other = service
            .find_or_create_entity("Globex", "ORG", "", 0.9)
            .unwrap();

        assert_eq!(
            service
                .link_mention_to_entity(mention.mention_id, acme.entity_id)
                .unwrap(),
            LinkOutcome::Linked
        );
        assert_eq!(
            service
                .link_mention_to_entity(mention.mention_id, acme.entity_id)
                .unwrap(),
            LinkOutcome::Unchanged
        );

        let err = service
            .link_mention_to_entity(mention.mention_id, other.entity_id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyLinked);

        // Unchanged link must not fold confidence twice
        let entity = service.get_entity(acme.entity_id).unwrap();
        assert_eq!(entity.mention_count, 1);
        assert!((entity.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_link_unknown_ids() {
        let service = IdentityService::new();
        let mention = service
            .create_mention("Acme", 0, 4, "doc://1", "ORG", 0.6)
            .unwrap();

        let err = service
            .link_mention_to_entity(mention.mention_id, Uuid::new_v4())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let entity = service.find_or_create_entity("Acme", "ORG", "", 0.9).unwrap();
        let err = service
            .link_mention_to_entity(Uuid::new_v4(), entity.entity_id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_tie_break_prefers_confidence_then_age() {
        let service = IdentityService::with_policy(Box::new(FuzzyMatch::new(0.5)));

        let older = service
            .find_or_create_entity("red acme", "ORG", "", 0.7)
            .unwrap();
        let newer = service
            .find_or_create_entity("acme blue", "ORG", "", 0.7)
            .unwrap();
        assert_eq!(newer.action, ResolutionAction::Created);

        // "acme" scores 0.5 against both; equal confidence -> earliest wins
        let resolved = service.find_or_create_entity("acme", "ORG", "", 0.7).unwrap();
        assert_eq!(resolved.action, ResolutionAction::Found);
        assert_eq!(resolved.entity_id, older.entity_id);
        assert!(resolved.similarity_score < 1.0);

        // Raise the newer entity's confidence; it now wins the tie
        let mention = service
            .create_mention("acme blue", 0, 9, "doc://2", "ORG", 1.0)
            .unwrap();
        service
            .link_mention_to_entity(mention.mention_id, newer.entity_id)
            .unwrap();

        let resolved = service.find_or_create_entity("acme", "ORG", "", 0.7).unwrap();
        assert_eq!(resolved.entity_id, newer.entity_id);
    }

    #[test]
    fn test_linked_alias_becomes_exact() {
        let service = IdentityService::with_policy(Box::new(FuzzyMatch::new(0.85)));
        let target = service
            .find_or_create_entity("acme universty", "ORG", "", 0.9)
            .unwrap();

        let fuzzy = service
            .find_or_create_entity("Acme University", "ORG", "", 0.9)
            .unwrap();
        assert_eq!(fuzzy.entity_id, target.entity_id);
        assert!(fuzzy.similarity_score < 1.0);

        let mention = service
            .create_mention("Acme University", 0, 15, "doc://1", "ORG", 0.9)
            .unwrap();
        service
            .link_mention_to_entity(mention.mention_id, target.entity_id)
            .unwrap();

        let exact = service
            .find_or_create_entity("ACME UNIVERSITY", "ORG", "", 0.9)
            .unwrap();
        assert_eq!(exact.entity_id, target.entity_id);
        assert_eq!(exact.similarity_score, 1.0);
    }

    #[test]
    fn test_relationship_requires_endpoints() {
        let service = IdentityService::new();
        let smith = service
            .find_or_create_entity("Dr. Smith", "PERSON", "", 0.85)
            .unwrap();

        let err = service
            .add_relationship(smith.entity_id, Uuid::new_v4(), "worksAt", 0.8, HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(service.relationships().is_empty());

        let acme = service
            .find_or_create_entity("Acme University", "ORG", "", 0.85)
            .unwrap();
        let rel = service
            .add_relationship(smith.entity_id, acme.entity_id, "worksAt", 0.8, HashMap::new())
            .unwrap();
        assert!(!rel.is_self_loop());
        assert_eq!(service.relationships_for_entity(acme.entity_id).len(), 1);
    }

    #[test]
    fn test_concurrent_resolution_creates_one_entity() {
        let service = Arc::new(IdentityService::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    let text = if i % 2 == 0 { "Acme University" } else { "ACME UNIVERSITY" };
                    service
                        .find_or_create_entity(text, "ORG", "", 0.8)
                        .unwrap()
                        .entity_id
                })
            })
            .collect();

        let ids: BTreeSet<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(service.stats().total_entities, 1);
    }

    #[test]
    fn test_mentions_for_entity_and_stats() {
        let service = IdentityService::new();
        let entity = service.find_or_create_entity("Acme", "ORG", "", 0.8).unwrap();
        for (i, source) in ["doc://1", "doc://2"].iter().enumerate() {
            let m = service
                .create_mention("ACME", i, i + 4, source, "ORG", 0.8)
                .unwrap();
            service
                .link_mention_to_entity(m.mention_id, entity.entity_id)
                .unwrap();
        }
        service
            .create_mention("Globex", 0, 6, "doc://3", "ORG", 0.8)
            .unwrap();

        assert_eq!(service.mentions_for_entity(entity.entity_id).len(), 2);
        assert_eq!(service.mentions_with_surface("acme").len(), 2);

        let stats = service.stats();
        assert_eq!(stats.total_mentions, 3);
        assert_eq!(stats.linked_mentions, 2);
        assert_eq!(stats.unique_surface_forms, 2);
        assert_eq!(stats.avg_mentions_per_entity, 2.0);
    }
}
