//! Entity embeddings
//!
//! A provider turns a short entity description into a vector. When the
//! provider fails, a zero vector is attached instead and tagged
//! `embedding_synthetic = true` so downstream consumers can filter it out.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::warn;

/// Attribute holding the vector
pub const EMBEDDING_KEY: &str = "embedding";
/// Attribute naming the model (or "synthetic")
pub const EMBEDDING_MODEL_KEY: &str = "embedding_model";
/// Attribute holding the embedded description
pub const EMBEDDING_CONTEXT_KEY: &str = "embedding_context";
/// Attribute flagging placeholder vectors
pub const EMBEDDING_SYNTHETIC_KEY: &str = "embedding_synthetic";

/// Source of entity embeddings
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded with the vector
    fn model(&self) -> &str;

    /// Vector length, also used for placeholders
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Description embedded for an entity
pub fn embedding_context(
    entity_type: &str,
    canonical_name: &str,
    type_description: Option<&str>,
) -> String {
    match type_description.filter(|d| !d.trim().is_empty()) {
        Some(description) => format!("{entity_type}: {canonical_name} - {description}"),
        None => format!("{entity_type}: {canonical_name}"),
    }
}

/// Entity attributes carrying an embedding, falling back to a tagged placeholder
pub fn embedding_attributes(
    provider: &dyn EmbeddingProvider,
    context: &str,
) -> HashMap<String, Value> {
    let mut attributes = HashMap::from([(EMBEDDING_CONTEXT_KEY.to_string(), json!(context))]);

    match provider.embed(context) {
        Ok(vector) => {
            attributes.insert(EMBEDDING_KEY.to_string(), json!(vector));
            attributes.insert(EMBEDDING_MODEL_KEY.to_string(), json!(provider.model()));
            attributes.insert(EMBEDDING_SYNTHETIC_KEY.to_string(), json!(false));
        }
        Err(e) => {
            warn!(model = provider.model(), error = %e, "Embedding failed, attaching placeholder");
            attributes.insert(
                EMBEDDING_KEY.to_string(),
                json!(vec![0.0f32; provider.dimension()]),
            );
            attributes.insert(EMBEDDING_MODEL_KEY.to_string(), json!("synthetic"));
            attributes.insert(EMBEDDING_SYNTHETIC_KEY.to_string(), json!(true));
            attributes.insert("embedding_error".to_string(), json!(e.to_string()));
        }
    }

    attributes
}
