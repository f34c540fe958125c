//! Entity resolution: map extracted entity mentions to canonical entity
//! ids. Exact alias/name matches first, embedding similarity second, new
//! entity insert last. Close matches fold their mention in as an alias.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use kurt_common::embedding::{bytes_to_embedding, cosine_similarity, embedding_to_bytes, TextEmbedder};
use kurt_runtime::{ItemError, RuntimeError, StepContext, Tool, ToolResult};
use kurt_store::{EntityStore, StagingStore};

/// Similarity above which a mention resolves to an existing entity.
const ENTITY_SIMILARITY_THRESHOLD: f32 = 0.90;

/// One mention aggregated across sections.
#[derive(Debug, Clone)]
struct Mention {
    name: String,
    entity_type: String,
    description: Option<String>,
    occurrences: usize,
}

pub struct EntityResolutionTool {
    staging: StagingStore,
    entities: EntityStore,
    embedder: Arc<dyn TextEmbedder>,
}

impl EntityResolutionTool {
    pub fn new(staging: StagingStore, entities: EntityStore, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            staging,
            entities,
            embedder,
        }
    }

    /// Resolve one mention. Returns (entity_id, action).
    async fn resolve_mention(
        &self,
        mention: &Mention,
        embedding: Option<&[f32]>,
        existing_with_embeddings: &[(String, Vec<f32>)],
    ) -> Result<(String, &'static str), RuntimeError> {
        // 1. Exact name or alias match.
        if let Some(existing) = self
            .entities
            .find_by_name_or_alias(&mention.name, &mention.entity_type)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?
        {
            return Ok((existing.id, "matched"));
        }

        // 2. Embedding similarity against existing entities. A close match
        // absorbs the mention as an alias.
        if let Some(embedding) = embedding {
            let mut best: Option<(&String, f32)> = None;
            for (entity_id, existing_embedding) in existing_with_embeddings {
                let similarity = cosine_similarity(embedding, existing_embedding);
                if similarity >= ENTITY_SIMILARITY_THRESHOLD
                    && best.map(|(_, s)| similarity > s).unwrap_or(true)
                {
                    best = Some((entity_id, similarity));
                }
            }
            if let Some((entity_id, _)) = best {
                match self
                    .entities
                    .merge_aliases(
                        entity_id,
                        &[mention.name.clone()],
                        mention.description.as_deref(),
                    )
                    .await
                {
                    Ok(row) => return Ok((row.id, "merged")),
                    Err(e) => {
                        // Version conflicts exhaust their retries inside the
                        // store; this fails the entity, not the workflow.
                        warn!(entity_id, error = %e, "alias merge failed");
                        return Ok((entity_id.clone(), "matched"));
                    }
                }
            }
        }

        // 3. New entity.
        let row = self
            .entities
            .insert(
                &mention.name,
                &mention.entity_type,
                mention.description.as_deref(),
                &[],
                embedding.map(embedding_to_bytes).as_deref(),
            )
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;
        Ok((row.id, "created"))
    }
}

#[async_trait]
impl Tool for EntityResolutionTool {
    fn name(&self) -> &str {
        "entity-resolution"
    }

    async fn run(
        &self,
        _input_data: Vec<serde_json::Value>,
        _config: &serde_json::Value,
        ctx: &StepContext,
    ) -> Result<ToolResult, RuntimeError> {
        ctx.set_event("stage", json!("resolving_entities")).await;

        let extractions = self
            .staging
            .section_extractions_for_workflow(&ctx.run_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;

        // Aggregate mentions by name; first-seen type and description win.
        let mut mentions: BTreeMap<String, Mention> = BTreeMap::new();
        for row in &extractions {
            let entities: Vec<serde_json::Value> = row
                .entities
                .as_array()
                .cloned()
                .unwrap_or_default();
            for entity in entities {
                let Some(name) = entity.get("name").and_then(|v| v.as_str()) else { continue };
                if name.trim().is_empty() {
                    continue;
                }
                let entry = mentions.entry(name.to_string()).or_insert_with(|| Mention {
                    name: name.to_string(),
                    entity_type: entity
                        .get("entity_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Other")
                        .to_string(),
                    description: entity
                        .get("description")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    occurrences: 0,
                });
                entry.occurrences += 1;
            }
        }

        if mentions.is_empty() {
            ctx.log("No entity mentions to resolve").await;
            return Ok(ToolResult {
                output_data: vec![json!({ "mentions": 0, "created": 0, "merged": 0 })],
                errors: vec![],
                metadata: json!({}),
            });
        }

        ctx.log(&format!("Resolving {} entity mention(s)", mentions.len())).await;
        ctx.set_event("stage_total", json!(mentions.len())).await;

        // Embed all mention names in one batch when a provider is present.
        let names: Vec<String> = mentions.keys().cloned().collect();
        let embeddings: Option<Vec<Vec<f32>>> = if self.embedder.is_available() {
            match self.embedder.embed_batch(names.clone()).await {
                Ok(vectors) if vectors.len() == names.len() => Some(vectors),
                _ => None,
            }
        } else {
            None
        };

        let existing_with_embeddings: Vec<(String, Vec<f32>)> = self
            .entities
            .all_with_embeddings()
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?
            .into_iter()
            .filter_map(|row| {
                row.embedding
                    .as_deref()
                    .map(|bytes| (row.id.clone(), bytes_to_embedding(bytes)))
            })
            .collect();

        let mut created = 0usize;
        let mut merged = 0usize;
        let mut matched = 0usize;
        let mut errors = vec![];

        for (idx, name) in names.iter().enumerate() {
            ctx.set_event("stage_current", json!(idx + 1)).await;
            let mention = &mentions[name];
            let embedding = embeddings.as_ref().map(|v| v[idx].as_slice());

            match self
                .resolve_mention(mention, embedding, &existing_with_embeddings)
                .await
            {
                Ok((entity_id, action)) => {
                    match action {
                        "created" => created += 1,
                        "merged" => merged += 1,
                        _ => matched += 1,
                    }
                    self.staging
                        .record_entity_resolution(&ctx.run_id, name, &entity_id, action)
                        .await
                        .map_err(|e| RuntimeError::State(e.to_string()))?;
                    ctx.progress(idx, names.len(), "success", name, None).await;
                }
                Err(e) => {
                    errors.push(ItemError::new(name, "entity_resolution", e.to_string()));
                    ctx.progress(idx, names.len(), "error", name, Some(&e.to_string())).await;
                }
            }
        }

        info!(mentions = names.len(), created, merged, matched, "entity resolution done");
        Ok(ToolResult {
            output_data: vec![json!({
                "mentions": names.len(),
                "created": created,
                "merged": merged,
                "matched": matched,
            })],
            errors,
            metadata: json!({ "created": created }),
        })
    }
}
