//! Claim resolution: turn clustering decisions into persisted claims and
//! entity links, with a per-occurrence disposition row.
//!
//! The counting contract matters here: `created` reflects actual database
//! inserts. A CREATE_NEW occurrence without entity linkage becomes
//! `skipped` — claims without an entity anchor are never persisted.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use kurt_common::text::truncate_chars;
use kurt_runtime::{RuntimeError, StepContext, Tool, ToolResult};
use kurt_store::rows::{ClaimGroupRow, InsertClaim};
use kurt_store::staging::InsertClaimResolution;
use kurt_store::{ClaimStore, DocumentStore, StagingStore};

use crate::claim_clustering::Decision;

/// Tracking-row statements are capped shorter than claim_groups rows.
const TRACKING_STATEMENT_CAP: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResolutionStats {
    pub claims_processed: usize,
    pub clusters_created: usize,
    pub created: usize,
    pub merged: usize,
    pub deduplicated: usize,
    pub skipped: usize,
    pub rows_written: u64,
}

/// Map a claim's entity indices to resolved entity ids via the section's
/// local entities list and this workflow's entity_resolution rows.
/// Unresolvable indices and names drop out.
pub fn resolve_entity_indices(
    entity_indices: &[usize],
    section_entities: &[String],
    entity_name_to_id: &HashMap<String, String>,
) -> Vec<String> {
    entity_indices
        .iter()
        .filter_map(|&index| section_entities.get(index))
        .filter_map(|name| entity_name_to_id.get(name.as_str()))
        .cloned()
        .collect()
}

/// Extract each section's entity-name list from section extraction rows.
pub fn build_section_entity_lists(
    rows: &[(String, serde_json::Value)],
) -> BTreeMap<String, Vec<String>> {
    let mut lists = BTreeMap::new();
    for (section_id, entities_json) in rows {
        let parsed: Vec<serde_json::Value> = match entities_json {
            serde_json::Value::Array(items) => items.clone(),
            serde_json::Value::String(raw) => serde_json::from_str(raw).unwrap_or_default(),
            _ => vec![],
        };
        let names: Vec<String> = parsed
            .iter()
            .filter_map(|e| e.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()))
            .collect();
        lists.insert(section_id.clone(), names);
    }
    lists
}

pub struct ClaimResolutionTool {
    staging: StagingStore,
    claims: ClaimStore,
    documents: DocumentStore,
}

impl ClaimResolutionTool {
    pub fn new(staging: StagingStore, claims: ClaimStore, documents: DocumentStore) -> Self {
        Self {
            staging,
            claims,
            documents,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_row(
        &self,
        group: &ClaimGroupRow,
        linked_entity_ids: Vec<String>,
        resolved_in_workflow: &mut HashMap<String, String>,
        stats: &mut ResolutionStats,
    ) -> Result<InsertClaimResolution, RuntimeError> {
        let decision: Decision = group
            .decision
            .parse()
            .map_err(|e: String| RuntimeError::State(e))?;
        let subject_entity_id = linked_entity_ids.first().cloned();

        let mut resolution_action = String::new();
        let mut resolved_claim_id: Option<String> = None;
        let mut metadata = serde_json::Map::new();

        // MERGE_WITH against a vanished claim degrades to CREATE_NEW; the
        // degradation is recorded so the audit trail survives. The degraded
        // create uses the occurrence's own statement — the canonical one
        // belonged to the vanished claim.
        let mut effective_decision = decision.clone();
        let mut degraded = false;
        if let Decision::MergeWith(existing_hash) = &decision {
            let existing = self
                .claims
                .get_by_hash(existing_hash)
                .await
                .map_err(|e| RuntimeError::State(e.to_string()))?;
            match existing {
                Some(existing_claim) => {
                    if !linked_entity_ids.is_empty() {
                        self.claims
                            .link_entities(&existing_claim.id, &linked_entity_ids)
                            .await
                            .map_err(|e| RuntimeError::State(e.to_string()))?;
                    }
                    resolution_action = "merged".to_string();
                    resolved_claim_id = Some(existing_claim.id.clone());
                    resolved_in_workflow
                        .insert(group.claim_hash.clone(), existing_claim.id);
                    stats.merged += 1;
                }
                None => {
                    warn!(existing_hash, "merge target vanished, degrading to create");
                    metadata.insert("degraded_from".to_string(), json!(decision.to_string()));
                    effective_decision = Decision::CreateNew;
                    degraded = true;
                }
            }
        }

        match &effective_decision {
            Decision::CreateNew => {
                match subject_entity_id {
                    Some(subject) => {
                        let statement = if degraded {
                            group.statement.clone()
                        } else {
                            group
                                .canonical_statement
                                .clone()
                                .unwrap_or_else(|| group.statement.clone())
                        };
                        let inserted = self
                            .claims
                            .insert(InsertClaim {
                                claim_hash: group.claim_hash.clone(),
                                statement,
                                claim_type: group.claim_type.clone(),
                                confidence: group.confidence,
                                subject_entity_id: subject,
                                source_quote: group.source_quote.clone(),
                                document_id: group.document_id.clone(),
                                section_id: group.section_id.clone(),
                                workflow_id: group.workflow_id.clone(),
                                embedding: group.embedding.clone(),
                            })
                            .await
                            .map_err(|e| RuntimeError::State(e.to_string()))?;

                        if !linked_entity_ids.is_empty() {
                            self.claims
                                .link_entities(&inserted.id, &linked_entity_ids)
                                .await
                                .map_err(|e| RuntimeError::State(e.to_string()))?;
                        }

                        resolution_action = "created".to_string();
                        resolved_claim_id = Some(inserted.id.clone());
                        resolved_in_workflow.insert(group.claim_hash.clone(), inserted.id);
                        stats.created += 1;
                    }
                    None => {
                        // No entity anchorage: the claim is not persisted.
                        resolution_action = "skipped".to_string();
                        stats.skipped += 1;
                    }
                }
            }
            Decision::DuplicateOf(canonical_hash) => {
                resolution_action = "deduplicated".to_string();
                resolved_claim_id = resolved_in_workflow.get(canonical_hash).cloned();
                stats.deduplicated += 1;
            }
            Decision::MergeWith(_) => {
                // Handled above; reaching here means the merge succeeded.
            }
        }

        Ok(InsertClaimResolution {
            workflow_id: group.workflow_id.clone(),
            claim_hash: group.claim_hash.clone(),
            document_id: group.document_id.clone(),
            section_id: group.section_id.clone(),
            statement: truncate_chars(&group.statement, TRACKING_STATEMENT_CAP),
            claim_type: group.claim_type.clone(),
            confidence: group.confidence,
            decision: group.decision.clone(),
            canonical_statement: group.canonical_statement.clone(),
            resolved_claim_id,
            resolution_action,
            linked_entity_ids: json!(linked_entity_ids),
            metadata: serde_json::Value::Object(metadata),
        })
    }
}

#[async_trait]
impl Tool for ClaimResolutionTool {
    fn name(&self) -> &str {
        "claim-resolution"
    }

    async fn run(
        &self,
        _input_data: Vec<serde_json::Value>,
        _config: &serde_json::Value,
        ctx: &StepContext,
    ) -> Result<ToolResult, RuntimeError> {
        ctx.set_event("stage", json!("resolving_claims")).await;

        let groups = self
            .staging
            .claim_groups_for_workflow(&ctx.run_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;

        if groups.is_empty() {
            ctx.log("No claim groups to resolve").await;
            return Ok(ToolResult {
                output_data: vec![serde_json::to_value(ResolutionStats::default())
                    .unwrap_or(json!({}))],
                errors: vec![],
                metadata: json!({}),
            });
        }

        // Index maps: entity name → id from this workflow's entity
        // resolution, and section → entity names from section extractions.
        let entity_name_to_id: HashMap<String, String> = self
            .staging
            .entity_resolutions_for_workflow(&ctx.run_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?
            .into_iter()
            .map(|row| (row.entity_name, row.resolved_entity_id))
            .collect();

        let section_rows: Vec<(String, serde_json::Value)> = self
            .staging
            .section_extractions_for_workflow(&ctx.run_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?
            .into_iter()
            .map(|row| (row.section_id, row.entities))
            .collect();
        let section_entities = build_section_entity_lists(&section_rows);

        let mut stats = ResolutionStats {
            claims_processed: groups.len(),
            clusters_created: {
                let mut ids: Vec<i64> = groups.iter().map(|g| g.cluster_id).collect();
                ids.sort_unstable();
                ids.dedup();
                ids.len()
            },
            ..ResolutionStats::default()
        };

        // Canonicals must resolve before their duplicates reference them;
        // the decision string sorts CREATE_NEW/MERGE_WITH ahead of
        // DUPLICATE_OF within each cluster.
        let mut ordered: Vec<&ClaimGroupRow> = groups.iter().collect();
        ordered.sort_by_key(|g| {
            (
                g.cluster_id,
                matches!(g.decision.parse::<Decision>(), Ok(Decision::DuplicateOf(_))),
            )
        });

        let mut resolved_in_workflow: HashMap<String, String> = HashMap::new();
        let mut rows = vec![];
        let empty: Vec<String> = vec![];

        for group in ordered {
            let names = section_entities.get(&group.section_id).unwrap_or(&empty);
            let linked = resolve_entity_indices(
                &group.entity_index_list(),
                names,
                &entity_name_to_id,
            );
            let row = self
                .resolve_row(group, linked, &mut resolved_in_workflow, &mut stats)
                .await?;
            rows.push(row);
        }

        stats.rows_written = self
            .staging
            .insert_claim_resolutions(&rows)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;

        // Indexing has now processed these documents at their current
        // content hash.
        let mut document_ids: Vec<String> =
            groups.iter().map(|g| g.document_id.clone()).collect();
        document_ids.sort();
        document_ids.dedup();
        for document_id in document_ids {
            if let Ok(doc) = self.documents.get(&document_id).await {
                if let Some(hash) = doc.content_hash.as_deref() {
                    self.documents
                        .set_indexed_with_hash(&document_id, hash)
                        .await
                        .map_err(|e| RuntimeError::State(e.to_string()))?;
                }
            }
        }

        info!(?stats, "claim resolution done");
        ctx.log(&format!(
            "Resolved {} claim(s): {} created, {} merged, {} deduplicated, {} skipped",
            stats.claims_processed, stats.created, stats.merged, stats.deduplicated, stats.skipped
        ))
        .await;

        Ok(ToolResult {
            output_data: vec![serde_json::to_value(&stats).unwrap_or(json!({}))],
            errors: vec![],
            metadata: json!({ "created": stats.created }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_indices_resolve_through_both_maps() {
        let section_entities = vec![
            "Python".to_string(),
            "Guido van Rossum".to_string(),
            "Django".to_string(),
        ];
        let mut name_to_id = HashMap::new();
        name_to_id.insert("Python".to_string(), "id-python".to_string());
        name_to_id.insert("Django".to_string(), "id-django".to_string());

        // Index 1 resolves to a name with no entity id; it drops out.
        let linked = resolve_entity_indices(&[0, 1, 2], &section_entities, &name_to_id);
        assert_eq!(linked, vec!["id-python".to_string(), "id-django".to_string()]);
    }

    #[test]
    fn out_of_range_indices_drop_out() {
        let section_entities = vec!["Python".to_string()];
        let mut name_to_id = HashMap::new();
        name_to_id.insert("Python".to_string(), "id-python".to_string());

        let linked = resolve_entity_indices(&[0, 7], &section_entities, &name_to_id);
        assert_eq!(linked, vec!["id-python".to_string()]);
    }

    #[test]
    fn no_linkage_is_empty() {
        let linked = resolve_entity_indices(&[0, 1], &[], &HashMap::new());
        assert!(linked.is_empty());
    }

    #[test]
    fn section_entity_lists_from_json_and_strings() {
        let rows = vec![
            (
                "sec1".to_string(),
                json!([{"name": "Python", "entity_type": "Technology"}]),
            ),
            (
                "sec2".to_string(),
                json!(r#"[{"name": "Django", "entity_type": "Technology"}]"#),
            ),
            ("sec3".to_string(), serde_json::Value::Null),
        ];
        let lists = build_section_entity_lists(&rows);
        assert_eq!(lists["sec1"], vec!["Python".to_string()]);
        assert_eq!(lists["sec2"], vec!["Django".to_string()]);
        assert!(lists["sec3"].is_empty());
    }
}
