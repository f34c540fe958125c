//! Claim clustering: deduplicate semantically similar claims across
//! documents with embedding similarity, and decide per occurrence whether it
//! creates a new claim, merges into an existing one, or duplicates another
//! occurrence in its cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use kurt_common::embedding::{bytes_to_embedding, cosine_similarity, embedding_to_bytes, TextEmbedder};
use kurt_common::text::{claim_hash, normalize_statement, truncate_chars};
use kurt_common::types::ClaimType;
use kurt_runtime::{RuntimeError, StepContext, Tool, ToolResult};
use kurt_store::staging::InsertClaimGroup;
use kurt_store::{ClaimStore, StagingStore};

/// Cosine similarity above which two claim statements belong to the same
/// cluster, and a cluster merges into an existing claim.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.88;

/// Prefix length for the non-semantic fallback clustering.
const FALLBACK_PREFIX_CHARS: usize = 100;

/// claim_groups statements are capped; the canonical statement elsewhere is
/// full length.
const STATEMENT_CAP: usize = 1000;

/// One claim occurrence collected from section extractions.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedClaim {
    pub claim_hash: String,
    pub statement: String,
    pub claim_type: ClaimType,
    pub confidence: f32,
    pub source_quote: Option<String>,
    pub document_id: String,
    pub section_id: String,
    /// Indices into the section's local entities list, preserved verbatim.
    pub entity_indices: Vec<usize>,
}

/// The clustering decision for one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    CreateNew,
    MergeWith(String),
    DuplicateOf(String),
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::CreateNew => write!(f, "CREATE_NEW"),
            Decision::MergeWith(hash) => write!(f, "MERGE_WITH:{hash}"),
            Decision::DuplicateOf(hash) => write!(f, "DUPLICATE_OF:{hash}"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "CREATE_NEW" {
            Ok(Decision::CreateNew)
        } else if let Some(hash) = s.strip_prefix("MERGE_WITH:") {
            Ok(Decision::MergeWith(hash.to_string()))
        } else if let Some(hash) = s.strip_prefix("DUPLICATE_OF:") {
            Ok(Decision::DuplicateOf(hash.to_string()))
        } else {
            Err(format!("unknown decision: {s}"))
        }
    }
}

/// An existing persisted claim similar to a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarExisting {
    pub claim_hash: String,
    pub statement: String,
}

/// A cluster ready for decision assignment.
#[derive(Debug, Clone)]
pub struct ClusterTask {
    pub cluster_id: i64,
    /// Indices into the collected claims list.
    pub members: Vec<usize>,
    pub similar_existing: Vec<SimilarExisting>,
}

/// A resolved occurrence: claim index + its decision.
#[derive(Debug, Clone)]
pub struct ClaimDecision {
    pub claim_index: usize,
    pub cluster_id: i64,
    pub cluster_size: usize,
    pub decision: Decision,
    pub canonical_statement: String,
    pub similar_existing: Vec<SimilarExisting>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ClusteringStats {
    pub claims_processed: usize,
    pub clusters_created: usize,
    pub rows_written: u64,
}

/// Collect claims from section extraction rows. Empty statements are
/// skipped; invalid claim types default to `definition`; entity indices are
/// preserved verbatim.
pub fn collect_claims(
    extractions: &[(String, String, serde_json::Value)],
) -> Vec<CollectedClaim> {
    let mut claims = vec![];

    for (document_id, section_id, claims_json) in extractions {
        let parsed: Vec<serde_json::Value> = match claims_json {
            serde_json::Value::Array(items) => items.clone(),
            serde_json::Value::String(raw) => {
                serde_json::from_str(raw).unwrap_or_default()
            }
            _ => vec![],
        };

        for item in parsed {
            let statement = item
                .get("statement")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if statement.is_empty() {
                continue;
            }

            let claim_type = item
                .get("claim_type")
                .and_then(|v| v.as_str())
                .map(ClaimType::parse_or_default)
                .unwrap_or_default();

            let confidence = item
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0) as f32;

            let entity_indices: Vec<usize> = item
                .get("entity_indices")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_u64().map(|n| n as usize))
                        .collect()
                })
                .unwrap_or_default();

            claims.push(CollectedClaim {
                claim_hash: claim_hash(&statement, &claim_type.to_string(), document_id),
                statement,
                claim_type,
                confidence,
                source_quote: item
                    .get("source_quote")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                document_id: document_id.clone(),
                section_id: section_id.clone(),
                entity_indices,
            });
        }
    }

    claims
}

/// Single-link agglomerative clustering over pairwise cosine similarity.
/// Identical statements always cluster (identical embeddings).
pub fn cluster_by_similarity(
    claims: &[CollectedClaim],
    embeddings: &[Vec<f32>],
    threshold: f32,
) -> Vec<Vec<usize>> {
    let n = claims.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if cosine_similarity(&embeddings[i], &embeddings[j]) >= threshold {
                let root_i = find(&mut parent, i);
                let root_j = find(&mut parent, j);
                if root_i != root_j {
                    parent[root_j] = root_i;
                }
            }
        }
    }

    let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(i);
    }
    clusters.into_values().collect()
}

/// Fallback clustering when no embedding provider is available: group by
/// normalized 100-character statement prefix. Loses semantic coverage but
/// stays deterministic.
pub fn cluster_by_text_prefix(claims: &[CollectedClaim]) -> Vec<Vec<usize>> {
    let mut clusters: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, claim) in claims.iter().enumerate() {
        let normalized = normalize_statement(&claim.statement);
        let prefix: String = normalized.chars().take(FALLBACK_PREFIX_CHARS).collect();
        clusters.entry(prefix).or_default().push(i);
    }
    clusters.into_values().collect()
}

/// Find existing persisted claims whose embedding is similar to any member
/// of the cluster.
pub fn find_similar_existing(
    member_embeddings: &[&[f32]],
    existing: &[(String, String, Vec<f32>)],
    threshold: f32,
) -> Vec<SimilarExisting> {
    let mut similar = vec![];
    for (hash, statement, embedding) in existing {
        let is_similar = member_embeddings
            .iter()
            .any(|member| cosine_similarity(member, embedding) >= threshold);
        if is_similar {
            similar.push(SimilarExisting {
                claim_hash: hash.clone(),
                statement: statement.clone(),
            });
        }
    }
    similar
}

/// Assign a decision to every occurrence in every cluster.
///
/// Within a cluster, occurrences order by confidence descending with a
/// deterministic claim_hash tie-break. A cluster with similar existing
/// claims merges entirely into the first of them; otherwise the head
/// occurrence creates the claim and the rest duplicate it.
pub fn resolve_claim_clusters(
    claims: &[CollectedClaim],
    tasks: &[ClusterTask],
) -> Vec<ClaimDecision> {
    let mut decisions = vec![];

    for task in tasks {
        let mut ordered = task.members.clone();
        ordered.sort_by(|&a, &b| {
            claims[b]
                .confidence
                .partial_cmp(&claims[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| claims[a].claim_hash.cmp(&claims[b].claim_hash))
        });

        let cluster_size = ordered.len();

        if let Some(first_existing) = task.similar_existing.first() {
            // The entire cluster merges with the existing claim; its
            // statement is canonical.
            for &claim_index in &ordered {
                decisions.push(ClaimDecision {
                    claim_index,
                    cluster_id: task.cluster_id,
                    cluster_size,
                    decision: Decision::MergeWith(first_existing.claim_hash.clone()),
                    canonical_statement: first_existing.statement.clone(),
                    similar_existing: task.similar_existing.clone(),
                });
            }
            continue;
        }

        let head = ordered[0];
        let canonical_statement = claims[head].statement.clone();
        let canonical_hash = claims[head].claim_hash.clone();

        decisions.push(ClaimDecision {
            claim_index: head,
            cluster_id: task.cluster_id,
            cluster_size,
            decision: Decision::CreateNew,
            canonical_statement: canonical_statement.clone(),
            similar_existing: vec![],
        });

        for &claim_index in ordered.iter().skip(1) {
            decisions.push(ClaimDecision {
                claim_index,
                cluster_id: task.cluster_id,
                cluster_size,
                decision: Decision::DuplicateOf(canonical_hash.clone()),
                canonical_statement: canonical_statement.clone(),
                similar_existing: vec![],
            });
        }
    }

    decisions
}

/// Runtime tool for the claim clustering step.
pub struct ClaimClusteringTool {
    staging: StagingStore,
    claims: ClaimStore,
    embedder: Arc<dyn TextEmbedder>,
    threshold: f32,
}

impl ClaimClusteringTool {
    pub fn new(staging: StagingStore, claims: ClaimStore, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            staging,
            claims,
            embedder,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl Tool for ClaimClusteringTool {
    fn name(&self) -> &str {
        "claim-clustering"
    }

    async fn run(
        &self,
        _input_data: Vec<serde_json::Value>,
        config: &serde_json::Value,
        ctx: &StepContext,
    ) -> Result<ToolResult, RuntimeError> {
        let threshold = config
            .get("similarity_threshold")
            .and_then(|v| v.as_f64())
            .map(|t| t as f32)
            .unwrap_or(self.threshold);

        ctx.set_event("stage", json!("clustering_claims")).await;

        let extractions = self
            .staging
            .section_extractions_for_workflow(&ctx.run_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;

        let inputs: Vec<(String, String, serde_json::Value)> = extractions
            .iter()
            .map(|row| (row.document_id.clone(), row.section_id.clone(), row.claims.clone()))
            .collect();
        let claims = collect_claims(&inputs);

        if claims.is_empty() {
            ctx.log("No claims to cluster").await;
            return Ok(ToolResult {
                output_data: vec![json!({
                    "claims_processed": 0,
                    "clusters_created": 0,
                    "rows_written": 0,
                })],
                errors: vec![],
                metadata: json!({}),
            });
        }

        ctx.log(&format!("Clustering {} claim(s)", claims.len())).await;

        // Embed statements; fall back to prefix clustering when the
        // provider is unavailable or fails.
        let mut embeddings: Option<Vec<Vec<f32>>> = None;
        if self.embedder.is_available() {
            let statements: Vec<String> = claims.iter().map(|c| c.statement.clone()).collect();
            match self.embedder.embed_batch(statements).await {
                Ok(vectors) if vectors.len() == claims.len() => embeddings = Some(vectors),
                Ok(_) | Err(_) => {
                    warn!("embedding provider failed, using prefix fallback clustering");
                }
            }
        }

        let clusters = match &embeddings {
            Some(vectors) => cluster_by_similarity(&claims, vectors, threshold),
            None => cluster_by_text_prefix(&claims),
        };

        // Existing claims with embeddings, for the merge check. Without
        // embeddings there is nothing to compare against.
        let existing: Vec<(String, String, Vec<f32>)> = if embeddings.is_some() {
            self.claims
                .all_with_embeddings()
                .await
                .map_err(|e| RuntimeError::State(e.to_string()))?
                .into_iter()
                .filter_map(|row| {
                    row.embedding
                        .as_deref()
                        .map(|bytes| (row.claim_hash.clone(), row.statement.clone(), bytes_to_embedding(bytes)))
                })
                .collect()
        } else {
            vec![]
        };

        let tasks: Vec<ClusterTask> = clusters
            .iter()
            .enumerate()
            .map(|(cluster_id, members)| {
                let similar_existing = match &embeddings {
                    Some(vectors) => {
                        let member_embeddings: Vec<&[f32]> =
                            members.iter().map(|&i| vectors[i].as_slice()).collect();
                        find_similar_existing(&member_embeddings, &existing, threshold)
                    }
                    None => vec![],
                };
                ClusterTask {
                    cluster_id: cluster_id as i64,
                    members: members.clone(),
                    similar_existing,
                }
            })
            .collect();

        let decisions = resolve_claim_clusters(&claims, &tasks);

        let rows: Vec<InsertClaimGroup> = decisions
            .iter()
            .map(|decision| {
                let claim = &claims[decision.claim_index];
                InsertClaimGroup {
                    workflow_id: ctx.run_id.clone(),
                    claim_hash: claim.claim_hash.clone(),
                    document_id: claim.document_id.clone(),
                    section_id: claim.section_id.clone(),
                    statement: truncate_chars(&claim.statement, STATEMENT_CAP),
                    claim_type: claim.claim_type.to_string(),
                    confidence: claim.confidence,
                    source_quote: claim.source_quote.clone(),
                    entity_indices: json!(claim.entity_indices),
                    cluster_id: decision.cluster_id,
                    cluster_size: decision.cluster_size as i64,
                    decision: decision.decision.to_string(),
                    canonical_statement: Some(decision.canonical_statement.clone()),
                    similar_existing: json!(decision
                        .similar_existing
                        .iter()
                        .map(|s| json!({ "claim_hash": s.claim_hash, "statement": s.statement }))
                        .collect::<Vec<_>>()),
                    embedding: embeddings
                        .as_ref()
                        .map(|vectors| embedding_to_bytes(&vectors[decision.claim_index])),
                }
            })
            .collect();

        let rows_written = self
            .staging
            .insert_claim_groups(&rows)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;

        let stats = ClusteringStats {
            claims_processed: claims.len(),
            clusters_created: clusters.len(),
            rows_written,
        };
        info!(?stats, "claim clustering done");
        ctx.log(&format!(
            "Clustered {} claim(s) into {} cluster(s)",
            stats.claims_processed, stats.clusters_created
        ))
        .await;

        Ok(ToolResult {
            output_data: vec![serde_json::to_value(&stats).unwrap_or(json!({}))],
            errors: vec![],
            metadata: json!({ "clusters": stats.clusters_created }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction(
        document_id: &str,
        section_id: &str,
        claims: serde_json::Value,
    ) -> (String, String, serde_json::Value) {
        (document_id.to_string(), section_id.to_string(), claims)
    }

    fn claim(statement: &str, confidence: f32, document_id: &str) -> CollectedClaim {
        CollectedClaim {
            claim_hash: claim_hash(statement, "definition", document_id),
            statement: statement.to_string(),
            claim_type: ClaimType::Definition,
            confidence,
            source_quote: None,
            document_id: document_id.to_string(),
            section_id: "sec1".to_string(),
            entity_indices: vec![],
        }
    }

    // --- collect_claims ---

    #[test]
    fn collect_single_claim() {
        let extractions = vec![extraction(
            "doc1",
            "sec1",
            json!([{"statement": "Python is great", "claim_type": "capability", "confidence": 0.9}]),
        )];
        let claims = collect_claims(&extractions);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].statement, "Python is great");
        assert_eq!(claims[0].claim_type, ClaimType::Capability);
        assert_eq!(claims[0].confidence, 0.9);
        assert_eq!(claims[0].document_id, "doc1");
        assert_eq!(claims[0].section_id, "sec1");
    }

    #[test]
    fn collect_skips_empty_statements() {
        let extractions = vec![extraction(
            "doc1",
            "sec1",
            json!([
                {"statement": "", "claim_type": "definition"},
                {"statement": "Valid claim", "claim_type": "capability"},
            ]),
        )];
        let claims = collect_claims(&extractions);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].statement, "Valid claim");
    }

    #[test]
    fn collect_defaults_invalid_claim_type() {
        let extractions = vec![extraction(
            "doc1",
            "sec1",
            json!([{"statement": "Test claim", "claim_type": "invalid_type"}]),
        )];
        let claims = collect_claims(&extractions);
        assert_eq!(claims[0].claim_type, ClaimType::Definition);
    }

    #[test]
    fn collect_parses_json_string_field() {
        let raw = r#"[{"statement": "Test claim", "claim_type": "definition", "confidence": 0.9}]"#;
        let extractions = vec![extraction("doc1", "sec1", json!(raw))];
        let claims = collect_claims(&extractions);
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn collect_handles_null_and_empty_claims() {
        let extractions = vec![
            extraction("doc1", "sec1", json!([])),
            extraction("doc2", "sec1", serde_json::Value::Null),
        ];
        assert!(collect_claims(&extractions).is_empty());
    }

    #[test]
    fn same_statement_same_document_shares_hash_across_sections() {
        let extractions = vec![
            extraction("doc1", "sec1", json!([{"statement": "Python is great", "claim_type": "definition", "confidence": 0.9}])),
            extraction("doc1", "sec2", json!([{"statement": "Python is great", "claim_type": "definition", "confidence": 0.8}])),
        ];
        let claims = collect_claims(&extractions);
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].claim_hash, claims[1].claim_hash);
    }

    #[test]
    fn same_statement_different_documents_differ() {
        let extractions = vec![
            extraction("doc1", "sec1", json!([{"statement": "Python is great", "claim_type": "definition"}])),
            extraction("doc2", "sec1", json!([{"statement": "Python is great", "claim_type": "definition"}])),
        ];
        let claims = collect_claims(&extractions);
        assert_eq!(claims.len(), 2);
        assert_ne!(claims[0].claim_hash, claims[1].claim_hash);
    }

    #[test]
    fn entity_indices_preserved_and_default_empty() {
        let extractions = vec![extraction(
            "doc1",
            "sec1",
            json!([
                {"statement": "Python was created by Guido", "claim_type": "relationship", "entity_indices": [0, 1]},
                {"statement": "Django is built on Python", "claim_type": "relationship", "entity_indices": [2, 0]},
                {"statement": "Python is great", "claim_type": "definition"},
            ]),
        )];
        let claims = collect_claims(&extractions);
        assert_eq!(claims[0].entity_indices, vec![0, 1]);
        assert_eq!(claims[1].entity_indices, vec![2, 0]);
        assert!(claims[2].entity_indices.is_empty());
    }

    // --- clustering ---

    #[test]
    fn identical_embeddings_cluster_together() {
        let claims = vec![
            claim("Python is great", 0.9, "doc1"),
            claim("Python is great", 0.8, "doc2"),
        ];
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
        let clusters = cluster_by_similarity(&claims, &embeddings, 0.88);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn distant_embeddings_separate() {
        let claims = vec![
            claim("Python is great", 0.9, "doc1"),
            claim("JavaScript is fast", 0.8, "doc1"),
        ];
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let clusters = cluster_by_similarity(&claims, &embeddings, 0.88);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn single_link_transitivity() {
        // a~b and b~c above threshold: all three join even if a~c is below.
        let claims = vec![
            claim("a", 0.9, "doc1"),
            claim("b", 0.8, "doc1"),
            claim("c", 0.7, "doc1"),
        ];
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.95, 0.312],
            vec![0.81, 0.586],
        ];
        let clusters = cluster_by_similarity(&claims, &embeddings, 0.95);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
    }

    #[test]
    fn prefix_fallback_groups_exact_normalized_prefix() {
        let claims = vec![
            claim("Python is great", 0.9, "doc1"),
            claim("python   IS great", 0.8, "doc2"),
            claim("Python is great for data science", 0.7, "doc1"),
        ];
        let clusters = cluster_by_text_prefix(&claims);
        // Case/whitespace-normalized equals cluster; the longer statement
        // has a different 100-char prefix and stands alone.
        assert_eq!(clusters.len(), 2);
        let sizes: Vec<usize> = clusters.iter().map(|c| c.len()).collect();
        assert!(sizes.contains(&2));
        assert!(sizes.contains(&1));
    }

    #[test]
    fn single_claim_single_cluster_both_strategies() {
        let claims = vec![claim("Python is great", 0.9, "doc1")];
        let embeddings = vec![vec![1.0, 0.0]];
        assert_eq!(cluster_by_similarity(&claims, &embeddings, 0.88).len(), 1);
        assert_eq!(cluster_by_text_prefix(&claims).len(), 1);
    }

    // --- similar existing ---

    #[test]
    fn similar_existing_above_threshold() {
        let member = vec![1.0_f32, 0.0];
        let members: Vec<&[f32]> = vec![member.as_slice()];
        let existing = vec![
            ("hash_close".to_string(), "Close claim".to_string(), vec![0.99, 0.141]),
            ("hash_far".to_string(), "Far claim".to_string(), vec![0.0, 1.0]),
        ];
        let similar = find_similar_existing(&members, &existing, 0.88);
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].claim_hash, "hash_close");
    }

    // --- decisions ---

    fn one_cluster(claims: &[CollectedClaim], similar: Vec<SimilarExisting>) -> Vec<ClusterTask> {
        vec![ClusterTask {
            cluster_id: 0,
            members: (0..claims.len()).collect(),
            similar_existing: similar,
        }]
    }

    #[test]
    fn single_claim_creates_new() {
        let claims = vec![claim("Python is great", 0.9, "doc1")];
        let decisions = resolve_claim_clusters(&claims, &one_cluster(&claims, vec![]));
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision, Decision::CreateNew);
        assert_eq!(decisions[0].canonical_statement, "Python is great");
    }

    #[test]
    fn highest_confidence_becomes_canonical() {
        let claims = vec![
            claim("Python is good", 0.6, "doc1"),
            claim("Python is excellent", 0.95, "doc2"),
            claim("Python is great", 0.8, "doc3"),
        ];
        let decisions = resolve_claim_clusters(&claims, &one_cluster(&claims, vec![]));
        assert_eq!(decisions.len(), 3);

        assert_eq!(decisions[0].decision, Decision::CreateNew);
        assert_eq!(decisions[0].canonical_statement, "Python is excellent");
        let canonical_hash = claims[decisions[0].claim_index].claim_hash.clone();

        for decision in &decisions[1..] {
            assert_eq!(decision.decision, Decision::DuplicateOf(canonical_hash.clone()));
            assert_eq!(decision.canonical_statement, "Python is excellent");
        }
    }

    #[test]
    fn cross_document_merge_scenario() {
        // D1 has the claim at 0.7, D2 at 0.9; no existing claim. D2's
        // occurrence creates, D1's duplicates it.
        let claims = vec![
            claim("Python is interpreted", 0.7, "d1"),
            claim("Python is interpreted", 0.9, "d2"),
        ];
        let decisions = resolve_claim_clusters(&claims, &one_cluster(&claims, vec![]));

        let create: Vec<_> = decisions
            .iter()
            .filter(|d| d.decision == Decision::CreateNew)
            .collect();
        assert_eq!(create.len(), 1);
        assert_eq!(claims[create[0].claim_index].document_id, "d2");
        assert_eq!(create[0].canonical_statement, "Python is interpreted");

        let duplicate: Vec<_> = decisions
            .iter()
            .filter(|d| matches!(d.decision, Decision::DuplicateOf(_)))
            .collect();
        assert_eq!(duplicate.len(), 1);
        assert_eq!(
            duplicate[0].decision,
            Decision::DuplicateOf(claims[create[0].claim_index].claim_hash.clone())
        );
    }

    #[test]
    fn confidence_tie_breaks_by_hash() {
        let mut a = claim("Python claim alpha", 0.8, "doc1");
        let mut b = claim("Python claim beta", 0.8, "doc1");
        a.claim_hash = "aaaa".to_string();
        b.claim_hash = "bbbb".to_string();
        let claims = vec![b.clone(), a.clone()];
        let decisions = resolve_claim_clusters(&claims, &one_cluster(&claims, vec![]));
        // Equal confidence: the lexically smaller hash wins the head slot.
        assert_eq!(claims[decisions[0].claim_index].claim_hash, "aaaa");
        assert_eq!(decisions[0].decision, Decision::CreateNew);
    }

    #[test]
    fn similar_existing_merges_whole_cluster() {
        let claims = vec![
            claim("Python is a popular language", 0.8, "doc1"),
            claim("Python is widely liked", 0.6, "doc2"),
        ];
        let similar = vec![SimilarExisting {
            claim_hash: "existing_hash".to_string(),
            statement: "Python is a widely-used language".to_string(),
        }];
        let decisions = resolve_claim_clusters(&claims, &one_cluster(&claims, similar));
        assert_eq!(decisions.len(), 2);
        for decision in &decisions {
            assert_eq!(decision.decision, Decision::MergeWith("existing_hash".to_string()));
            assert_eq!(decision.canonical_statement, "Python is a widely-used language");
            assert_eq!(decision.similar_existing.len(), 1);
        }
    }

    #[test]
    fn multiple_existing_merges_with_first() {
        let claims = vec![claim("Python is interpreted", 0.8, "doc1")];
        let similar = vec![
            SimilarExisting {
                claim_hash: "existing_1".to_string(),
                statement: "Python is an interpreted language".to_string(),
            },
            SimilarExisting {
                claim_hash: "existing_2".to_string(),
                statement: "Python runs interpreted".to_string(),
            },
        ];
        let decisions = resolve_claim_clusters(&claims, &one_cluster(&claims, similar));
        assert_eq!(decisions[0].decision, Decision::MergeWith("existing_1".to_string()));
    }

    #[test]
    fn exactly_one_canonical_per_cluster() {
        for size in [1usize, 3, 5] {
            let claims: Vec<CollectedClaim> = (0..size)
                .map(|i| claim(&format!("Python variant {i}"), 0.5 + i as f32 * 0.1, &format!("doc{i}")))
                .collect();
            let decisions = resolve_claim_clusters(&claims, &one_cluster(&claims, vec![]));
            let canonical_count = decisions
                .iter()
                .filter(|d| matches!(d.decision, Decision::CreateNew | Decision::MergeWith(_)))
                .count();
            assert_eq!(canonical_count, 1);
            assert_eq!(decisions.len(), size);
        }
    }

    #[test]
    fn decision_round_trips_as_string() {
        for decision in [
            Decision::CreateNew,
            Decision::MergeWith("abc".to_string()),
            Decision::DuplicateOf("def".to_string()),
        ] {
            let rendered = decision.to_string();
            let parsed: Decision = rendered.parse().unwrap();
            assert_eq!(parsed, decision);
        }
        assert_eq!(Decision::CreateNew.to_string(), "CREATE_NEW");
        assert_eq!(Decision::MergeWith("h".into()).to_string(), "MERGE_WITH:h");
        assert_eq!(Decision::DuplicateOf("h".into()).to_string(), "DUPLICATE_OF:h");
    }
}
