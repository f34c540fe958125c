//! Row types shared across stores. Ids are opaque UUID strings; enums are
//! stored as their string forms and parsed on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row from the documents table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct DocumentRow {
    pub id: String,
    pub source_url: String,
    pub source_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_path: Option<String>,
    pub content_hash: Option<String>,
    pub indexed_with_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRow {
    /// Whether indexing can skip this document in delta mode.
    pub fn is_unchanged(&self) -> bool {
        self.content_hash.is_some() && self.content_hash == self.indexed_with_hash
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityRow {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub description: Option<String>,
    pub aliases: serde_json::Value,
    pub embedding: Option<Vec<u8>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRow {
    pub fn alias_list(&self) -> Vec<String> {
        self.aliases
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimRow {
    pub id: String,
    pub claim_hash: String,
    pub statement: String,
    pub claim_type: String,
    pub confidence: f32,
    pub subject_entity_id: String,
    pub source_quote: Option<String>,
    pub document_id: String,
    pub section_id: String,
    pub workflow_id: String,
    pub embedding: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for inserting a new claim.
#[derive(Debug, Clone)]
pub struct InsertClaim {
    pub claim_hash: String,
    pub statement: String,
    pub claim_type: String,
    pub confidence: f32,
    pub subject_entity_id: String,
    pub source_quote: Option<String>,
    pub document_id: String,
    pub section_id: String,
    pub workflow_id: String,
    pub embedding: Option<Vec<u8>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WorkflowRunRow {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub inputs: serde_json::Value,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StepLogRow {
    pub run_id: String,
    pub step_id: String,
    pub tool: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input_count: i64,
    pub input_hash: Option<String>,
    pub output_count: i64,
    pub outputs: serde_json::Value,
    pub error_count: i64,
    pub errors: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// A row of the landing_fetch staging table. One per document, upserted.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct FetchDocumentRow {
    pub document_id: String,
    pub workflow_id: String,
    pub status: String,
    pub content_length: i64,
    pub content_hash: Option<String>,
    pub content_path: Option<String>,
    pub fetch_engine: Option<String>,
    pub skip_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub embedding: Option<Vec<u8>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SectionExtractionRow {
    pub id: String,
    pub workflow_id: String,
    pub document_id: String,
    pub section_id: String,
    pub section_index: i32,
    pub header: Option<String>,
    pub content: String,
    pub content_type: Option<String>,
    pub embedding: Option<Vec<u8>>,
    pub entities: serde_json::Value,
    pub relationships: serde_json::Value,
    pub claims: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityResolutionRow {
    pub id: String,
    pub workflow_id: String,
    pub entity_name: String,
    pub resolved_entity_id: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One claim occurrence with its clustering decision.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimGroupRow {
    pub id: String,
    pub workflow_id: String,
    pub claim_hash: String,
    pub document_id: String,
    pub section_id: String,
    pub statement: String,
    pub claim_type: String,
    pub confidence: f32,
    pub source_quote: Option<String>,
    pub entity_indices: serde_json::Value,
    pub cluster_id: i64,
    pub cluster_size: i64,
    pub decision: String,
    pub canonical_statement: Option<String>,
    pub similar_existing: serde_json::Value,
    pub embedding: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClaimGroupRow {
    pub fn entity_index_list(&self) -> Vec<usize> {
        self.entity_indices
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_u64().map(|n| n as usize))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The final per-claim disposition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimResolutionRow {
    pub id: String,
    pub workflow_id: String,
    pub claim_hash: String,
    pub document_id: String,
    pub section_id: String,
    pub statement: String,
    pub claim_type: String,
    pub confidence: f32,
    pub decision: String,
    pub canonical_statement: Option<String>,
    pub resolved_claim_id: Option<String>,
    pub resolution_action: String,
    pub linked_entity_ids: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
