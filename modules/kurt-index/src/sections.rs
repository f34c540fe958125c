//! Section extraction: split document markdown into bounded sections and
//! run structured LLM extraction over each.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use kurt_common::embedding::{embedding_to_bytes, TextEmbedder};
use kurt_runtime::{ItemError, RuntimeError, StepContext, Tool, ToolResult};
use kurt_store::staging::InsertSectionExtraction;
use kurt_store::{ClaimStore, DocumentStore, StagingStore};
use llm_client::ExtractAgent;

use crate::error::{IndexError, Result};

/// Section size bounds, in characters.
const MIN_SECTION_CHARS: usize = 500;
const MAX_SECTION_CHARS: usize = 5000;

/// A contiguous markdown region of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionedDocument {
    pub document_id: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub section_index: i32,
    pub header: Option<String>,
    pub content: String,
}

/// Structured extraction output for one section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SectionExtraction {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
    #[serde(default)]
    pub claims: Vec<ExtractedClaim>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedEntity {
    pub name: String,
    /// "Technology", "Person", "Product", "Organization", "Topic"
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    pub relation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedClaim {
    pub statement: String,
    /// "definition", "capability", "limitation", "relationship", "fact"
    #[serde(default)]
    pub claim_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub source_quote: Option<String>,
    /// Indices into this section's `entities` list.
    #[serde(default)]
    pub entity_indices: Vec<usize>,
}

const EXTRACTION_INSTRUCTIONS: &str = "Extract the named entities, entity \
relationships, and atomic factual claims from this document section. Each \
claim must be a single assertion; entity_indices reference the entities \
array by position.";

/// Split markdown into sections bounded by headings and size limits.
///
/// Heading boundaries are preferred; oversized regions split at paragraph
/// breaks with `overlap` characters carried into the next section.
pub fn split_sections(document_id: &str, markdown: &str, overlap: usize) -> SectionedDocument {
    let mut raw_sections: Vec<(Option<String>, String)> = vec![];
    let mut current_header: Option<String> = None;
    let mut current = String::new();

    for line in markdown.lines() {
        if line.starts_with('#') {
            if !current.trim().is_empty() {
                raw_sections.push((current_header.clone(), current.clone()));
            }
            current_header = Some(line.trim_start_matches('#').trim().to_string());
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        raw_sections.push((current_header, current));
    }

    // Merge undersized neighbors, then split oversized regions.
    let mut merged: Vec<(Option<String>, String)> = vec![];
    for (header, content) in raw_sections {
        match merged.last_mut() {
            Some((_, previous)) if previous.chars().count() < MIN_SECTION_CHARS => {
                previous.push_str(&content);
            }
            _ => merged.push((header, content)),
        }
    }

    let mut sections = vec![];
    for (header, content) in merged {
        for chunk in split_oversized(&content, MAX_SECTION_CHARS, overlap) {
            let index = sections.len() as i32;
            sections.push(Section {
                section_id: format!("{document_id}:{index}"),
                section_index: index,
                header: header.clone(),
                content: chunk,
            });
        }
    }

    SectionedDocument {
        document_id: document_id.to_string(),
        sections,
    }
}

fn split_oversized(content: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let total = content.chars().count();
    if total <= max_chars {
        return vec![content.to_string()];
    }

    let chars: Vec<char> = content.chars().collect();
    let mut chunks = vec![];
    let mut start = 0;
    while start < total {
        let end = (start + max_chars).min(total);
        // Prefer a paragraph break near the end of the window.
        let window: String = chars[start..end].iter().collect();
        let cut = if end < total {
            window.rfind("\n\n").map(|i| start + window[..i].chars().count() + 2)
        } else {
            None
        };
        let cut = cut.unwrap_or(end);
        chunks.push(chars[start..cut].iter().collect());
        if cut >= total {
            break;
        }
        // The overlap must never move the window backwards.
        let next_start = cut.saturating_sub(overlap);
        start = if next_start > start { next_start } else { cut };
    }
    chunks
}

/// Runtime tool for the section extraction step.
pub struct SectionExtractionTool {
    documents: DocumentStore,
    staging: StagingStore,
    claims: ClaimStore,
    agent: Arc<dyn ExtractAgent>,
    embedder: Arc<dyn TextEmbedder>,
    content_root: std::path::PathBuf,
    overlap: usize,
}

impl SectionExtractionTool {
    pub fn new(
        documents: DocumentStore,
        staging: StagingStore,
        claims: ClaimStore,
        agent: Arc<dyn ExtractAgent>,
        embedder: Arc<dyn TextEmbedder>,
        content_root: std::path::PathBuf,
    ) -> Self {
        Self {
            documents,
            staging,
            claims,
            agent,
            embedder,
            content_root,
            overlap: 200,
        }
    }

    async fn extract_document(
        &self,
        doc: &kurt_store::rows::DocumentRow,
        workflow_id: &str,
    ) -> Result<usize> {
        let Some(content_path) = doc.content_path.as_deref() else {
            return Err(IndexError::NotFound(format!(
                "document {} has no content",
                doc.id
            )));
        };
        let full_path = self.content_root.join(content_path);
        let markdown = std::fs::read_to_string(&full_path)
            .map_err(|e| IndexError::NotFound(format!("{}: {e}", full_path.display())))?;

        // Re-indexing a changed document: its prior claims and entity links
        // must go before new ones are derived.
        self.claims.delete_stale_for_document(&doc.id, workflow_id).await?;

        let sectioned = split_sections(&doc.id, &markdown, self.overlap);
        let mut rows = vec![];

        for section in &sectioned.sections {
            let extraction: SectionExtraction = match llm_client::traits::extract_typed(
                self.agent.as_ref(),
                EXTRACTION_INSTRUCTIONS,
                &section.content,
            )
            .await
            {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!(section = %section.section_id, error = %e, "section extraction failed");
                    continue;
                }
            };

            let embedding = match self.embedder.embed(&section.content).await {
                Ok(vector) if !vector.is_empty() => Some(embedding_to_bytes(&vector)),
                _ => None,
            };

            rows.push(InsertSectionExtraction {
                workflow_id: workflow_id.to_string(),
                document_id: doc.id.clone(),
                section_id: section.section_id.clone(),
                section_index: section.section_index,
                header: section.header.clone(),
                content: section.content.clone(),
                content_type: extraction.content_type.clone(),
                embedding,
                entities: serde_json::to_value(&extraction.entities).unwrap_or(json!([])),
                relationships: serde_json::to_value(&extraction.relationships)
                    .unwrap_or(json!([])),
                claims: serde_json::to_value(&extraction.claims).unwrap_or(json!([])),
            });
        }

        let written = self.staging.insert_section_extractions(&rows).await?;
        Ok(written as usize)
    }
}

#[async_trait]
impl Tool for SectionExtractionTool {
    fn name(&self) -> &str {
        "section-extraction"
    }

    async fn run(
        &self,
        _input_data: Vec<serde_json::Value>,
        config: &serde_json::Value,
        ctx: &StepContext,
    ) -> std::result::Result<ToolResult, RuntimeError> {
        let reprocess_unchanged = config
            .get("reprocess_unchanged")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // Fetched documents from this workflow are the work list.
        let fetch_rows = self
            .staging
            .fetch_documents_for_workflow(&ctx.run_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;

        ctx.set_event("stage", json!("extracting_sections")).await;
        ctx.set_event("stage_total", json!(fetch_rows.len())).await;

        let mut errors = vec![];
        let mut sections_written = 0usize;
        let mut documents_processed = 0usize;
        let mut documents_skipped = 0usize;

        for (idx, fetch_row) in fetch_rows.iter().enumerate() {
            ctx.set_event("stage_current", json!(idx + 1)).await;
            if fetch_row.status == "ERROR" {
                continue;
            }

            let doc = match self.documents.get(&fetch_row.document_id).await {
                Ok(doc) => doc,
                Err(e) => {
                    errors.push(ItemError::new(&fetch_row.document_id, "not_found", e.to_string()));
                    continue;
                }
            };

            // Incremental skip: already indexed at this content hash.
            if !reprocess_unchanged && doc.is_unchanged() {
                documents_skipped += 1;
                ctx.progress(idx, fetch_rows.len(), "skip", &doc.id, None).await;
                continue;
            }

            match self.extract_document(&doc, &ctx.run_id).await {
                Ok(written) => {
                    sections_written += written;
                    documents_processed += 1;
                    ctx.progress(idx, fetch_rows.len(), "success", &doc.id, None).await;
                }
                Err(e) => {
                    errors.push(ItemError::new(&doc.id, "extraction", e.to_string()));
                    ctx.progress(idx, fetch_rows.len(), "error", &doc.id, Some(&e.to_string()))
                        .await;
                }
            }
        }

        info!(documents_processed, documents_skipped, sections_written, "section extraction done");
        Ok(ToolResult {
            output_data: vec![json!({
                "documents_processed": documents_processed,
                "documents_skipped": documents_skipped,
                "sections_written": sections_written,
            })],
            errors,
            metadata: json!({ "sections_written": sections_written }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_document_is_one_section() {
        let doc = split_sections("doc1", "# Title\nShort body.\n", 100);
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].header.as_deref(), Some("Title"));
        assert_eq!(doc.sections[0].section_id, "doc1:0");
    }

    #[test]
    fn headings_bound_sections() {
        let body = "x".repeat(600);
        let markdown = format!("# One\n{body}\n# Two\n{body}\n");
        let doc = split_sections("doc1", &markdown, 0);
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].header.as_deref(), Some("One"));
        assert_eq!(doc.sections[1].header.as_deref(), Some("Two"));
    }

    #[test]
    fn tiny_sections_merge_with_neighbor() {
        let markdown = format!("# A\nshort\n# B\n{}\n", "y".repeat(600));
        let doc = split_sections("doc1", &markdown, 0);
        // "A" is under the minimum, so "B" folds into it.
        assert_eq!(doc.sections.len(), 1);
    }

    #[test]
    fn oversized_sections_split_with_indices() {
        let paragraphs: Vec<String> = (0..20).map(|i| format!("Paragraph {i} {}", "z".repeat(400))).collect();
        let markdown = format!("# Big\n{}", paragraphs.join("\n\n"));
        let doc = split_sections("doc1", &markdown, 100);
        assert!(doc.sections.len() > 1);
        for (i, section) in doc.sections.iter().enumerate() {
            assert_eq!(section.section_index, i as i32);
            assert!(section.content.chars().count() <= MAX_SECTION_CHARS + 1);
        }
    }

    #[test]
    fn extraction_defaults_deserialize() {
        let extraction: SectionExtraction = serde_json::from_str("{}").unwrap();
        assert!(extraction.entities.is_empty());
        assert!(extraction.claims.is_empty());

        let extraction: SectionExtraction = serde_json::from_value(json!({
            "entities": [{"name": "Python", "entity_type": "Technology"}],
            "claims": [{"statement": "Python is interpreted", "entity_indices": [0]}],
        }))
        .unwrap();
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.claims[0].entity_indices, vec![0]);
        assert!(extraction.claims[0].claim_type.is_none());
    }
}
