use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Source / claim / entity enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Url,
    File,
    Cms,
    Api,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Url => write!(f, "url"),
            SourceType::File => write!(f, "file"),
            SourceType::Cms => write!(f, "cms"),
            SourceType::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "url" => Ok(Self::Url),
            "file" => Ok(Self::File),
            "cms" => Ok(Self::Cms),
            "api" => Ok(Self::Api),
            other => Err(format!("unknown SourceType: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    #[default]
    Definition,
    Capability,
    Limitation,
    Relationship,
    Fact,
}

impl ClaimType {
    /// Parse leniently: anything unrecognized becomes `Definition`.
    /// Extraction output is LLM-generated and occasionally invents types.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl std::fmt::Display for ClaimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimType::Definition => write!(f, "definition"),
            ClaimType::Capability => write!(f, "capability"),
            ClaimType::Limitation => write!(f, "limitation"),
            ClaimType::Relationship => write!(f, "relationship"),
            ClaimType::Fact => write!(f, "fact"),
        }
    }
}

impl std::str::FromStr for ClaimType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "definition" => Ok(Self::Definition),
            "capability" => Ok(Self::Capability),
            "limitation" => Ok(Self::Limitation),
            "relationship" => Ok(Self::Relationship),
            "fact" => Ok(Self::Fact),
            other => Err(format!("unknown ClaimType: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Technology,
    Person,
    Product,
    Organization,
    Topic,
    Other,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Technology => write!(f, "Technology"),
            EntityType::Person => write!(f, "Person"),
            EntityType::Product => write!(f, "Product"),
            EntityType::Organization => write!(f, "Organization"),
            EntityType::Topic => write!(f, "Topic"),
            EntityType::Other => write!(f, "Other"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Technology" | "technology" => Ok(Self::Technology),
            "Person" | "person" => Ok(Self::Person),
            "Product" | "product" => Ok(Self::Product),
            "Organization" | "organization" => Ok(Self::Organization),
            "Topic" | "topic" => Ok(Self::Topic),
            _ => Ok(Self::Other),
        }
    }
}

// --- Workflow state machine ---

/// Internal workflow status. Monotonic within the state machine:
/// pending → running → {completed, completed_with_errors, failed}
/// and running → canceling → canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Canceling,
    Canceled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::CompletedWithErrors
                | WorkflowStatus::Failed
                | WorkflowStatus::Canceled
        )
    }

    /// Whether `self → next` is a legal state machine transition.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Canceling) => true,
            (Running, Completed)
            | (Running, CompletedWithErrors)
            | (Running, Failed)
            | (Running, Canceling) => true,
            (Canceling, Canceled) | (Canceling, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Canceling => write!(f, "canceling"),
            WorkflowStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            "failed" => Ok(Self::Failed),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown WorkflowStatus: {other}")),
        }
    }
}

/// Display status set used at the HTTP boundary. Clients see these; the
/// internal set maps onto them deterministically (running and canceling both
/// render as PENDING because dashboards treat PENDING as "active").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayStatus {
    Pending,
    Success,
    Error,
    Warning,
    Cancelled,
}

impl From<WorkflowStatus> for DisplayStatus {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Pending | WorkflowStatus::Running | WorkflowStatus::Canceling => {
                DisplayStatus::Pending
            }
            WorkflowStatus::Completed => DisplayStatus::Success,
            WorkflowStatus::CompletedWithErrors => DisplayStatus::Warning,
            WorkflowStatus::Failed => DisplayStatus::Error,
            WorkflowStatus::Canceled => DisplayStatus::Cancelled,
        }
    }
}

impl DisplayStatus {
    /// Inverse mapping, used when clients filter by display status.
    pub fn internal_statuses(&self) -> &'static [WorkflowStatus] {
        match self {
            DisplayStatus::Pending => &[
                WorkflowStatus::Pending,
                WorkflowStatus::Running,
                WorkflowStatus::Canceling,
            ],
            DisplayStatus::Success => &[WorkflowStatus::Completed],
            DisplayStatus::Warning => &[WorkflowStatus::CompletedWithErrors],
            DisplayStatus::Error => &[WorkflowStatus::Failed],
            DisplayStatus::Cancelled => &[WorkflowStatus::Canceled],
        }
    }
}

impl std::fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayStatus::Pending => write!(f, "PENDING"),
            DisplayStatus::Success => write!(f, "SUCCESS"),
            DisplayStatus::Error => write!(f, "ERROR"),
            DisplayStatus::Warning => write!(f, "WARNING"),
            DisplayStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for DisplayStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "WARNING" => Ok(Self::Warning),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown DisplayStatus: {other}")),
        }
    }
}

/// Per-document fetch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchStatus {
    Success,
    Error,
    Skip,
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStatus::Success => write!(f, "SUCCESS"),
            FetchStatus::Error => write!(f, "ERROR"),
            FetchStatus::Skip => write!(f, "SKIP"),
        }
    }
}

impl std::str::FromStr for FetchStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "SKIP" => Ok(Self::Skip),
            other => Err(format!("unknown FetchStatus: {other}")),
        }
    }
}

// --- Core entities (id-linked, the database owns identity) ---

/// The canonical unit of ingested content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source_url: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Relative path into the content store. Set by fetch on success.
    pub content_path: Option<String>,
    /// SHA-256 of raw content. Non-null iff fetch succeeded.
    pub content_hash: Option<String>,
    /// Hash last processed by indexing. Equal to content_hash ⇒ extraction
    /// can be skipped in delta mode.
    pub indexed_with_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A canonicalized named concept extracted from documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    pub entity_type: EntityType,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    /// Optimistic concurrency guard for cross-workflow merges.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document ↔ entity link with evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntity {
    pub id: Uuid,
    pub document_id: Uuid,
    pub entity_id: Uuid,
    pub workflow_id: String,
    pub quote: Option<String>,
    pub start_offset: Option<i32>,
    pub end_offset: Option<i32>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// An atomic assertion, always anchored to a subject entity when persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    /// Deterministic over normalized statement + claim_type + document_id.
    pub claim_hash: String,
    pub statement: String,
    pub claim_type: ClaimType,
    pub confidence: f32,
    pub subject_entity_id: Uuid,
    pub source_quote: Option<String>,
    pub document_id: Uuid,
    pub section_id: String,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
