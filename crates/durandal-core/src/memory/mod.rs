//! Memory - the fundamental unit of storage
//!
//! A memory is a piece of UTF-8 text plus structured metadata. Metadata is
//! persisted as JSON in an opaque store column, so the struct keeps a
//! flattened passthrough map: fields this version does not recognize survive
//! a store/load round-trip untouched.

mod enrich;

pub use enrich::enrich_metadata;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoryError, Result};

/// Upper bound on memory content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 50_000;

/// Importance assumed when the caller did not supply one.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

// ============================================================================
// METADATA
// ============================================================================

/// A typed relationship edge to another memory.
///
/// Edges are owned flat by the memory record; consumers reconstruct the graph
/// on demand. Cycles are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub kind: String,
    /// Id of the related memory.
    pub target: String,
    #[serde(default)]
    pub strength: f64,
}

/// Rolling access counters kept inside the metadata for tier-2 scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessPatternMeta {
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_times: Vec<DateTime<Utc>>,
}

/// Derived cache-control metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RamrMeta {
    #[serde(default)]
    pub cache_priority: f64,
    #[serde(default)]
    pub prefetch_related: bool,
    #[serde(default)]
    pub access_pattern: AccessPatternMeta,
}

/// Retention-review metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectiveAttention {
    pub retention_score: f64,
    pub review_date: DateTime<Utc>,
    #[serde(default)]
    pub archive_candidate: bool,
    #[serde(default)]
    pub attention_score: f64,
}

/// Knowledge-graph placement inferred at enrichment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraphMeta {
    pub node_type: String,
    pub cluster: String,
}

/// Structured memory metadata.
///
/// Every field is optional on input; the enricher fills defaults without ever
/// overwriting what the caller supplied. Unrecognized fields land in `extra`
/// and are serialized back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// The opaque string id, generated at store time and persisted in the
    /// JSON so reads can reconstruct it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Free-form type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramr: Option<RamrMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selective_attention: Option<SelectiveAttention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph: Option<KnowledgeGraphMeta>,
    /// Caller-supplied fields this version does not recognize.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MemoryMetadata {
    /// Importance with the documented default applied.
    pub fn importance(&self) -> f64 {
        self.importance.unwrap_or(DEFAULT_IMPORTANCE)
    }

    /// Project after defaulting.
    pub fn project(&self) -> &str {
        self.project.as_deref().unwrap_or("default")
    }

    /// Session after defaulting (empty only before enrichment).
    pub fn session(&self) -> &str {
        self.session.as_deref().unwrap_or("")
    }

    /// Effective cache priority: the derived RAMR priority when present,
    /// otherwise raw importance.
    pub fn cache_priority(&self) -> f64 {
        self.ramr
            .as_ref()
            .map(|r| r.cache_priority)
            .unwrap_or_else(|| self.importance())
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A persistent unit of text plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub metadata: MemoryMetadata,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn new(id: String, content: String, metadata: MemoryMetadata) -> Self {
        let created_at = metadata.created_at.unwrap_or_else(Utc::now);
        Self {
            id,
            content,
            metadata,
            created_at,
        }
    }
}

/// Generate a fresh memory id: time-based prefix plus random suffix.
///
/// Ordering is not relied on for correctness; the prefix just keeps ids
/// roughly chronological for humans reading logs.
pub fn generate_memory_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("mem_{}_{}", now.timestamp_millis(), &suffix[..8])
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Validate memory content length (1..=50000 characters).
pub fn validate_content(content: &str) -> Result<()> {
    let len = content.chars().count();
    if len == 0 {
        return Err(MemoryError::validation(
            "content",
            "\"\"",
            "must not be empty",
        ));
    }
    if len > MAX_CONTENT_CHARS {
        return Err(MemoryError::validation(
            "content",
            format!("{} characters", len),
            format!("must be at most {} characters", MAX_CONTENT_CHARS),
        ));
    }
    Ok(())
}

/// Validate an explicit importance value.
pub fn validate_importance(importance: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&importance) || importance.is_nan() {
        return Err(MemoryError::validation(
            "importance",
            importance,
            "must be between 0 and 1",
        ));
    }
    Ok(())
}

// ============================================================================
// SEARCH FILTERS
// ============================================================================

/// Predicate set applied to search results.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub project: Option<String>,
    pub session: Option<String>,
    /// Any-of match against the memory's categories.
    pub categories: Vec<String>,
    pub importance_min: Option<f64>,
    pub importance_max: Option<f64>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.project.is_none()
            && self.session.is_none()
            && self.categories.is_empty()
            && self.importance_min.is_none()
            && self.importance_max.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    /// Whether the memory satisfies every filter predicate.
    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(project) = &self.project
            && memory.metadata.project() != project
        {
            return false;
        }
        if let Some(session) = &self.session
            && memory.metadata.session() != session
        {
            return false;
        }
        if !self.categories.is_empty()
            && !self
                .categories
                .iter()
                .any(|c| memory.metadata.categories.contains(c))
        {
            return false;
        }
        let importance = memory.metadata.importance();
        if let Some(min) = self.importance_min
            && importance < min
        {
            return false;
        }
        if let Some(max) = self.importance_max
            && importance > max
        {
            return false;
        }
        if let Some(from) = self.date_from
            && memory.created_at < from
        {
            return false;
        }
        if let Some(to) = self.date_to
            && memory.created_at > to
        {
            return false;
        }
        true
    }
}

/// Case-insensitive substring test used by both cache and store search.
pub fn content_matches(content: &str, query: &str) -> bool {
    content.to_lowercase().contains(&query.to_lowercase())
}
