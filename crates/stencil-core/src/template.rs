// Workflow template domain types
//
// These are the merged, store-agnostic views handed to callers. The relational
// rows and cluster objects they are assembled from live in stencil-storage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution counters for a template, read from the execution history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionStatisticReport {
    pub total: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub terminated: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
}

/// WorkflowTemplate - one version of a template, merged from both stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Numeric surrogate key of the template row.
    pub id: i64,
    /// Opaque identity, stable across versions.
    pub uid: String,
    /// Human-readable name, unique within the namespace.
    pub name: String,
    pub namespace: String,
    pub created_at: DateTime<Utc>,
    pub is_archived: bool,
    /// Version number of the manifest below (epoch seconds at creation).
    pub version: i64,
    pub manifest: String,
    pub is_latest: bool,
    /// When this version was recorded.
    pub version_created_at: DateTime<Utc>,
    /// User tags, with the reserved tag prefix stripped.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Number of versions; only filled by list views.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<WorkflowExecutionStatisticReport>,
}

/// WorkflowTemplateVersion - an immutable manifest revision owned by a template.
/// Only `is_latest` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplateVersion {
    pub id: i64,
    pub template_id: i64,
    pub version: i64,
    pub is_latest: bool,
    pub manifest: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub manifest: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Input for appending a version to an existing template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTemplateVersion {
    pub uid: String,
    pub manifest: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Offset/limit window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

impl Pagination {
    pub fn page(page: u32, page_size: u32) -> Self {
        let limit = page_size.max(1);
        Self {
            offset: page.saturating_sub(1).saturating_mul(limit),
            limit,
        }
    }
}
