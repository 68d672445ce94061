// Database models (internal, may differ from the merged domain types)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use stencil_core::{WorkflowExecutionStatisticReport, WorkflowTemplateVersion};

// ============================================
// Templates
// ============================================

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TemplateRow {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTemplateRow {
    pub uid: String,
    pub name: String,
    pub namespace: String,
}

// ============================================
// Versions
// ============================================

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TemplateVersionRow {
    pub id: i64,
    pub workflow_template_id: i64,
    pub version: i64,
    pub is_latest: bool,
    pub manifest: String,
    pub created_at: DateTime<Utc>,
}

impl From<TemplateVersionRow> for WorkflowTemplateVersion {
    fn from(row: TemplateVersionRow) -> Self {
        WorkflowTemplateVersion {
            id: row.id,
            template_id: row.workflow_template_id,
            version: row.version,
            is_latest: row.is_latest,
            manifest: row.manifest,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateTemplateVersionRow {
    pub workflow_template_id: i64,
    pub version: i64,
    pub is_latest: bool,
    pub manifest: String,
}

/// Template joined with one of its versions
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TemplateWithVersionRow {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub version: i64,
    pub is_latest: bool,
    pub manifest: String,
    pub version_created_at: DateTime<Utc>,
}

/// Template with its latest version and version count (list views)
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TemplateSummaryRow {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub version: i64,
    pub is_latest: bool,
    pub manifest: String,
    pub version_created_at: DateTime<Utc>,
    pub versions: i64,
}

// ============================================
// Execution statistics (read-only)
// ============================================

/// Execution phases as written by the workflow engine
pub mod phase {
    pub const RUNNING: &str = "Running";
    pub const SUCCEEDED: &str = "Succeeded";
    pub const FAILED: &str = "Failed";
    pub const TERMINATED: &str = "Terminated";
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ExecutionStatisticRow {
    pub workflow_template_id: i64,
    pub total: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub terminated: i64,
    pub last_executed: Option<DateTime<Utc>>,
}

impl From<ExecutionStatisticRow> for WorkflowExecutionStatisticReport {
    fn from(row: ExecutionStatisticRow) -> Self {
        WorkflowExecutionStatisticReport {
            total: row.total,
            running: row.running,
            completed: row.completed,
            failed: row.failed,
            terminated: row.terminated,
            last_executed: row.last_executed,
        }
    }
}
