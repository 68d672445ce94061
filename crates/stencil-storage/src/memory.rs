// In-memory storage implementation for dev mode
// Decision: Use parking_lot for thread-safe access
// Decision: Transactions stage writes and apply them under one write lock at commit
//
// This implementation provides a PostgreSQL-compatible API backed by in-memory
// maps, allowing the control-plane to run without a database for development
// and tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use stencil_core::{Pagination, VersionSelector};

use crate::error::StoreError;
use crate::models::*;

#[derive(Debug, Clone)]
struct ExecutionRow {
    workflow_template_id: i64,
    phase: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    templates: BTreeMap<i64, TemplateRow>,
    versions: BTreeMap<i64, TemplateVersionRow>,
    executions: Vec<ExecutionRow>,
}

impl Tables {
    fn find_template(&self, namespace: &str, uid: &str) -> Option<&TemplateRow> {
        self.templates
            .values()
            .find(|t| t.namespace == namespace && t.uid == uid)
    }

    fn versions_of(&self, template_id: i64) -> impl Iterator<Item = &TemplateVersionRow> {
        self.versions
            .values()
            .filter(move |v| v.workflow_template_id == template_id)
    }

    fn join(template: &TemplateRow, version: &TemplateVersionRow) -> TemplateWithVersionRow {
        TemplateWithVersionRow {
            id: template.id,
            uid: template.uid.clone(),
            name: template.name.clone(),
            namespace: template.namespace.clone(),
            is_archived: template.is_archived,
            created_at: template.created_at,
            version: version.version,
            is_latest: version.is_latest,
            manifest: version.manifest.clone(),
            version_created_at: version.created_at,
        }
    }
}

/// In-memory database for dev mode
/// All data is stored in memory and lost on restart
#[derive(Default)]
pub struct InMemoryDatabase {
    tables: RwLock<Tables>,
    // Shared by both tables, like two sequences that never collide
    next_id: AtomicI64,
    fail_next_commit: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn begin(self: &Arc<Self>) -> InMemoryTx {
        InMemoryTx {
            db: Arc::clone(self),
            templates: Vec::new(),
            versions: Vec::new(),
            demoted: HashSet::new(),
        }
    }

    /// Make the next commit fail (for testing)
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Record an execution as the workflow engine would (for testing)
    pub fn record_execution(&self, template_id: i64, phase: &str, created_at: DateTime<Utc>) {
        self.tables.write().executions.push(ExecutionRow {
            workflow_template_id: template_id,
            phase: phase.to_string(),
            created_at,
        });
    }

    pub fn template_count(&self) -> usize {
        self.tables.read().templates.len()
    }

    pub fn version_count(&self) -> usize {
        self.tables.read().versions.len()
    }

    // ============================================
    // Templates
    // ============================================

    pub async fn get_template(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Option<TemplateRow>, StoreError> {
        Ok(self.tables.read().find_template(namespace, uid).cloned())
    }

    pub async fn get_template_version(
        &self,
        namespace: &str,
        uid: &str,
        version: VersionSelector,
    ) -> Result<Option<TemplateWithVersionRow>, StoreError> {
        let tables = self.tables.read();
        let Some(template) = tables.find_template(namespace, uid) else {
            return Ok(None);
        };

        let row = tables
            .versions_of(template.id)
            .find(|v| match version {
                VersionSelector::Latest => v.is_latest,
                VersionSelector::Exact(n) => v.version == n,
            })
            .map(|v| Tables::join(template, v));
        Ok(row)
    }

    pub async fn get_template_by_name(
        &self,
        namespace: &str,
        name: &str,
        version: VersionSelector,
    ) -> Result<Option<TemplateWithVersionRow>, StoreError> {
        let tables = self.tables.read();
        let Some(template) = tables
            .templates
            .values()
            .find(|t| t.namespace == namespace && t.name == name)
        else {
            return Ok(None);
        };

        let row = tables
            .versions_of(template.id)
            .filter(|v| match version {
                VersionSelector::Latest => true,
                VersionSelector::Exact(n) => v.version == n,
            })
            .max_by_key(|v| v.version)
            .map(|v| Tables::join(template, v));
        Ok(row)
    }

    pub async fn list_template_versions(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Vec<TemplateVersionRow>, StoreError> {
        let tables = self.tables.read();
        let Some(template) = tables.find_template(namespace, uid) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<TemplateVersionRow> = tables.versions_of(template.id).cloned().collect();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(rows)
    }

    pub async fn list_templates(
        &self,
        namespace: &str,
        page: Option<Pagination>,
    ) -> Result<Vec<TemplateSummaryRow>, StoreError> {
        let tables = self.tables.read();

        let mut rows = Vec::new();
        for template in tables
            .templates
            .values()
            .rev()
            .filter(|t| t.namespace == namespace && !t.is_archived)
        {
            let versions: Vec<&TemplateVersionRow> = tables.versions_of(template.id).collect();
            // Same pick as DISTINCT ON ... ORDER BY is_latest DESC, version DESC
            let Some(latest) = versions
                .iter()
                .max_by_key(|v| (v.is_latest, v.version))
            else {
                continue;
            };
            let joined = Tables::join(template, latest);
            rows.push(TemplateSummaryRow {
                id: joined.id,
                uid: joined.uid,
                name: joined.name,
                namespace: joined.namespace,
                is_archived: joined.is_archived,
                created_at: joined.created_at,
                version: joined.version,
                is_latest: joined.is_latest,
                manifest: joined.manifest,
                version_created_at: joined.version_created_at,
                versions: versions.len() as i64,
            });
        }

        if let Some(page) = page {
            rows = rows
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect();
        }
        Ok(rows)
    }

    pub async fn archive_template(&self, namespace: &str, uid: &str) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let mut affected = 0;
        for template in tables
            .templates
            .values_mut()
            .filter(|t| t.namespace == namespace && t.uid == uid)
        {
            template.is_archived = true;
            affected += 1;
        }
        Ok(affected)
    }

    // ============================================
    // Execution statistics
    // ============================================

    pub async fn execution_statistics(
        &self,
        template_ids: &[i64],
    ) -> Result<Vec<ExecutionStatisticRow>, StoreError> {
        let tables = self.tables.read();
        let mut stats: BTreeMap<i64, ExecutionStatisticRow> = BTreeMap::new();

        for execution in tables
            .executions
            .iter()
            .filter(|e| template_ids.contains(&e.workflow_template_id))
        {
            let entry = stats
                .entry(execution.workflow_template_id)
                .or_insert_with(|| ExecutionStatisticRow {
                    workflow_template_id: execution.workflow_template_id,
                    total: 0,
                    running: 0,
                    completed: 0,
                    failed: 0,
                    terminated: 0,
                    last_executed: None,
                });
            entry.total += 1;
            match execution.phase.as_str() {
                phase::RUNNING => entry.running += 1,
                phase::SUCCEEDED => entry.completed += 1,
                phase::FAILED => entry.failed += 1,
                phase::TERMINATED => entry.terminated += 1,
                _ => {}
            }
            if entry.last_executed.map_or(true, |t| t < execution.created_at) {
                entry.last_executed = Some(execution.created_at);
            }
        }

        Ok(stats.into_values().collect())
    }
}

/// Staged writes against an InMemoryDatabase. Nothing is visible to readers
/// until `commit`; dropping the transaction discards it.
pub struct InMemoryTx {
    db: Arc<InMemoryDatabase>,
    templates: Vec<TemplateRow>,
    versions: Vec<TemplateVersionRow>,
    demoted: HashSet<i64>,
}

impl InMemoryTx {
    fn check_template_unique(&self, tables: &Tables, row: &TemplateRow) -> Result<(), StoreError> {
        let clash = tables
            .templates
            .values()
            .chain(self.templates.iter())
            .filter(|t| t.id != row.id)
            .any(|t| t.namespace == row.namespace && (t.uid == row.uid || t.name == row.name));
        if clash {
            return Err(StoreError::Conflict(format!(
                "workflow template {} already exists in namespace {}",
                row.uid, row.namespace
            )));
        }
        Ok(())
    }

    fn check_version_unique(
        &self,
        tables: &Tables,
        row: &TemplateVersionRow,
    ) -> Result<(), StoreError> {
        let clash = tables
            .versions
            .values()
            .chain(self.versions.iter())
            .filter(|v| v.id != row.id)
            .any(|v| v.workflow_template_id == row.workflow_template_id && v.version == row.version);
        if clash {
            return Err(StoreError::Conflict(format!(
                "version {} already exists for workflow template {}",
                row.version, row.workflow_template_id
            )));
        }
        Ok(())
    }

    pub async fn insert_template(
        &mut self,
        input: CreateTemplateRow,
    ) -> Result<TemplateRow, StoreError> {
        let row = TemplateRow {
            id: self.db.next_id(),
            uid: input.uid,
            name: input.name,
            namespace: input.namespace,
            is_archived: false,
            created_at: Utc::now(),
        };
        self.check_template_unique(&self.db.tables.read(), &row)?;
        self.templates.push(row.clone());
        Ok(row)
    }

    pub async fn insert_version(
        &mut self,
        input: CreateTemplateVersionRow,
    ) -> Result<TemplateVersionRow, StoreError> {
        let row = TemplateVersionRow {
            id: self.db.next_id(),
            workflow_template_id: input.workflow_template_id,
            version: input.version,
            is_latest: input.is_latest,
            manifest: input.manifest,
            created_at: Utc::now(),
        };

        {
            let tables = self.db.tables.read();
            let parent_exists = tables.templates.contains_key(&row.workflow_template_id)
                || self.templates.iter().any(|t| t.id == row.workflow_template_id);
            if !parent_exists {
                return Err(StoreError::Database(format!(
                    "workflow template {} does not exist",
                    row.workflow_template_id
                )));
            }
            self.check_version_unique(&tables, &row)?;
        }

        self.versions.push(row.clone());
        Ok(row)
    }

    pub async fn demote_versions(&mut self, template_id: i64) -> Result<u64, StoreError> {
        let mut affected = self
            .db
            .tables
            .read()
            .versions_of(template_id)
            .filter(|v| v.is_latest)
            .count() as u64;
        for staged in self
            .versions
            .iter_mut()
            .filter(|v| v.workflow_template_id == template_id && v.is_latest)
        {
            staged.is_latest = false;
            affected += 1;
        }
        self.demoted.insert(template_id);
        Ok(affected)
    }

    pub async fn max_version(&mut self, template_id: i64) -> Result<Option<i64>, StoreError> {
        let committed = self
            .db
            .tables
            .read()
            .versions_of(template_id)
            .map(|v| v.version)
            .max();
        let staged = self
            .versions
            .iter()
            .filter(|v| v.workflow_template_id == template_id)
            .map(|v| v.version)
            .max();
        Ok(committed.max(staged))
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        if self.db.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("could not commit transaction".to_string()));
        }

        let mut tables = self.db.tables.write();
        // Re-check against rows committed since staging
        for row in &self.templates {
            self.check_template_unique(&tables, row)?;
        }
        for row in &self.versions {
            self.check_version_unique(&tables, row)?;
        }

        for template_id in &self.demoted {
            for version in tables
                .versions
                .values_mut()
                .filter(|v| v.workflow_template_id == *template_id)
            {
                version.is_latest = false;
            }
        }
        for row in &self.templates {
            tables.templates.insert(row.id, row.clone());
        }
        for row in &self.versions {
            tables.versions.insert(row.id, row.clone());
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
