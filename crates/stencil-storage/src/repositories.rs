// Repository layer for database operations (PostgreSQL)
//
// Multi-statement writes go through PgTemplateTx so the caller decides when
// to commit. Reads run straight on the pool.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use stencil_core::{Pagination, VersionSelector};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::models::*;
use crate::query;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create database connection from URL
    pub async fn from_url(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<PgTemplateTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTemplateTx { tx })
    }

    // ============================================
    // Templates
    // ============================================

    #[instrument(skip(self))]
    pub async fn get_template(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Option<TemplateRow>, StoreError> {
        let row = query::select_template(namespace, uid)
            .build_query_as::<TemplateRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn get_template_version(
        &self,
        namespace: &str,
        uid: &str,
        version: VersionSelector,
    ) -> Result<Option<TemplateWithVersionRow>, StoreError> {
        let row = query::select_template_version(namespace, uid, version)
            .build_query_as::<TemplateWithVersionRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn get_template_by_name(
        &self,
        namespace: &str,
        name: &str,
        version: VersionSelector,
    ) -> Result<Option<TemplateWithVersionRow>, StoreError> {
        let row = query::select_template_by_name(namespace, name, version)
            .build_query_as::<TemplateWithVersionRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn list_template_versions(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Vec<TemplateVersionRow>, StoreError> {
        let rows = query::select_template_versions(namespace, uid)
            .build_query_as::<TemplateVersionRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn list_templates(
        &self,
        namespace: &str,
        page: Option<Pagination>,
    ) -> Result<Vec<TemplateSummaryRow>, StoreError> {
        let rows = query::select_latest_templates(namespace, page)
            .build_query_as::<TemplateSummaryRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Soft delete; returns rows affected
    #[instrument(skip(self))]
    pub async fn archive_template(&self, namespace: &str, uid: &str) -> Result<u64, StoreError> {
        let result = query::archive_template(namespace, uid)
            .build()
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ============================================
    // Execution statistics
    // ============================================

    #[instrument(skip(self))]
    pub async fn execution_statistics(
        &self,
        template_ids: &[i64],
    ) -> Result<Vec<ExecutionStatisticRow>, StoreError> {
        if template_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = query::select_execution_statistics(template_ids)
            .build_query_as::<ExecutionStatisticRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// Open relational transaction. Dropping it without `commit` rolls back.
pub struct PgTemplateTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTemplateTx {
    #[instrument(skip(self))]
    pub async fn insert_template(
        &mut self,
        input: CreateTemplateRow,
    ) -> Result<TemplateRow, StoreError> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            INSERT INTO workflow_templates (uid, name, namespace)
            VALUES ($1, $2, $3)
            RETURNING id, uid, name, namespace, is_archived, created_at
            "#,
        )
        .bind(&input.uid)
        .bind(&input.name)
        .bind(&input.namespace)
        .fetch_one(&mut *self.tx)
        .await?;

        debug!(id = row.id, uid = %row.uid, "inserted workflow template");
        Ok(row)
    }

    #[instrument(skip(self, input), fields(template_id = input.workflow_template_id, version = input.version))]
    pub async fn insert_version(
        &mut self,
        input: CreateTemplateVersionRow,
    ) -> Result<TemplateVersionRow, StoreError> {
        let row = sqlx::query_as::<_, TemplateVersionRow>(
            r#"
            INSERT INTO workflow_template_versions (workflow_template_id, version, is_latest, manifest)
            VALUES ($1, $2, $3, $4)
            RETURNING id, workflow_template_id, version, is_latest, manifest, created_at
            "#,
        )
        .bind(input.workflow_template_id)
        .bind(input.version)
        .bind(input.is_latest)
        .bind(&input.manifest)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    /// Clear the latest flag on every version of a template
    #[instrument(skip(self))]
    pub async fn demote_versions(&mut self, template_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_template_versions
            SET is_latest = FALSE
            WHERE workflow_template_id = $1 AND is_latest
            "#,
        )
        .bind(template_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Highest version number recorded for a template
    #[instrument(skip(self))]
    pub async fn max_version(&mut self, template_id: i64) -> Result<Option<i64>, StoreError> {
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM workflow_template_versions
            WHERE workflow_template_id = $1
            "#,
        )
        .bind(template_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(max)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
