// Storage backend abstraction
// Decision: Use enum dispatch for simplicity over trait objects
//
// This module provides a unified StorageBackend enum that can work with
// either PostgreSQL (production) or in-memory (dev mode) storage.

use std::sync::Arc;

use stencil_core::{Pagination, VersionSelector};

use crate::error::StoreError;
use crate::memory::{InMemoryDatabase, InMemoryTx};
use crate::models::*;
use crate::repositories::{Database, PgTemplateTx};

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory database (dev mode)
    InMemory(Arc<InMemoryDatabase>),
}

impl StorageBackend {
    /// Create a PostgreSQL storage backend from a database URL
    pub async fn postgres(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let db = Database::from_url(database_url, max_connections).await?;
        Ok(Self::Postgres(db))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryDatabase::new()))
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Open a transaction for multi-statement writes
    pub async fn begin(&self) -> Result<StorageTx, StoreError> {
        match self {
            Self::Postgres(db) => Ok(StorageTx::Postgres(db.begin().await?)),
            Self::InMemory(db) => Ok(StorageTx::InMemory(db.begin())),
        }
    }

    // ============================================
    // Templates
    // ============================================

    pub async fn get_template(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Option<TemplateRow>, StoreError> {
        match self {
            Self::Postgres(db) => db.get_template(namespace, uid).await,
            Self::InMemory(db) => db.get_template(namespace, uid).await,
        }
    }

    pub async fn get_template_version(
        &self,
        namespace: &str,
        uid: &str,
        version: VersionSelector,
    ) -> Result<Option<TemplateWithVersionRow>, StoreError> {
        match self {
            Self::Postgres(db) => db.get_template_version(namespace, uid, version).await,
            Self::InMemory(db) => db.get_template_version(namespace, uid, version).await,
        }
    }

    pub async fn get_template_by_name(
        &self,
        namespace: &str,
        name: &str,
        version: VersionSelector,
    ) -> Result<Option<TemplateWithVersionRow>, StoreError> {
        match self {
            Self::Postgres(db) => db.get_template_by_name(namespace, name, version).await,
            Self::InMemory(db) => db.get_template_by_name(namespace, name, version).await,
        }
    }

    pub async fn list_template_versions(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Vec<TemplateVersionRow>, StoreError> {
        match self {
            Self::Postgres(db) => db.list_template_versions(namespace, uid).await,
            Self::InMemory(db) => db.list_template_versions(namespace, uid).await,
        }
    }

    pub async fn list_templates(
        &self,
        namespace: &str,
        page: Option<Pagination>,
    ) -> Result<Vec<TemplateSummaryRow>, StoreError> {
        match self {
            Self::Postgres(db) => db.list_templates(namespace, page).await,
            Self::InMemory(db) => db.list_templates(namespace, page).await,
        }
    }

    pub async fn archive_template(&self, namespace: &str, uid: &str) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(db) => db.archive_template(namespace, uid).await,
            Self::InMemory(db) => db.archive_template(namespace, uid).await,
        }
    }

    // ============================================
    // Execution statistics
    // ============================================

    pub async fn execution_statistics(
        &self,
        template_ids: &[i64],
    ) -> Result<Vec<ExecutionStatisticRow>, StoreError> {
        match self {
            Self::Postgres(db) => db.execution_statistics(template_ids).await,
            Self::InMemory(db) => db.execution_statistics(template_ids).await,
        }
    }
}

/// Open transaction on either backend
pub enum StorageTx {
    Postgres(PgTemplateTx),
    InMemory(InMemoryTx),
}

impl StorageTx {
    pub async fn insert_template(
        &mut self,
        input: CreateTemplateRow,
    ) -> Result<TemplateRow, StoreError> {
        match self {
            Self::Postgres(tx) => tx.insert_template(input).await,
            Self::InMemory(tx) => tx.insert_template(input).await,
        }
    }

    pub async fn insert_version(
        &mut self,
        input: CreateTemplateVersionRow,
    ) -> Result<TemplateVersionRow, StoreError> {
        match self {
            Self::Postgres(tx) => tx.insert_version(input).await,
            Self::InMemory(tx) => tx.insert_version(input).await,
        }
    }

    pub async fn demote_versions(&mut self, template_id: i64) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(tx) => tx.demote_versions(template_id).await,
            Self::InMemory(tx) => tx.demote_versions(template_id).await,
        }
    }

    pub async fn max_version(&mut self, template_id: i64) -> Result<Option<i64>, StoreError> {
        match self {
            Self::Postgres(tx) => tx.max_version(template_id).await,
            Self::InMemory(tx) => tx.max_version(template_id).await,
        }
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.commit().await,
            Self::InMemory(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        match self {
            Self::Postgres(tx) => tx.rollback().await,
            Self::InMemory(tx) => tx.rollback().await,
        }
    }
}
