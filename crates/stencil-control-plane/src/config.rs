// Control plane configuration
//
// Read from the environment (after dotenvy has loaded any .env file):
// - DATABASE_URL: PostgreSQL URL; unset runs the in-memory dev backend
// - DATABASE_MAX_CONNECTIONS: pool size (default: 5)
// - CLUSTER_API_URL: cluster API base URL; unset runs the in-memory cluster store
// - CLUSTER_TOKEN: bearer token for the cluster API
// - CLUSTER_TIMEOUT_SECS: cluster request timeout (default: 30)
// - TEMPLATE_VERSION_POLICY: "epoch" (default) or "monotonic"

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use stencil_core::VersionPolicy;
use stencil_storage::{
    ClusterStore, HttpClusterStore, HttpClusterStoreConfig, InMemoryClusterStore, StorageBackend,
};

use crate::services::TemplateService;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CLUSTER_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub cluster_api_url: Option<String>,
    pub cluster_token: Option<String>,
    pub cluster_timeout: Duration,
    pub version_policy: VersionPolicy,
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS must be a number, got {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let cluster_timeout_secs = match get("CLUSTER_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("CLUSTER_TIMEOUT_SECS must be a number, got {raw}"))?,
            None => DEFAULT_CLUSTER_TIMEOUT_SECS,
        };

        let version_policy = match get("TEMPLATE_VERSION_POLICY") {
            Some(raw) => raw
                .parse::<VersionPolicy>()
                .map_err(anyhow::Error::msg)
                .context("invalid TEMPLATE_VERSION_POLICY")?,
            None => VersionPolicy::default(),
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections,
            cluster_api_url: get("CLUSTER_API_URL"),
            cluster_token: get("CLUSTER_TOKEN"),
            cluster_timeout: Duration::from_secs(cluster_timeout_secs),
            version_policy,
        })
    }

    /// Connect the relational backend
    pub async fn storage(&self) -> Result<StorageBackend> {
        match &self.database_url {
            Some(url) => {
                let backend = StorageBackend::postgres(url, self.database_max_connections)
                    .await
                    .context("Failed to connect to database")?;
                tracing::info!("Connected to database");
                Ok(backend)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage (dev mode)");
                Ok(StorageBackend::in_memory())
            }
        }
    }

    pub fn cluster(&self) -> Result<Arc<dyn ClusterStore>> {
        match &self.cluster_api_url {
            Some(url) => {
                let store = HttpClusterStore::new(HttpClusterStoreConfig {
                    base_url: url.clone(),
                    token: self.cluster_token.clone(),
                    timeout: self.cluster_timeout,
                })
                .context("Failed to build cluster API client")?;
                tracing::info!(url = %url, "Using cluster API");
                Ok(Arc::new(store))
            }
            None => {
                tracing::warn!("CLUSTER_API_URL not set, using in-memory cluster store (dev mode)");
                Ok(Arc::new(InMemoryClusterStore::new()))
            }
        }
    }

    /// Wire a TemplateService from this configuration
    pub async fn template_service(&self) -> Result<TemplateService> {
        let storage = self.storage().await?;
        let cluster = self.cluster()?;
        Ok(TemplateService::new(storage, cluster).with_policy(self.version_policy))
    }
}
