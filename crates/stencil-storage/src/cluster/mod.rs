//! Cluster store adapter
//!
//! The cluster holds one custom resource per template version, named
//! `<slug>-v<version>` and carrying the identity, version and latest-marker
//! labels. Objects are only ever addressed by namespace plus name or by an
//! equality label selector.

mod http;
mod memory;

pub use http::{HttpClusterStore, HttpClusterStoreConfig};
pub use memory::{ClusterOp, InMemoryClusterStore};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stencil_core::LabelSelector;

/// Error type for cluster store operations
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// No object with that name
    #[error("workflow template {0} not found in cluster")]
    NotFound(String),

    /// Name already taken, or stale resourceVersion on update
    #[error("cluster conflict: {0}")]
    Conflict(String),

    /// Cluster API answered with a non-success status
    #[error("cluster API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Request never got an answer
    #[error("cluster transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for ClusterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClusterError::Serialization(err.to_string())
        } else {
            ClusterError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Optimistic concurrency token assigned by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// A WorkflowTemplate custom resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObject {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
}

impl ClusterObject {
    /// Build an object from a wrapped manifest envelope, filling in the
    /// metadata the envelope leaves empty.
    pub fn from_envelope(
        envelope: &[u8],
        name: impl Into<String>,
        namespace: impl Into<String>,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<Self, ClusterError> {
        let mut object: ClusterObject = serde_json::from_slice(envelope)
            .map_err(|e| ClusterError::Serialization(e.to_string()))?;
        object.metadata = ObjectMeta {
            name: name.into(),
            namespace: Some(namespace.into()),
            labels,
            annotations,
            ..Default::default()
        };
        Ok(object)
    }

    /// Drop server-assigned fields so the object can be submitted as new.
    pub fn strip_server_metadata(&mut self) {
        self.metadata.resource_version = None;
        self.metadata.uid = None;
        self.metadata.creation_timestamp = None;
        self.metadata.self_link = None;
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }
}

/// Label-addressed object storage in the cluster
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn create(&self, namespace: &str, object: ClusterObject)
        -> Result<ClusterObject, ClusterError>;

    /// Replace an object; a stale resourceVersion is a conflict.
    async fn update(&self, namespace: &str, object: ClusterObject)
        -> Result<ClusterObject, ClusterError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<ClusterObject, ClusterError>;

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClusterError>;
}
