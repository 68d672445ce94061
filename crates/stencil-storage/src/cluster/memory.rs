// In-memory cluster store for dev mode and tests
// Decision: Mirror the API server's optimistic concurrency via resourceVersion

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use stencil_core::LabelSelector;
use uuid::Uuid;

use super::{ClusterError, ClusterObject, ClusterStore};

/// Cluster operation, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOp {
    Create,
    Update,
    Delete,
    Get,
    List,
}

#[derive(Default)]
pub struct InMemoryClusterStore {
    // (namespace, name) -> object
    objects: RwLock<BTreeMap<(String, String), ClusterObject>>,
    resource_version: AtomicU64,
    failures: Mutex<HashSet<ClusterOp>>,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with a transport error (for testing)
    pub fn fail_next(&self, op: ClusterOp) {
        self.failures.lock().insert(op);
    }

    fn check_failure(&self, op: ClusterOp) -> Result<(), ClusterError> {
        if self.failures.lock().remove(&op) {
            return Err(ClusterError::Transport(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn object_count(&self, namespace: &str) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .count()
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn create(
        &self,
        namespace: &str,
        mut object: ClusterObject,
    ) -> Result<ClusterObject, ClusterError> {
        self.check_failure(ClusterOp::Create)?;

        let key = (namespace.to_string(), object.metadata.name.clone());
        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return Err(ClusterError::Conflict(format!(
                "{} already exists",
                object.metadata.name
            )));
        }

        object.metadata.namespace = Some(namespace.to_string());
        object.metadata.resource_version = Some(self.next_resource_version());
        object.metadata.uid = Some(Uuid::now_v7().to_string());
        object.metadata.creation_timestamp = Some(Utc::now());
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(
        &self,
        namespace: &str,
        mut object: ClusterObject,
    ) -> Result<ClusterObject, ClusterError> {
        self.check_failure(ClusterOp::Update)?;

        let key = (namespace.to_string(), object.metadata.name.clone());
        let mut objects = self.objects.write();
        let Some(current) = objects.get(&key) else {
            return Err(ClusterError::NotFound(object.metadata.name.clone()));
        };

        if let Some(expected) = &object.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(expected) {
                return Err(ClusterError::Conflict(format!(
                    "{} was modified concurrently",
                    object.metadata.name
                )));
            }
        }

        object.metadata.namespace = Some(namespace.to_string());
        object.metadata.uid = current.metadata.uid.clone();
        object.metadata.creation_timestamp = current.metadata.creation_timestamp;
        object.metadata.resource_version = Some(self.next_resource_version());
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.check_failure(ClusterOp::Delete)?;

        self.objects
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<ClusterObject, ClusterError> {
        self.check_failure(ClusterOp::Get)?;

        self.objects
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClusterError> {
        self.check_failure(ClusterOp::List)?;

        // BTreeMap keys keep the result sorted by name
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|((ns, _), object)| ns == namespace && selector.matches(object.labels()))
            .map(|(_, object)| object.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_core::manifest;

    fn object(name: &str, labels: &[(&str, &str)]) -> ClusterObject {
        let envelope = manifest::wrap("entrypoint: main").unwrap();
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClusterObject::from_envelope(&envelope, name, "ns", labels, BTreeMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_server_metadata() {
        let store = InMemoryClusterStore::new();
        let created = store.create("ns", object("t1-v1", &[])).await.unwrap();

        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store.create("ns", object("t1-v1", &[])).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict(_)));

        // Same name in another namespace is a different object
        store.create("other", object("t1-v1", &[])).await.unwrap();
        assert_eq!(store.object_count("ns"), 1);
    }

    #[tokio::test]
    async fn test_update_checks_resource_version() {
        let store = InMemoryClusterStore::new();
        let created = store.create("ns", object("t1-v1", &[])).await.unwrap();

        let mut fresh = created.clone();
        fresh.metadata.labels.insert("k".to_string(), "v".to_string());
        let updated = store.update("ns", fresh).await.unwrap();
        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);

        // `created` now carries a stale resourceVersion
        let err = store.update("ns", created).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict(_)));

        let err = store.update("ns", object("missing", &[])).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let store = InMemoryClusterStore::new();
        store
            .create("ns", object("b-v1", &[("uid", "b"), ("latest", "true")]))
            .await
            .unwrap();
        store
            .create("ns", object("a-v2", &[("uid", "a"), ("latest", "true")]))
            .await
            .unwrap();
        store.create("ns", object("a-v1", &[("uid", "a")])).await.unwrap();

        let all_a = store
            .list("ns", &LabelSelector::new().eq("uid", "a"))
            .await
            .unwrap();
        let names: Vec<&str> = all_a.iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["a-v1", "a-v2"]);

        let latest = store
            .list("ns", &LabelSelector::new().eq("latest", "true"))
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);

        assert!(store
            .list("other", &LabelSelector::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = InMemoryClusterStore::new();
        store.fail_next(ClusterOp::Create);

        let err = store.create("ns", object("t1-v1", &[])).await.unwrap_err();
        assert!(matches!(err, ClusterError::Transport(_)));
        assert_eq!(store.object_count("ns"), 0);

        store.create("ns", object("t1-v1", &[])).await.unwrap();
        store.delete("ns", "t1-v1").await.unwrap();
        assert!(matches!(
            store.delete("ns", "t1-v1").await.unwrap_err(),
            ClusterError::NotFound(_)
        ));
    }
}
