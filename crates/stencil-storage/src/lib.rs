// Storage adapters for workflow templates
//
// Relational side: PostgreSQL (production) or in-memory (dev mode), unified
// behind the StorageBackend enum. Cluster side: the ClusterStore trait with
// an HTTP client and an in-memory implementation.

pub mod backend;
pub mod cluster;
pub mod error;
pub mod memory;
pub mod models;
pub mod query;
pub mod repositories;

pub use backend::{StorageBackend, StorageTx};
pub use cluster::{
    ClusterError, ClusterObject, ClusterOp, ClusterStore, HttpClusterStore,
    HttpClusterStoreConfig, InMemoryClusterStore, ObjectMeta,
};
pub use error::StoreError;
pub use memory::InMemoryDatabase;
pub use models::*;
pub use repositories::Database;
