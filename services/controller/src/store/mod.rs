//! Resource store: the controller's view of declared state.
//!
//! Every write is guarded by the resource's version token. A writer that
//! read version `n` can only store its change if the stored copy is still at
//! `n`; otherwise it gets [`StoreError::Conflict`] and must re-read.
//!
//! Deletion follows the finalizer convention. `delete` only stamps
//! `deletion_timestamp` while finalizers remain; the object disappears on
//! the first update that leaves it with no finalizers.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::model::{Catalog, Resource, Service};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {name} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: &'static str,
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Versioned storage for one resource kind.
#[async_trait]
pub trait ResourceStore<T: Resource>: Send + Sync {
    /// Store a new resource at version 1.
    async fn create(&self, resource: T) -> StoreResult<T>;

    async fn get(&self, name: &str) -> StoreResult<Option<T>>;

    async fn list(&self) -> StoreResult<Vec<T>>;

    /// Replace a resource. Returns `None` when the write released the last
    /// finalizer of a resource pending deletion and the resource is gone.
    async fn update(&self, resource: T) -> StoreResult<Option<T>>;

    /// Request deletion.
    async fn delete(&self, name: &str) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()> {
        self.list().await.map(|_| ())
    }
}

/// Outcome of applying a write to the stored copy.
pub(crate) enum Write<T> {
    Put(T),
    Remove,
}

pub(crate) fn prepare_create<T: Resource>(existing: Option<&T>, mut resource: T) -> StoreResult<T> {
    if existing.is_some() {
        return Err(StoreError::AlreadyExists {
            kind: T::KIND,
            name: resource.name().to_string(),
        });
    }
    resource.meta_mut().version = 1;
    Ok(resource)
}

pub(crate) fn prepare_update<T: Resource>(current: Option<&T>, mut resource: T) -> StoreResult<Write<T>> {
    let Some(current) = current else {
        return Err(StoreError::NotFound {
            kind: T::KIND,
            name: resource.name().to_string(),
        });
    };

    let expected = resource.meta().version;
    let actual = current.meta().version;
    if expected != actual {
        return Err(StoreError::Conflict {
            kind: T::KIND,
            name: resource.name().to_string(),
            expected,
            actual,
        });
    }

    // Deletion is requested through `delete`, never by an update.
    resource.meta_mut().deletion_timestamp = current.meta().deletion_timestamp;

    let meta = resource.meta();
    if meta.deletion_timestamp.is_some() && meta.finalizers.is_empty() {
        return Ok(Write::Remove);
    }

    resource.meta_mut().version = actual + 1;
    Ok(Write::Put(resource))
}

pub(crate) fn prepare_delete<T: Resource>(current: Option<T>, name: &str) -> StoreResult<Write<T>> {
    let Some(mut current) = current else {
        return Err(StoreError::NotFound {
            kind: T::KIND,
            name: name.to_string(),
        });
    };

    if current.meta().finalizers.is_empty() {
        return Ok(Write::Remove);
    }

    let meta = current.meta_mut();
    if meta.deletion_timestamp.is_none() {
        meta.deletion_timestamp = Some(Utc::now());
        meta.version += 1;
    }
    Ok(Write::Put(current))
}

/// Names of the services created from a catalog, including ones still
/// being torn down.
pub async fn referencing_services(
    services: &dyn ResourceStore<Service>,
    catalog: &Catalog,
) -> StoreResult<Vec<String>> {
    let name = catalog.name();
    Ok(services
        .list()
        .await?
        .into_iter()
        .filter(|s| s.spec.catalog == name || s.metadata.is_owned_by(Catalog::KIND, name))
        .map(|s| s.metadata.name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_versions() {
        let err = StoreError::Conflict {
            kind: "Service",
            name: "devbox".into(),
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Service devbox was modified concurrently (expected version 3, found 4)"
        );
    }
}
