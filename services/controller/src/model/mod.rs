//! Declared resources reconciled by the controller.
//!
//! Both kinds share [`ObjectMeta`], which carries the store's
//! optimistic-concurrency version and the deletion-timestamp + finalizer
//! convention. The deletion half of that convention is surfaced as an
//! explicit [`Lifecycle`] so the reconcilers never read raw timestamps.

mod catalog;
mod service;

pub use catalog::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Deletion lifecycle of a stored resource, independent of its business state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No deletion requested.
    Active,

    /// Deletion requested; external side effects may remain.
    PendingDeletion,
}

/// Reference from a dependent resource to the resource it was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

/// Metadata common to every stored resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    pub uid: Uuid,

    /// Version token; bumped by the store on every successful write.
    #[serde(default)]
    pub version: u64,

    pub creation_timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Fresh metadata for a resource that has not been stored yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Uuid::new_v4(),
            version: 0,
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            finalizers: Vec::new(),
            owner_references: Vec::new(),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.deletion_timestamp.is_some() {
            Lifecycle::PendingDeletion
        } else {
            Lifecycle::Active
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns false if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer. Returns false if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    pub fn is_owned_by(&self, kind: &str, name: &str) -> bool {
        self.owner_references
            .iter()
            .any(|o| o.kind == kind && o.name == name)
    }

    /// Record an owner reference. Returns false if it was already present.
    pub fn set_owner(&mut self, kind: &str, name: &str) -> bool {
        if self.is_owned_by(kind, name) {
            return false;
        }
        self.owner_references.push(OwnerReference {
            kind: kind.to_string(),
            name: name.to_string(),
        });
        true
    }
}

/// A kind of resource the store can hold.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind name, used as the store partition key.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }
}
