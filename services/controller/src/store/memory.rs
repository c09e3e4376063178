//! In-memory resource store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{prepare_create, prepare_delete, prepare_update, ResourceStore, StoreResult, Write};
use crate::model::Resource;

/// Process-local store, used by tests and the fake-cloud development mode.
pub struct MemoryStore<T> {
    objects: RwLock<BTreeMap<String, T>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T: Resource> ResourceStore<T> for MemoryStore<T> {
    async fn create(&self, resource: T) -> StoreResult<T> {
        let mut objects = self.objects.write().await;
        let resource = prepare_create(objects.get(resource.name()), resource)?;
        objects.insert(resource.name().to_string(), resource.clone());
        Ok(resource)
    }

    async fn get(&self, name: &str) -> StoreResult<Option<T>> {
        Ok(self.objects.read().await.get(name).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<T>> {
        Ok(self.objects.read().await.values().cloned().collect())
    }

    async fn update(&self, resource: T) -> StoreResult<Option<T>> {
        let mut objects = self.objects.write().await;
        let name = resource.name().to_string();
        match prepare_update(objects.get(&name), resource)? {
            Write::Put(resource) => {
                objects.insert(name, resource.clone());
                Ok(Some(resource))
            }
            Write::Remove => {
                objects.remove(&name);
                Ok(None)
            }
        }
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        match prepare_delete(objects.get(name).cloned(), name)? {
            Write::Put(resource) => {
                objects.insert(name.to_string(), resource);
            }
            Write::Remove => {
                objects.remove(name);
            }
        }
        Ok(())
    }
}
