//! Named collection of indexes.
//!
//! The manager owns one [`HnswIndex`] per name and hands out cheap clonable
//! [`IndexHandle`]s. Every index operation routed through it runs inside a
//! single unwind boundary: a panic becomes [`IndexError::Internal`] instead
//! of tearing down the caller's thread.

use crate::error::{IndexError, Result};
use crate::hnsw::{HnswIndex, IndexConfig, IndexSnapshot, SearchResult};
use crate::storage::{MemoryPointStore, PointStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type StoreFactory = dyn Fn(&str) -> Arc<dyn PointStore> + Send + Sync;

/// Shared reference to a managed index.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    name: Arc<str>,
    index: Arc<HnswIndex>,
}

impl IndexHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &HnswIndex {
        &self.index
    }
}

pub struct CollectionManager {
    indexes: RwLock<HashMap<String, IndexHandle>>,
    stores: Box<StoreFactory>,
}

impl std::fmt::Debug for CollectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionManager")
            .field("indexes", &self.list())
            .finish()
    }
}

impl Default for CollectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionManager {
    /// Manager whose indexes keep codec points in memory.
    pub fn new() -> Self {
        Self::with_store_factory(|_| Arc::new(MemoryPointStore::new()))
    }

    /// `factory` supplies the point store for each index by name.
    pub fn with_store_factory<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn PointStore> + Send + Sync + 'static,
    {
        Self {
            indexes: RwLock::new(HashMap::new()),
            stores: Box::new(factory),
        }
    }

    /// Creates an index. `Config` if the name is taken or the config is invalid.
    pub fn create_index(&self, name: &str, config: IndexConfig) -> Result<IndexHandle> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(name) {
            return Err(IndexError::config(format!("index '{name}' already exists")));
        }
        let index = guarded("create", name, || {
            HnswIndex::with_store(config, (self.stores)(name))
        })?;
        let handle = IndexHandle {
            name: Arc::from(name),
            index: Arc::new(index),
        };
        indexes.insert(name.to_string(), handle.clone());
        tracing::info!(
            index = name,
            dimension = handle.index.dimension(),
            metric = handle.index.metric().name(),
            "index created"
        );
        Ok(handle)
    }

    pub fn insert(&self, handle: &IndexHandle, id: u64, vector: &[f32]) -> Result<()> {
        guarded("insert", &handle.name, || handle.index.insert(id, vector))
    }

    pub fn search(
        &self,
        handle: &IndexHandle,
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<SearchResult>> {
        guarded("search", &handle.name, || handle.index.search(query, k, ef))
    }

    /// Replaces the vector under `id`. `NotFound` if the id is absent.
    pub fn update(&self, handle: &IndexHandle, id: u64, vector: &[f32]) -> Result<()> {
        guarded("update", &handle.name, || handle.index.update(id, vector))
    }

    pub fn delete(&self, handle: &IndexHandle, id: u64) -> Result<()> {
        guarded("delete", &handle.name, || handle.index.delete(id))
    }

    /// Forgets the index. Outstanding handles keep it alive until dropped.
    pub fn drop_index(&self, name: &str) -> bool {
        let dropped = self.indexes.write().remove(name).is_some();
        if dropped {
            tracing::info!(index = name, "index dropped");
        }
        dropped
    }

    pub fn get(&self, name: &str) -> Option<IndexHandle> {
        self.indexes.read().get(name).cloned()
    }

    /// Index names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Serialized full-state snapshot of the index.
    pub fn export(&self, handle: &IndexHandle) -> Result<Vec<u8>> {
        guarded("export", &handle.name, || handle.index.export().to_bytes())
    }

    /// Rebuilds an index from [`export`](Self::export) bytes under `name`,
    /// replacing any index already registered there.
    pub fn import(&self, name: &str, bytes: &[u8]) -> Result<IndexHandle> {
        let index = guarded("import", name, || {
            let snapshot = IndexSnapshot::from_bytes(bytes)?;
            HnswIndex::import(snapshot, (self.stores)(name))
        })?;
        let handle = IndexHandle {
            name: Arc::from(name),
            index: Arc::new(index),
        };
        let replaced = self
            .indexes
            .write()
            .insert(name.to_string(), handle.clone())
            .is_some();
        tracing::info!(index = name, nodes = handle.index.len(), replaced, "index imported");
        Ok(handle)
    }
}

/// Runs `f`, turning a panic into `Internal`.
fn guarded<T>(op: &str, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(op, index = name, panic = %msg, "caught panic in index operation");
            Err(IndexError::Internal(format!("{op} on '{name}' panicked: {msg}")))
        }
    }
}
