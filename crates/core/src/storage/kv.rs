//! Byte-oriented key/value store for codec points.
//!
//! The codec cache writes serialized points through to a [`PointStore`] and
//! falls back to it on cache misses. [`MemoryPointStore`] is the default; an
//! embedding application can plug in its own disk-backed table.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Durable home for serialized points, keyed by node id.
pub trait PointStore: Send + Sync {
    fn put(&self, id: u64, bytes: &[u8]) -> Result<()>;

    /// `Ok(None)` when the id has never been stored.
    fn get(&self, id: u64) -> Result<Option<Vec<u8>>>;

    /// Deleting an absent id is not an error.
    fn delete(&self, id: u64) -> Result<()>;
}

/// In-memory [`PointStore`].
#[derive(Debug, Default)]
pub struct MemoryPointStore {
    entries: RwLock<HashMap<u64, Vec<u8>>>,
}

impl MemoryPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PointStore for MemoryPointStore {
    fn put(&self, id: u64, bytes: &[u8]) -> Result<()> {
        self.entries.write().insert(id, bytes.to_vec());
        Ok(())
    }

    fn get(&self, id: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(&id).cloned())
    }

    fn delete(&self, id: u64) -> Result<()> {
        self.entries.write().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_put_get_delete() {
        let store = MemoryPointStore::new();
        assert!(store.is_empty());
        store.put(1, b"abc").unwrap();
        store.put(1, b"xyz").unwrap();
        assert_eq!(store.get(1).unwrap().as_deref(), Some(&b"xyz"[..]));
        assert_eq!(store.len(), 1);
        store.delete(1).unwrap();
        store.delete(1).unwrap();
        assert_eq!(store.get(1).unwrap(), None);
    }
}
