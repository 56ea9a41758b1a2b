//! Write-through point cache with dirty tracking.
//!
//! Every `set` is written to the backing store immediately. A store failure
//! does not fail the call: the point stays cached and dirty until a later
//! [`PointCache::flush`] succeeds.

use crate::error::{IndexError, Result};
use crate::storage::PointStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A cached vector and, once the codec is trained, its codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub vector: Vec<f32>,
    pub codes: Option<Vec<u8>>,
}

#[derive(Debug)]
struct Entry {
    point: Point,
    dirty: bool,
}

pub struct PointCache {
    entries: RwLock<HashMap<u64, Entry>>,
    store: Arc<dyn PointStore>,
}

impl std::fmt::Debug for PointCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCache")
            .field("len", &self.len())
            .field("dirty", &self.dirty_count())
            .finish()
    }
}

impl PointCache {
    pub fn new(store: Arc<dyn PointStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Caches `point` and writes it through to the store.
    ///
    /// The store write happens under the cache lock, so concurrent writes to
    /// one id land in the same order in both. Only serialization failures are
    /// returned; a rejected store write is logged and leaves the point dirty.
    pub fn set(&self, id: u64, point: Point) -> Result<()> {
        let bytes = bincode::serialize(&point)?;
        let mut entries = self.entries.write();
        let dirty = match self.store.put(id, &bytes) {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!(id, error = %e, "point store write failed, keeping point dirty");
                true
            }
        };
        entries.insert(id, Entry { point, dirty });
        Ok(())
    }

    /// Cached point, or the stored one on a miss. `NotFound` if absent in both.
    pub fn get(&self, id: u64) -> Result<Point> {
        if let Some(entry) = self.entries.read().get(&id) {
            return Ok(entry.point.clone());
        }
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&id) {
            return Ok(entry.point.clone());
        }
        let bytes = self.store.get(id)?.ok_or(IndexError::NotFound(id))?;
        let point: Point = bincode::deserialize(&bytes)?;
        entries.insert(
            id,
            Entry {
                point: point.clone(),
                dirty: false,
            },
        );
        Ok(point)
    }

    /// Checks every id before removing any; `NotFound` leaves all of them.
    ///
    /// A store failure stops at that id: earlier ids stay removed, the
    /// failing id and the rest stay cached.
    pub fn delete(&self, ids: &[u64]) -> Result<()> {
        let mut entries = self.entries.write();
        for &id in ids {
            if !entries.contains_key(&id) && self.store.get(id)?.is_none() {
                return Err(IndexError::NotFound(id));
            }
        }
        for &id in ids {
            self.store.delete(id)?;
            entries.remove(&id);
        }
        Ok(())
    }

    /// Writes every dirty point to the store. Returns how many were persisted.
    pub fn flush(&self) -> Result<usize> {
        let mut entries = self.entries.write();
        let mut flushed = 0;
        for (&id, entry) in entries.iter_mut().filter(|(_, e)| e.dirty) {
            let bytes = bincode::serialize(&entry.point)?;
            self.store.put(id, &bytes)?;
            entry.dirty = false;
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Replaces the codes of every cached point and marks them dirty.
    pub fn reencode<F>(&self, encode: F) -> Result<usize>
    where
        F: Fn(&[f32]) -> Result<Vec<u8>>,
    {
        let mut entries = self.entries.write();
        for entry in entries.values_mut() {
            entry.point.codes = Some(encode(&entry.point.vector)?);
            entry.dirty = true;
        }
        Ok(entries.len())
    }

    /// Copies of all cached points, ordered by id.
    pub fn points(&self) -> Vec<(u64, Point)> {
        let entries = self.entries.read();
        let mut out: Vec<(u64, Point)> = entries
            .iter()
            .map(|(&id, e)| (id, e.point.clone()))
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.entries.read().values().filter(|e| e.dirty).count()
    }

    pub fn is_dirty(&self, id: u64) -> bool {
        self.entries.read().get(&id).is_some_and(|e| e.dirty)
    }
}
