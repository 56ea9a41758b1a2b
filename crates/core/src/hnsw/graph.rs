//! HNSW graph storage and configuration.
//!
//! [`HnswConfig`] holds the graph tuning parameters and [`IndexConfig`] ties
//! them to a dimension, a metric name and optional quantizer parameters.
//! [`GraphStore`] is the node arena: slots addressed by `u32`, an id → slot
//! map, a free list of recycled slots and the entry point.

use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::quantization::QuantizerParams;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Neighbor selection policy used on insert and when pruning an overfull list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborSelection {
    /// Keep the closest candidates.
    Simple,
    /// Keep a candidate only if no kept neighbor is closer to it than the base is.
    Heuristic {
        /// Also consider the neighbors of each candidate (insert only).
        extend_candidates: bool,
        /// Fill remaining room with rejected candidates, closest first.
        keep_pruned: bool,
    },
}

impl Default for NeighborSelection {
    fn default() -> Self {
        NeighborSelection::Heuristic {
            extend_candidates: false,
            keep_pruned: true,
        }
    }
}

/// Configuration parameters for an HNSW graph.
///
/// Controls the trade-off between build speed, search speed, recall, and memory usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Neighbors selected for a new node on each of its layers.
    pub m: usize,
    /// Adjacency cap above layer 0.
    pub m_max: usize,
    /// Adjacency cap at layer 0.
    pub m_max0: usize,
    /// Beam width during construction.
    pub ef_construction: usize,
    /// Beam width used by [`HnswIndex::search_default`](crate::hnsw::HnswIndex::search_default).
    pub ef_search: usize,
    pub max_layers: usize,
    pub selection: NeighborSelection,
    /// Keep f32 vectors on nodes after the codec is trained and rerank results exactly.
    pub store_raw_vectors: bool,
    /// Seed for layer assignment. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max: config::HNSW_DEFAULT_M_MAX,
            m_max0: config::HNSW_DEFAULT_M_MAX0,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            selection: NeighborSelection::default(),
            store_raw_vectors: false,
            seed: None,
        }
    }
}

impl HnswConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(IndexError::config(format!("m must be at least 2, got {}", self.m)));
        }
        if self.m > self.m_max || self.m > self.m_max0 {
            return Err(IndexError::config(format!(
                "m ({}) must not exceed m_max ({}) or m_max0 ({})",
                self.m, self.m_max, self.m_max0
            )));
        }
        if self.ef_construction == 0 {
            return Err(IndexError::config("ef_construction must be at least 1"));
        }
        if self.max_layers == 0 {
            return Err(IndexError::config("max_layers must be at least 1"));
        }
        Ok(())
    }

    /// Adjacency cap for `layer`.
    #[inline]
    pub fn cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m_max
        }
    }
}

/// Everything needed to build an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub dimension: usize,
    /// Metric name; unknown names resolve to euclidean.
    pub metric: String,
    pub hnsw: HnswConfig,
    /// Product quantization parameters. `None` disables compression.
    pub quantizer: Option<QuantizerParams>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            metric: DistanceMetric::DEFAULT.name().to_string(),
            hnsw: HnswConfig::default(),
            quantizer: None,
        }
    }
}

impl IndexConfig {
    pub fn new(dimension: usize, metric: &str) -> Self {
        Self {
            dimension,
            metric: metric.to_string(),
            ..Self::default()
        }
    }

    pub fn with_quantizer(mut self, params: QuantizerParams) -> Self {
        self.quantizer = Some(params);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > config::MAX_DIMENSION {
            return Err(IndexError::config(format!(
                "dimension must be between 1 and {}, got {}",
                config::MAX_DIMENSION,
                self.dimension
            )));
        }
        self.hnsw.validate()
    }

    pub fn distance_metric(&self) -> DistanceMetric {
        DistanceMetric::from_name(&self.metric)
    }
}

/// Draws node layers from `floor(-ln(U) / ln(M))`, capped at `max_layers - 1`.
#[derive(Debug)]
pub struct LevelGenerator {
    rng: Mutex<StdRng>,
    multiplier: f64,
    max_level: usize,
}

impl LevelGenerator {
    pub fn new(m: usize, max_layers: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            multiplier: 1.0 / (m.max(2) as f64).ln(),
            max_level: max_layers.saturating_sub(1),
        }
    }

    pub fn next_level(&self) -> usize {
        // gen() is in [0, 1); flip it to (0, 1] so ln never sees zero.
        let u = 1.0 - self.rng.lock().gen::<f64>();
        let level = (-u.ln() * self.multiplier).floor() as usize;
        level.min(self.max_level)
    }
}

/// A graph node. Vector and codes are immutable once published; adjacency
/// is guarded by the node's own lock.
#[derive(Debug)]
pub struct Node {
    pub id: u64,
    pub layer: usize,
    pub vector: Option<Box<[f32]>>,
    pub codes: Option<Box<[u8]>>,
    links: RwLock<Vec<Vec<u32>>>,
    tombstoned: AtomicBool,
}

impl Node {
    /// `links` is padded or truncated to one list per layer `0..=layer`.
    pub fn new(
        id: u64,
        layer: usize,
        vector: Option<Box<[f32]>>,
        codes: Option<Box<[u8]>>,
        mut links: Vec<Vec<u32>>,
    ) -> Self {
        links.resize_with(layer + 1, Vec::new);
        Self {
            id,
            layer,
            vector,
            codes,
            links: RwLock::new(links),
            tombstoned: AtomicBool::new(false),
        }
    }

    /// Copy of this node with a new payload and the same adjacency.
    pub fn with_payload(&self, vector: Option<Box<[f32]>>, codes: Option<Box<[u8]>>) -> Self {
        let node = Node::new(self.id, self.layer, vector, codes, self.links.read().clone());
        if self.is_tombstoned() {
            node.tombstone();
        }
        node
    }

    /// Neighbors at `layer`, copied out so no lock outlives the call.
    pub fn neighbors(&self, layer: usize) -> Vec<u32> {
        self.links.read().get(layer).cloned().unwrap_or_default()
    }

    pub fn links(&self) -> RwLockReadGuard<'_, Vec<Vec<u32>>> {
        self.links.read()
    }

    pub fn links_mut(&self) -> RwLockWriteGuard<'_, Vec<Vec<u32>>> {
        self.links.write()
    }

    pub fn tombstone(&self) {
        self.tombstoned.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned.load(Ordering::Acquire)
    }
}

/// Top of the hierarchy: the slot searches start from and its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub slot: u32,
    pub layer: usize,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Option<Arc<Node>>>,
    ids: HashMap<u64, u32>,
    free: Vec<u32>,
    entry: Option<EntryPoint>,
}

impl Arena {
    fn place(&mut self, node: Node) -> Result<u32> {
        if self.ids.contains_key(&node.id) {
            return Err(IndexError::AlreadyExists(node.id));
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = u32::try_from(self.slots.len())
                    .map_err(|_| IndexError::config("graph is full: slot space exhausted"))?;
                self.slots.push(None);
                slot
            }
        };
        self.ids.insert(node.id, slot);
        self.slots[slot as usize] = Some(Arc::new(node));
        Ok(slot)
    }
}

/// Node arena. The lock is held only for lookups, publish, and entry updates.
#[derive(Debug, Default)]
pub struct GraphStore {
    arena: RwLock<Arena>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn node(&self, slot: u32) -> Option<Arc<Node>> {
        self.arena.read().slots.get(slot as usize).cloned().flatten()
    }

    pub fn slot_of(&self, id: u64) -> Option<u32> {
        self.arena.read().ids.get(&id).copied()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.arena.read().ids.contains_key(&id)
    }

    pub fn entry(&self) -> Option<EntryPoint> {
        self.arena.read().entry
    }

    /// Number of slots ever allocated, live or free.
    pub fn slot_count(&self) -> usize {
        self.arena.read().slots.len()
    }

    pub fn len(&self) -> usize {
        self.arena.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free_slots(&self) -> usize {
        self.arena.read().free.len()
    }

    /// Stores a fully linked node. `AlreadyExists` if the id is live.
    pub fn publish(&self, node: Node) -> Result<u32> {
        self.arena.write().place(node)
    }

    /// Publishes the node built by `make` as the sole entry point if the
    /// graph has none. Returns `None` when an entry point already exists.
    pub fn publish_first(&self, make: impl FnOnce() -> Node) -> Result<Option<u32>> {
        let mut arena = self.arena.write();
        if arena.entry.is_some() {
            return Ok(None);
        }
        let node = make();
        let layer = node.layer;
        let slot = arena.place(node)?;
        arena.entry = Some(EntryPoint { slot, layer });
        tracing::debug!(slot, layer, "entry point set on empty graph");
        Ok(Some(slot))
    }

    /// Makes `slot` the entry point if `layer` is above the current top.
    pub fn promote_entry(&self, slot: u32, layer: usize) {
        let mut arena = self.arena.write();
        if arena.entry.map_or(true, |e| layer > e.layer) {
            arena.entry = Some(EntryPoint { slot, layer });
            tracing::debug!(slot, layer, "entry point promoted");
        }
    }

    pub fn set_entry(&self, entry: Option<EntryPoint>) {
        self.arena.write().entry = entry;
    }

    /// Swaps the node in a live slot, keeping the id mapping.
    pub fn replace(&self, slot: u32, node: Arc<Node>) -> Result<()> {
        let mut arena = self.arena.write();
        let cell = arena
            .slots
            .get_mut(slot as usize)
            .filter(|cell| cell.is_some())
            .ok_or_else(|| IndexError::Internal(format!("cannot replace empty slot {slot}")))?;
        *cell = Some(node);
        Ok(())
    }

    /// Empties `slot`, forgets its id and queues it for reuse.
    pub fn release(&self, slot: u32) -> Option<Arc<Node>> {
        let mut arena = self.arena.write();
        let node = arena.slots.get_mut(slot as usize)?.take()?;
        arena.ids.remove(&node.id);
        arena.free.push(slot);
        Some(node)
    }

    /// Live nodes in slot order.
    pub fn live_nodes(&self) -> Vec<(u32, Arc<Node>)> {
        self.arena
            .read()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, n)| n.as_ref().map(|n| (slot as u32, Arc::clone(n))))
            .collect()
    }

    /// Free list, in pop order reversed.
    pub fn free_list(&self) -> Vec<u32> {
        self.arena.read().free.clone()
    }

    /// Rebuilds an arena from raw parts. Callers validate the layout.
    pub(crate) fn from_parts(
        slots: Vec<Option<Node>>,
        free: Vec<u32>,
        entry: Option<EntryPoint>,
    ) -> Result<Self> {
        let mut ids = HashMap::with_capacity(slots.len());
        for (slot, node) in slots.iter().enumerate() {
            if let Some(node) = node {
                if ids.insert(node.id, slot as u32).is_some() {
                    return Err(IndexError::Corrupted(format!("duplicate id {}", node.id)));
                }
            }
        }
        let slots = slots.into_iter().map(|n| n.map(Arc::new)).collect();
        Ok(Self {
            arena: RwLock::new(Arena {
                slots,
                ids,
                free,
                entry,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, layer: usize) -> Node {
        Node::new(id, layer, Some(vec![id as f32].into_boxed_slice()), None, Vec::new())
    }

    #[test]
    fn test_config_validation() {
        assert!(HnswConfig::default().validate().is_ok());
        let bad = HnswConfig { m: 1, ..HnswConfig::default() };
        assert!(matches!(bad.validate(), Err(IndexError::Config(_))));
        let bad = HnswConfig { m: 20, m_max: 16, ..HnswConfig::default() };
        assert!(bad.validate().is_err());
        let bad = HnswConfig { ef_construction: 0, ..HnswConfig::default() };
        assert!(bad.validate().is_err());
        let bad = HnswConfig { max_layers: 0, ..HnswConfig::default() };
        assert!(bad.validate().is_err());
        assert!(IndexConfig::new(0, "l2").validate().is_err());
        assert!(IndexConfig::new(config::MAX_DIMENSION + 1, "l2").validate().is_err());
    }

    #[test]
    fn test_partial_json_config() {
        let cfg: IndexConfig =
            serde_json::from_str(r#"{"dimension": 8, "hnsw": {"m": 8}}"#).unwrap();
        assert_eq!(cfg.dimension, 8);
        assert_eq!(cfg.hnsw.m, 8);
        assert_eq!(cfg.hnsw.m_max0, config::HNSW_DEFAULT_M_MAX0);
        assert_eq!(cfg.distance_metric(), DistanceMetric::Euclidean);
        assert!(cfg.quantizer.is_none());
    }

    #[test]
    fn test_cap_per_layer() {
        let cfg = HnswConfig::default();
        assert_eq!(cfg.cap(0), config::HNSW_DEFAULT_M_MAX0);
        assert_eq!(cfg.cap(3), config::HNSW_DEFAULT_M_MAX);
    }

    #[test]
    fn test_level_distribution() {
        let gen = LevelGenerator::new(16, 16, Some(42));
        let levels: Vec<usize> = (0..10_000).map(|_| gen.next_level()).collect();
        let zero = levels.iter().filter(|&&l| l == 0).count();
        // P(level 0) = 1 - 1/M = 0.9375
        assert!(zero > 9_000 && zero < 9_700, "level-0 count {zero}");
        assert!(levels.iter().all(|&l| l < 16));
    }

    #[test]
    fn test_level_cap() {
        let gen = LevelGenerator::new(2, 1, Some(1));
        assert!((0..1000).all(|_| gen.next_level() == 0));
    }

    #[test]
    fn test_seeded_levels_repeat() {
        let a = LevelGenerator::new(4, 8, Some(9));
        let b = LevelGenerator::new(4, 8, Some(9));
        let la: Vec<usize> = (0..100).map(|_| a.next_level()).collect();
        let lb: Vec<usize> = (0..100).map(|_| b.next_level()).collect();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_publish_and_duplicate() {
        let g = GraphStore::new();
        assert_eq!(g.publish_first(|| node(1, 2)).unwrap(), Some(0));
        assert_eq!(g.publish_first(|| node(2, 0)).unwrap(), None);
        assert_eq!(g.entry(), Some(EntryPoint { slot: 0, layer: 2 }));
        assert_eq!(g.publish(node(2, 0)).unwrap(), 1);
        assert!(matches!(g.publish(node(2, 0)), Err(IndexError::AlreadyExists(2))));
        assert_eq!(g.len(), 2);
        assert_eq!(g.node(1).unwrap().links().len(), 1);
    }

    #[test]
    fn test_release_recycles_slot() {
        let g = GraphStore::new();
        g.publish(node(1, 0)).unwrap();
        g.publish(node(2, 0)).unwrap();
        let released = g.release(0).unwrap();
        assert_eq!(released.id, 1);
        assert!(!g.contains(1));
        assert_eq!(g.free_slots(), 1);
        assert_eq!(g.publish(node(3, 0)).unwrap(), 0);
        assert_eq!(g.node(0).unwrap().id, 3);
        assert_eq!(g.slot_count(), 2);
    }

    #[test]
    fn test_promote_entry_only_upwards() {
        let g = GraphStore::new();
        g.publish_first(|| node(1, 1)).unwrap();
        g.publish(node(2, 0)).unwrap();
        g.promote_entry(1, 0);
        assert_eq!(g.entry().unwrap().slot, 0);
        g.promote_entry(1, 3);
        assert_eq!(g.entry(), Some(EntryPoint { slot: 1, layer: 3 }));
    }

    #[test]
    fn test_with_payload_keeps_links() {
        let n = Node::new(5, 1, None, None, vec![vec![1, 2], vec![3]]);
        n.tombstone();
        let m = n.with_payload(None, Some(vec![1u8, 2].into_boxed_slice()));
        assert_eq!(m.neighbors(0), vec![1, 2]);
        assert_eq!(m.neighbors(1), vec![3]);
        assert!(m.is_tombstoned());
        assert!(m.neighbors(4).is_empty());
    }
}
