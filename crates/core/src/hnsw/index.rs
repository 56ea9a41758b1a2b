//! The HNSW index: graph, codec and the locks that order their mutation.
//!
//! Insert and search run under the shared side of a structural gate, so any
//! number of them proceed in parallel, serialized per node by adjacency locks.
//! Delete, update, codec training and export take the gate exclusively,
//! which is what allows them to clear and recycle slots.

use crate::error::{IndexError, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::{EntryPoint, GraphStore, HnswConfig, IndexConfig, LevelGenerator, Node};
use crate::quantization::{CodecView, Codebook, DistanceTable, ProductQuantizer};
use crate::storage::{MemoryPointStore, PointStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Approximate k-NN index over caller-supplied `u64` ids.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) config: IndexConfig,
    pub(crate) metric: DistanceMetric,
    pub(crate) graph: GraphStore,
    pub(crate) codec: Option<ProductQuantizer>,
    pub(crate) levels: LevelGenerator,
    pub(crate) gate: RwLock<()>,
}

/// Point-in-time summary of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub nodes: usize,
    pub free_slots: usize,
    pub max_layer: usize,
    /// Live nodes present on each layer, index 0 first.
    pub nodes_per_layer: Vec<usize>,
    pub average_degree: f32,
    pub codec_trained: bool,
}

/// Distances from one query vector to graph nodes.
pub(crate) enum QueryScorer<'a> {
    Exact {
        metric: DistanceMetric,
        query: &'a [f32],
    },
    Table(DistanceTable),
}

impl QueryScorer<'_> {
    #[inline]
    pub(crate) fn score(&self, node: &Node) -> Result<f32> {
        match self {
            QueryScorer::Exact { metric, query } => {
                let v = node.vector.as_deref().ok_or_else(|| missing(node, "vector"))?;
                Ok(metric.distance(query, v))
            }
            QueryScorer::Table(table) => {
                let codes = node.codes.as_deref().ok_or_else(|| missing(node, "codes"))?;
                table.distance(codes)
            }
        }
    }
}

/// Node-to-node distances, used by neighbor selection.
pub(crate) enum PairScorer {
    Exact(DistanceMetric),
    Codes(Arc<Codebook>),
}

impl PairScorer {
    #[inline]
    pub(crate) fn between(&self, a: &Node, b: &Node) -> Result<f32> {
        match self {
            PairScorer::Exact(metric) => {
                let va = a.vector.as_deref().ok_or_else(|| missing(a, "vector"))?;
                let vb = b.vector.as_deref().ok_or_else(|| missing(b, "vector"))?;
                Ok(metric.distance(va, vb))
            }
            PairScorer::Codes(codebook) => {
                let ca = a.codes.as_deref().ok_or_else(|| missing(a, "codes"))?;
                let cb = b.codes.as_deref().ok_or_else(|| missing(b, "codes"))?;
                codebook.code_distance(ca, cb)
            }
        }
    }
}

fn missing(node: &Node, what: &str) -> IndexError {
    IndexError::Corrupted(format!("node {} has no {what}", node.id))
}

impl HnswIndex {
    /// Creates an empty index; the codec, if configured, uses an in-memory point store.
    pub fn new(config: IndexConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryPointStore::new()))
    }

    pub fn with_store(config: IndexConfig, store: Arc<dyn PointStore>) -> Result<Self> {
        config.validate()?;
        let metric = config.distance_metric();
        let codec = match &config.quantizer {
            Some(params) => Some(ProductQuantizer::with_metric(
                metric,
                params.clone(),
                config.dimension,
                store,
            )?),
            None => None,
        };
        let levels = LevelGenerator::new(config.hnsw.m, config.hnsw.max_layers, config.hnsw.seed);
        Ok(Self {
            config,
            metric,
            graph: GraphStore::new(),
            codec,
            levels,
            gate: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub(crate) fn hnsw(&self) -> &HnswConfig {
        &self.config.hnsw
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Read-only view of the codec, if compression is enabled.
    pub fn codec(&self) -> Option<CodecView<'_>> {
        self.codec.as_ref().map(CodecView::new)
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.graph.contains(id)
    }

    /// Layer of the entry point, 0 for an empty graph.
    pub fn max_layer(&self) -> usize {
        self.graph.entry().map_or(0, |e| e.layer)
    }

    pub(crate) fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Node in a slot reachable from the graph. Under the shared gate slots
    /// are never cleared, so a miss means the graph is inconsistent.
    #[inline]
    pub(crate) fn node(&self, slot: u32) -> Result<Arc<Node>> {
        self.graph.node(slot).ok_or_else(|| {
            tracing::error!(slot, "adjacency references an empty slot");
            IndexError::ConcurrencyInvariantViolation(format!("slot {slot} is referenced but empty"))
        })
    }

    /// Trained codebook, if compression is enabled and fitted.
    pub(crate) fn codebook(&self) -> Option<Arc<Codebook>> {
        self.codec.as_ref().and_then(|c| c.codebook())
    }

    pub(crate) fn query_scorer<'a>(
        &self,
        query: &'a [f32],
        codebook: Option<&Codebook>,
    ) -> QueryScorer<'a> {
        match codebook {
            Some(cb) => QueryScorer::Table(cb.distance_table(query)),
            None => QueryScorer::Exact {
                metric: self.metric,
                query,
            },
        }
    }

    pub(crate) fn pair_scorer(&self, codebook: Option<Arc<Codebook>>) -> PairScorer {
        match codebook {
            Some(cb) => PairScorer::Codes(cb),
            None => PairScorer::Exact(self.metric),
        }
    }

    /// Fits the codec on every cached point and re-encodes all nodes.
    ///
    /// Node vectors are dropped afterwards unless `store_raw_vectors` is set.
    /// Returns the number of training samples.
    pub fn train_codec(&self) -> Result<usize> {
        let codec = self
            .codec
            .as_ref()
            .ok_or_else(|| IndexError::config("compression is not enabled for this index"))?;
        let _exclusive = self.gate.write();
        self.train_locked(codec)
    }

    /// Trains once the codec's threshold is reached. Re-checked under the gate
    /// so concurrent inserts crossing the threshold train only once.
    pub(crate) fn auto_train(&self) -> Result<()> {
        let Some(codec) = self.codec.as_ref() else {
            return Ok(());
        };
        if !codec.should_fit() {
            return Ok(());
        }
        let _exclusive = self.gate.write();
        if codec.should_fit() {
            self.train_locked(codec)?;
        }
        Ok(())
    }

    /// Trains a codebook and rebuilds every node against it before installing
    /// anything, so a failure leaves the index as it was.
    fn train_locked(&self, codec: &ProductQuantizer) -> Result<usize> {
        let samples: Vec<Vec<f32>> = codec.points().into_iter().map(|(_, p)| p.vector).collect();
        let codebook = Arc::new(codec.train_codebook(&samples)?);
        let keep_raw = self.config.hnsw.store_raw_vectors;

        let nodes = self.graph.live_nodes();
        let mut rebuilt = Vec::with_capacity(nodes.len());
        for (slot, node) in nodes {
            let vector = match &node.vector {
                Some(v) => v.clone(),
                None => codec.get(node.id)?.vector.into_boxed_slice(),
            };
            self.check_dimension(&vector)?;
            let codes = codebook.encode(&vector).into_boxed_slice();
            let payload = keep_raw.then_some(vector);
            rebuilt.push((slot, Arc::new(node.with_payload(payload, Some(codes)))));
        }

        let reencoded = codec.install(codebook)?;
        let recoded = rebuilt.len();
        for (slot, node) in rebuilt {
            self.graph.replace(slot, node)?;
        }
        tracing::info!(
            samples = samples.len(),
            nodes = recoded,
            points = reencoded,
            keep_raw,
            "index codec trained"
        );
        Ok(samples.len())
    }

    pub fn stats(&self) -> IndexStats {
        let _shared = self.gate.read();
        let nodes = self.graph.live_nodes();
        let max_layer = self.max_layer();
        let mut nodes_per_layer = vec![0usize; max_layer + 1];
        let mut edges = 0usize;
        for (_, node) in &nodes {
            for layer in 0..=node.layer.min(max_layer) {
                nodes_per_layer[layer] += 1;
            }
            edges += node.links().first().map_or(0, Vec::len);
        }
        IndexStats {
            nodes: nodes.len(),
            free_slots: self.graph.free_slots(),
            max_layer,
            nodes_per_layer,
            average_degree: if nodes.is_empty() {
                0.0
            } else {
                edges as f32 / nodes.len() as f32
            },
            codec_trained: self.codec.as_ref().is_some_and(|c| c.is_trained()),
        }
    }

    /// Checks structural invariants: degree caps, in-bounds live links,
    /// per-node layer counts, payload presence and entry point liveness.
    pub fn validate(&self) -> Result<()> {
        let _shared = self.gate.read();
        self.validate_locked()
    }

    pub(crate) fn validate_locked(&self) -> Result<()> {
        let corrupted = |msg: String| Err(IndexError::Corrupted(msg));
        let nodes = self.graph.live_nodes();
        let trained = self.codebook().is_some();

        match self.graph.entry() {
            None if !nodes.is_empty() => return corrupted("non-empty graph has no entry point".into()),
            Some(EntryPoint { slot, layer }) => match self.graph.node(slot) {
                Some(n) if n.layer == layer => {
                    if let Some((_, higher)) = nodes.iter().find(|(_, m)| m.layer > layer) {
                        return corrupted(format!(
                            "node {} is above entry point layer {layer}",
                            higher.id
                        ));
                    }
                }
                Some(n) => {
                    return corrupted(format!(
                        "entry point layer {layer} does not match node layer {}",
                        n.layer
                    ))
                }
                None => return corrupted(format!("entry point slot {slot} is empty")),
            },
            None => {}
        }

        for (slot, node) in &nodes {
            if node.vector.as_deref().is_some_and(|v| v.len() != self.config.dimension) {
                return corrupted(format!("node {} has a vector of the wrong length", node.id));
            }
            if trained && node.codes.is_none() {
                return corrupted(format!("node {} has no codes", node.id));
            }
            if !trained && node.vector.is_none() {
                return corrupted(format!("node {} has no vector", node.id));
            }
            let links = node.links();
            if links.len() != node.layer + 1 {
                return corrupted(format!(
                    "node {} has {} link layers for layer {}",
                    node.id,
                    links.len(),
                    node.layer
                ));
            }
            for (layer, list) in links.iter().enumerate() {
                let cap = self.config.hnsw.cap(layer);
                if list.len() > cap {
                    return corrupted(format!(
                        "node {} has {} links at layer {layer}, cap {cap}",
                        node.id,
                        list.len()
                    ));
                }
                for &target in list {
                    if target == *slot {
                        return corrupted(format!("node {} links to itself", node.id));
                    }
                    match self.graph.node(target) {
                        Some(t) if t.layer >= layer => {}
                        Some(_) => {
                            return corrupted(format!(
                                "node {} links at layer {layer} to a lower node",
                                node.id
                            ))
                        }
                        None => {
                            return corrupted(format!(
                                "node {} links to empty slot {target}",
                                node.id
                            ))
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantizerParams;

    fn small_config(dim: usize) -> IndexConfig {
        let mut cfg = IndexConfig::new(dim, "euclidean");
        cfg.hnsw.m = 4;
        cfg.hnsw.m_max = 4;
        cfg.hnsw.m_max0 = 8;
        cfg.hnsw.ef_construction = 32;
        cfg.hnsw.seed = Some(11);
        cfg
    }

    #[test]
    fn test_new_rejects_bad_config() {
        assert!(matches!(
            HnswIndex::new(IndexConfig::new(0, "l2")),
            Err(IndexError::Config(_))
        ));
        let cfg = IndexConfig::new(127, "l2").with_quantizer(QuantizerParams {
            num_sub_vectors: 5,
            ..QuantizerParams::default()
        });
        assert!(matches!(HnswIndex::new(cfg), Err(IndexError::Config(_))));
    }

    #[test]
    fn test_empty_index_stats() {
        let idx = HnswIndex::new(small_config(3)).unwrap();
        let stats = idx.stats();
        assert_eq!(stats.nodes, 0);
        assert_eq!(stats.max_layer, 0);
        assert_eq!(stats.average_degree, 0.0);
        assert!(idx.validate().is_ok());
        assert!(idx.is_empty());
    }

    #[test]
    fn test_train_without_codec_fails() {
        let idx = HnswIndex::new(small_config(4)).unwrap();
        assert!(matches!(idx.train_codec(), Err(IndexError::Config(_))));
    }

    #[test]
    fn test_train_codec_recodes_nodes() {
        let cfg = small_config(4).with_quantizer(QuantizerParams {
            num_sub_vectors: 2,
            num_centroids: 8,
            train_threshold: 0,
            seed: Some(3),
            ..QuantizerParams::default()
        });
        let idx = HnswIndex::new(cfg).unwrap();
        for i in 0..50u64 {
            let x = i as f32;
            idx.insert(i, &[x, x * 0.5, -x, 1.0]).unwrap();
        }
        assert!(!idx.stats().codec_trained);
        assert_eq!(idx.train_codec().unwrap(), 50);
        let stats = idx.stats();
        assert!(stats.codec_trained);
        assert_eq!(stats.nodes, 50);
        for (_, node) in idx.graph.live_nodes() {
            assert_eq!(node.codes.as_ref().map(|c| c.len()), Some(2));
            assert!(node.vector.is_none());
        }
        idx.validate().unwrap();
    }

    #[test]
    fn test_stats_layer_counts() {
        let idx = HnswIndex::new(small_config(2)).unwrap();
        for i in 0..200u64 {
            idx.insert(i, &[i as f32, (i % 7) as f32]).unwrap();
        }
        let stats = idx.stats();
        assert_eq!(stats.nodes, 200);
        assert_eq!(stats.nodes_per_layer[0], 200);
        assert_eq!(stats.nodes_per_layer.len(), stats.max_layer + 1);
        assert!(stats.nodes_per_layer.windows(2).all(|w| w[0] >= w[1]));
        assert!(stats.average_degree > 0.0 && stats.average_degree <= 8.0);
    }

    fn quantized(threshold: usize) -> IndexConfig {
        small_config(4).with_quantizer(QuantizerParams {
            num_sub_vectors: 2,
            num_centroids: 4,
            train_threshold: threshold,
            seed: Some(4),
            ..QuantizerParams::default()
        })
    }

    fn fill(idx: &HnswIndex, n: u64) {
        for i in 0..n {
            let x = i as f32;
            idx.insert(i, &[x, -x, x * 0.5, 1.0]).unwrap();
        }
    }

    #[test]
    fn test_codec_view_follows_index_training() {
        let idx = HnswIndex::new(quantized(0)).unwrap();
        fill(&idx, 20);
        let codec = idx.codec().unwrap();
        assert!(!codec.is_trained());
        assert!(matches!(codec.encode(&[0.0; 4]), Err(IndexError::UntrainedCodec)));
        assert_eq!(codec.cached_len(), 20);

        idx.train_codec().unwrap();
        assert!(codec.is_trained());
        let cb = codec.codebook().unwrap();
        assert_eq!((cb.num_sub_vectors(), cb.num_centroids()), (2, 4));
        assert!(codec.points().iter().all(|(_, p)| p.codes.is_some()));
        assert_eq!(idx.search(&[3.0, -3.0, 1.5, 1.0], 5, 16).unwrap().len(), 5);
        idx.insert(100, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        idx.validate().unwrap();
    }

    #[test]
    fn test_failed_training_leaves_codec_untouched() {
        let idx = HnswIndex::new(quantized(30)).unwrap();
        fill(&idx, 40);
        assert!(idx.stats().codec_trained);
        let mut snap = idx.export();
        snap.points.retain(|(id, _)| *id != 7);
        let copy = HnswIndex::import(snap, Arc::new(MemoryPointStore::new())).unwrap();
        let before = copy.codebook().unwrap();

        assert!(matches!(copy.train_codec(), Err(IndexError::NotFound(7))));
        assert_eq!(*copy.codebook().unwrap(), *before);
        copy.validate().unwrap();
        let hits = copy.search(&[3.0, -3.0, 1.5, 1.0], 3, 16).unwrap();
        assert_eq!(hits.len(), 3);
    }
}
