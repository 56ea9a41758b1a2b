//! Hard delete with graph repair and slot recycling.

use crate::error::{IndexError, Result};
use crate::hnsw::graph::{EntryPoint, Node};
use crate::hnsw::heap::Neighbor;
use crate::hnsw::index::{HnswIndex, PairScorer};
use std::collections::HashSet;

impl HnswIndex {
    /// Removes `id` from the graph and the codec.
    ///
    /// Runs under the exclusive gate: the node is tombstoned, every reference
    /// to its slot is unlinked, each former in-neighbor is repaired from its
    /// remaining links plus the deleted node's links, the entry point moves
    /// to the highest remaining node, and the slot is cleared for reuse.
    pub fn delete(&self, id: u64) -> Result<()> {
        let _exclusive = self.gate.write();
        self.delete_locked(id)
    }

    pub(crate) fn delete_locked(&self, id: u64) -> Result<()> {
        let slot = self.graph.slot_of(id).ok_or(IndexError::NotFound(id))?;
        let node = self.node(slot)?;
        node.tombstone();

        let pair = self.pair_scorer(self.codebook());
        let orphaned: Vec<Vec<u32>> = node.links().clone();

        let mut repaired = 0usize;
        for (other_slot, other) in self.graph.live_nodes() {
            if other_slot == slot {
                continue;
            }
            let touched: Vec<usize> = {
                let mut links = other.links_mut();
                links
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(layer, list)| {
                        let before = list.len();
                        list.retain(|&s| s != slot);
                        (list.len() != before).then_some(layer)
                    })
                    .collect()
            };
            for layer in touched {
                let extra = orphaned.get(layer).map(Vec::as_slice).unwrap_or(&[]);
                self.repair(other_slot, &other, layer, extra, slot, &pair)?;
                repaired += 1;
            }
        }

        if self.graph.entry().is_some_and(|e| e.slot == slot) {
            let next = self
                .graph
                .live_nodes()
                .into_iter()
                .filter(|(s, _)| *s != slot)
                .max_by(|(sa, a), (sb, b)| a.layer.cmp(&b.layer).then(sb.cmp(sa)))
                .map(|(s, n)| EntryPoint {
                    slot: s,
                    layer: n.layer,
                });
            tracing::debug!(?next, "entry point reassigned after delete");
            self.graph.set_entry(next);
        }

        self.graph.release(slot);
        if let Some(codec) = &self.codec {
            codec.delete(&[id])?;
        }
        tracing::debug!(id, slot, repaired, "node deleted");
        Ok(())
    }

    /// Reselects `node`'s list at `layer` from what it has left plus `extra`.
    fn repair(
        &self,
        slot: u32,
        node: &Node,
        layer: usize,
        extra: &[u32],
        deleted: u32,
        pair: &PairScorer,
    ) -> Result<()> {
        let current = node.neighbors(layer);
        let mut seen: HashSet<u32> = HashSet::with_capacity(current.len() + extra.len());
        let mut pool = Vec::with_capacity(current.len() + extra.len());
        for &s in current.iter().chain(extra) {
            if s == slot || s == deleted || !seen.insert(s) {
                continue;
            }
            let target = self.node(s)?;
            if target.layer < layer {
                continue;
            }
            pool.push(Neighbor::new(pair.between(node, &target)?, s));
        }
        pool.sort_unstable_by(Neighbor::ascending);
        let cap = self.hnsw().cap(layer);
        let kept = self.select_neighbors(&pool, cap, layer, pair, None)?;
        let mut links = node.links_mut();
        if let Some(list) = links.get_mut(layer) {
            *list = kept.iter().map(|n| n.slot).collect();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::IndexError;
    use crate::hnsw::graph::IndexConfig;
    use crate::hnsw::HnswIndex;

    fn index() -> HnswIndex {
        let mut cfg = IndexConfig::new(2, "euclidean");
        cfg.hnsw.m = 4;
        cfg.hnsw.m_max = 4;
        cfg.hnsw.m_max0 = 8;
        cfg.hnsw.seed = Some(23);
        HnswIndex::new(cfg).unwrap()
    }

    fn fill(idx: &HnswIndex, n: u64) {
        for i in 0..n {
            idx.insert(i, &[(i % 13) as f32, (i / 13) as f32]).unwrap();
        }
    }

    #[test]
    fn test_delete_unknown_id() {
        let idx = index();
        assert!(matches!(idx.delete(5), Err(IndexError::NotFound(5))));
    }

    #[test]
    fn test_deleted_ids_never_returned() {
        let idx = index();
        fill(&idx, 150);
        for id in (0..150).step_by(3) {
            idx.delete(id).unwrap();
        }
        idx.validate().unwrap();
        assert_eq!(idx.len(), 100);
        for q in 0..150u64 {
            let hits = idx.search(&[(q % 13) as f32, (q / 13) as f32], 10, 50).unwrap();
            assert!(!hits.is_empty());
            assert!(hits.iter().all(|h| h.id % 3 != 0), "deleted id returned");
        }
    }

    #[test]
    fn test_no_references_to_deleted_slot() {
        let idx = index();
        fill(&idx, 80);
        let slot = idx.graph.slot_of(40).unwrap();
        idx.delete(40).unwrap();
        for (_, node) in idx.graph.live_nodes() {
            assert!(node.links().iter().all(|l| !l.contains(&slot)));
        }
    }

    #[test]
    fn test_recycled_slot_is_clean() {
        let idx = index();
        fill(&idx, 60);
        let slot = idx.graph.slot_of(10).unwrap();
        idx.delete(10).unwrap();
        assert_eq!(idx.graph.free_slots(), 1);
        idx.insert(1000, &[50.0, 50.0]).unwrap();
        assert_eq!(idx.graph.slot_of(1000), Some(slot));
        let node = idx.graph.node(slot).unwrap();
        assert_eq!(node.id, 1000);
        assert_eq!(node.vector.as_deref(), Some(&[50.0f32, 50.0][..]));
        assert!(!node.is_tombstoned());
        idx.validate().unwrap();
        assert_eq!(idx.search(&[50.0, 50.0], 1, 10).unwrap()[0].id, 1000);
    }

    #[test]
    fn test_delete_entry_point_and_everything() {
        let idx = index();
        fill(&idx, 30);
        while let Some(entry) = idx.graph.entry() {
            let id = idx.graph.node(entry.slot).unwrap().id;
            idx.delete(id).unwrap();
            idx.validate().unwrap();
            if let Some(next) = idx.graph.entry() {
                let top = idx.graph.live_nodes().iter().map(|(_, n)| n.layer).max().unwrap();
                assert_eq!(next.layer, top);
            }
        }
        assert!(idx.is_empty());
        assert!(idx.search(&[0.0, 0.0], 3, 10).unwrap().is_empty());
        idx.insert(7, &[1.0, 1.0]).unwrap();
        assert_eq!(idx.search(&[1.0, 1.0], 1, 10).unwrap()[0].id, 7);
    }

    #[test]
    fn test_delete_removes_codec_point() {
        use crate::quantization::QuantizerParams;
        let cfg = IndexConfig::new(2, "l2").with_quantizer(QuantizerParams {
            num_sub_vectors: 1,
            num_centroids: 4,
            train_threshold: 0,
            ..QuantizerParams::default()
        });
        let idx = HnswIndex::new(cfg).unwrap();
        idx.insert(1, &[0.0, 1.0]).unwrap();
        idx.insert(2, &[1.0, 0.0]).unwrap();
        let codec = idx.codec().unwrap();
        assert_eq!(codec.cached_len(), 2);
        idx.delete(1).unwrap();
        assert_eq!(codec.cached_len(), 1);
        assert!(matches!(codec.get(1), Err(IndexError::NotFound(1))));
    }
}
