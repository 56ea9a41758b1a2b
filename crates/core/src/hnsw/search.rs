//! HNSW search: greedy descent through the upper layers and a bounded beam
//! search at the target layer.
//!
//! Distances come from a [`QueryScorer`]: exact metric on raw vectors while
//! the codec is untrained, lookup-table distances on codes once it is.
//! Tombstoned nodes are still traversed but never returned.

use crate::error::Result;
use crate::hnsw::heap::{CandidateHeap, Neighbor, ResultHeap};
use crate::hnsw::index::{HnswIndex, QueryScorer};
use crate::hnsw::visited::with_visited;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: u64,
    pub distance: f32,
}

/// Moves to any neighbor that strictly improves on `ep` until none does.
pub(crate) fn greedy_closest(
    index: &HnswIndex,
    scorer: &QueryScorer<'_>,
    mut ep: Neighbor,
    layer: usize,
) -> Result<Neighbor> {
    loop {
        let mut improved = false;
        for nb in index.node(ep.slot)?.neighbors(layer) {
            let d = scorer.score(&*index.node(nb)?)?;
            if d < ep.distance {
                ep = Neighbor::new(d, nb);
                improved = true;
            }
        }
        if !improved {
            return Ok(ep);
        }
    }
}

/// Beam search on one layer. Returns up to `ef` slots ascending by distance.
pub(crate) fn search_layer(
    index: &HnswIndex,
    scorer: &QueryScorer<'_>,
    entry_points: &[Neighbor],
    ef: usize,
    layer: usize,
) -> Result<Vec<Neighbor>> {
    let ef = ef.max(1);
    with_visited(index.graph.slot_count(), |visited| {
        let mut frontier = CandidateHeap::with_capacity(ef * 2);
        let mut results = ResultHeap::with_capacity(ef + 1);
        for &ep in entry_points {
            if visited.mark(ep.slot) {
                frontier.push(ep);
                results.push_bounded(ep, ef);
            }
        }

        while let Some(current) = frontier.pop() {
            if results.len() >= ef && current.distance > results.worst_distance() {
                break;
            }
            for nb in index.node(current.slot)?.neighbors(layer) {
                if !visited.mark(nb) {
                    continue;
                }
                let d = scorer.score(&*index.node(nb)?)?;
                if results.len() < ef || d < results.worst_distance() {
                    let cand = Neighbor::new(d, nb);
                    frontier.push(cand);
                    results.push_bounded(cand, ef);
                }
            }
        }
        Ok(results.into_sorted_vec())
    })
}

impl HnswIndex {
    /// Returns up to `k` nearest live ids, ascending by distance with ties
    /// broken by id. `ef` is the layer-0 beam width, raised to `k` if smaller.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<SearchResult>> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let _shared = self.gate.read();
        let Some(entry) = self.graph.entry() else {
            return Ok(Vec::new());
        };

        let codebook = self.codebook();
        let scorer = self.query_scorer(query, codebook.as_deref());
        let mut ep = Neighbor::new(scorer.score(&*self.node(entry.slot)?)?, entry.slot);
        for layer in (1..=entry.layer).rev() {
            ep = greedy_closest(self, &scorer, ep, layer)?;
        }
        let found = search_layer(self, &scorer, &[ep], ef.max(k), 0)?;

        let rerank = codebook.is_some() && self.hnsw().store_raw_vectors;
        let mut hits = Vec::with_capacity(found.len());
        for n in found {
            let node = self.node(n.slot)?;
            if node.is_tombstoned() {
                continue;
            }
            let distance = match node.vector.as_deref() {
                Some(v) if rerank => self.metric.distance(query, v),
                _ => n.distance,
            };
            hits.push(SearchResult {
                id: node.id,
                distance,
            });
        }
        hits.sort_unstable_by(|a, b| {
            OrderedFloat(a.distance)
                .cmp(&OrderedFloat(b.distance))
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// [`search`](Self::search) with the configured `ef_search`.
    pub fn search_default(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.search(query, k, self.hnsw().ef_search)
    }
}
