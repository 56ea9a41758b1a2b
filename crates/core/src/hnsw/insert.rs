//! HNSW insertion: layer draw, descent, per-layer beam search, neighbor
//! selection, publish, then back-edges with pruning.
//!
//! A node is published only once its forward links are complete, so a
//! concurrent search never sees a half-built node. Back-edges are added one
//! neighbor at a time under that neighbor's adjacency lock; pruning reselects
//! without candidate extension, so no thread ever holds two adjacency locks.

use crate::error::{IndexError, Result};
use crate::hnsw::graph::{EntryPoint, NeighborSelection, Node};
use crate::hnsw::heap::Neighbor;
use crate::hnsw::index::{HnswIndex, PairScorer, QueryScorer};
use crate::hnsw::search::{greedy_closest, search_layer};
use std::collections::HashSet;
use std::sync::Arc;

impl HnswIndex {
    /// Inserts `vector` under `id`.
    ///
    /// Fails with `DimensionMismatch` or `AlreadyExists` before touching the
    /// graph. May train the codec afterwards once its threshold is reached;
    /// a failed training run is logged and left for the next insert.
    pub fn insert(&self, id: u64, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        {
            let _shared = self.gate.read();
            self.insert_locked(id, vector)?;
        }
        self.train_after_write(id);
        Ok(())
    }

    /// Replaces the vector stored under `id`.
    ///
    /// The old node is deleted and the id re-inserted in one exclusive
    /// section, so no reader sees the id missing or holding both vectors.
    pub fn update(&self, id: u64, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        {
            let _exclusive = self.gate.write();
            if !self.graph.contains(id) {
                return Err(IndexError::NotFound(id));
            }
            self.delete_locked(id)?;
            self.insert_locked(id, vector)?;
        }
        tracing::debug!(id, "node updated");
        self.train_after_write(id);
        Ok(())
    }

    fn train_after_write(&self, id: u64) {
        if let Err(e) = self.auto_train() {
            tracing::warn!(id, error = %e, "automatic codec training failed");
        }
    }

    fn insert_locked(&self, id: u64, vector: &[f32]) -> Result<()> {
        if self.graph.contains(id) {
            return Err(IndexError::AlreadyExists(id));
        }
        let codebook = self.codebook();
        let codes = codebook.as_ref().map(|cb| cb.encode(vector).into_boxed_slice());
        let keep_vector = codebook.is_none() || self.hnsw().store_raw_vectors;
        let payload = || keep_vector.then(|| vector.to_vec().into_boxed_slice());
        let level = self.levels.next_level();

        let entry = loop {
            match self.graph.entry() {
                Some(entry) => break entry,
                None => {
                    let first = self
                        .graph
                        .publish_first(|| Node::new(id, level, payload(), codes.clone(), Vec::new()))?;
                    if first.is_some() {
                        return self.record_point(id, vector);
                    }
                    // Lost the race for the empty graph; insert normally.
                }
            }
        };

        let scorer = self.query_scorer(vector, codebook.as_deref());
        let pair = self.pair_scorer(codebook.clone());

        let mut ep = Neighbor::new(scorer.score(&*self.node(entry.slot)?)?, entry.slot);
        for layer in (level + 1..=entry.layer).rev() {
            ep = greedy_closest(self, &scorer, ep, layer)?;
        }

        let top = level.min(entry.layer);
        let mut links: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut entry_points = vec![ep];
        for layer in (0..=top).rev() {
            let found = search_layer(self, &scorer, &entry_points, self.hnsw().ef_construction, layer)?;
            let chosen = self.select_neighbors(&found, self.hnsw().m, layer, &pair, Some(&scorer))?;
            links[layer] = chosen.iter().map(|n| n.slot).collect();
            entry_points = found;
        }

        let forward = links.clone();
        let slot = self
            .graph
            .publish(Node::new(id, level, payload(), codes, links))?;

        for (layer, targets) in forward.iter().enumerate() {
            for &target in targets {
                self.connect(target, slot, layer, &pair)?;
            }
        }

        if level > entry.layer {
            if let Some(current) = self.graph.entry() {
                if current.slot != slot && current.layer > entry.layer {
                    self.link_upper_layers(slot, level, entry.layer, current, &scorer, &pair)?;
                }
            }
            self.graph.promote_entry(slot, level);
        }
        self.record_point(id, vector)
    }

    /// Links `slot` on the layers above `linked` that an entry point promoted
    /// by a concurrent insert now spans.
    fn link_upper_layers(
        &self,
        slot: u32,
        level: usize,
        linked: usize,
        entry: EntryPoint,
        scorer: &QueryScorer<'_>,
        pair: &PairScorer,
    ) -> Result<()> {
        let mut ep = Neighbor::new(scorer.score(&*self.node(entry.slot)?)?, entry.slot);
        for layer in (level + 1..=entry.layer).rev() {
            ep = greedy_closest(self, scorer, ep, layer)?;
        }
        let mut entry_points = vec![ep];
        for layer in (linked + 1..=level.min(entry.layer)).rev() {
            let mut found = search_layer(self, scorer, &entry_points, self.hnsw().ef_construction, layer)?;
            found.retain(|n| n.slot != slot);
            if found.is_empty() {
                continue;
            }
            let chosen = self.select_neighbors(&found, self.hnsw().m, layer, pair, Some(scorer))?;
            for n in chosen.iter().filter(|n| n.slot != slot) {
                self.connect(slot, n.slot, layer, pair)?;
                self.connect(n.slot, slot, layer, pair)?;
            }
            entry_points = found;
        }
        tracing::debug!(slot, level, entry = entry.slot, "linked layers under a raced entry point");
        Ok(())
    }

    fn record_point(&self, id: u64, vector: &[f32]) -> Result<()> {
        if let Some(codec) = &self.codec {
            codec.set(id, vector)?;
        }
        Ok(())
    }

    /// Adds `new_slot` to `target`'s list at `layer`, pruning to the cap.
    fn connect(&self, target: u32, new_slot: u32, layer: usize, pair: &PairScorer) -> Result<()> {
        let target_node = self.node(target)?;
        let cap = self.hnsw().cap(layer);
        let mut links = target_node.links_mut();
        let list = links.get_mut(layer).ok_or_else(|| {
            IndexError::ConcurrencyInvariantViolation(format!(
                "node {} has no layer {layer}",
                target_node.id
            ))
        })?;
        if list.contains(&new_slot) {
            return Ok(());
        }
        list.push(new_slot);
        if list.len() <= cap {
            return Ok(());
        }

        let mut scored = Vec::with_capacity(list.len());
        for &s in list.iter() {
            scored.push(Neighbor::new(pair.between(&target_node, &*self.node(s)?)?, s));
        }
        scored.sort_unstable_by(Neighbor::ascending);
        let kept = self.select_neighbors(&scored, cap, layer, pair, None)?;
        *list = kept.iter().map(|n| n.slot).collect();
        if list.len() > cap {
            tracing::error!(node = target_node.id, layer, len = list.len(), cap, "pruned list over cap");
            return Err(IndexError::ConcurrencyInvariantViolation(format!(
                "node {} holds {} links at layer {layer} after pruning to {cap}",
                target_node.id,
                list.len()
            )));
        }
        Ok(())
    }

    /// Picks up to `limit` neighbors from `candidates` (ascending by distance
    /// to the base) according to the configured policy.
    ///
    /// `extend_with` is the base's query scorer; candidate extension only
    /// happens when it is given, which the pruning path never does.
    pub(crate) fn select_neighbors(
        &self,
        candidates: &[Neighbor],
        limit: usize,
        layer: usize,
        pair: &PairScorer,
        extend_with: Option<&QueryScorer<'_>>,
    ) -> Result<Vec<Neighbor>> {
        match self.hnsw().selection {
            NeighborSelection::Simple => Ok(candidates.iter().take(limit).copied().collect()),
            NeighborSelection::Heuristic {
                extend_candidates,
                keep_pruned,
            } => {
                let mut pool = candidates.to_vec();
                if let (true, Some(scorer)) = (extend_candidates, extend_with) {
                    self.extend_candidates(&mut pool, layer, scorer)?;
                }
                select_heuristic(self, &pool, limit, pair, keep_pruned)
            }
        }
    }

    /// Adds the layer neighbors of every candidate, scored against the base.
    fn extend_candidates(
        &self,
        pool: &mut Vec<Neighbor>,
        layer: usize,
        scorer: &QueryScorer<'_>,
    ) -> Result<()> {
        let mut seen: HashSet<u32> = pool.iter().map(|n| n.slot).collect();
        let originals: Vec<u32> = pool.iter().map(|n| n.slot).collect();
        for slot in originals {
            for nb in self.node(slot)?.neighbors(layer) {
                if seen.insert(nb) {
                    let d = scorer.score(&*self.node(nb)?)?;
                    pool.push(Neighbor::new(d, nb));
                }
            }
        }
        pool.sort_unstable_by(Neighbor::ascending);
        Ok(())
    }
}

/// Admits a candidate only if it is closer to the base than to every
/// neighbor already admitted. Rejected candidates pad the result when
/// `keep_pruned` is set. Never returns more than `limit`.
fn select_heuristic(
    index: &HnswIndex,
    pool: &[Neighbor],
    limit: usize,
    pair: &PairScorer,
    keep_pruned: bool,
) -> Result<Vec<Neighbor>> {
    let mut admitted: Vec<(Neighbor, Arc<Node>)> = Vec::with_capacity(limit);
    let mut pruned: Vec<Neighbor> = Vec::new();
    for &cand in pool {
        if admitted.len() >= limit {
            break;
        }
        let node = index.node(cand.slot)?;
        let mut keep = true;
        for (_, other) in &admitted {
            if pair.between(&node, other)? < cand.distance {
                keep = false;
                break;
            }
        }
        if keep {
            admitted.push((cand, node));
        } else {
            pruned.push(cand);
        }
    }

    let mut selected: Vec<Neighbor> = admitted.into_iter().map(|(n, _)| n).collect();
    if keep_pruned {
        let room = limit.saturating_sub(selected.len());
        selected.extend(pruned.into_iter().take(room));
        selected.sort_unstable_by(Neighbor::ascending);
    }
    Ok(selected)
}
