//! Full-state export and import.
//!
//! An [`IndexSnapshot`] captures the arena slot-for-slot (including free
//! slots and the free list), the entry point, the trained codebook and the
//! codec's cached points. Its byte form is a bincode payload followed by an
//! 8-byte footer: `[magic "HPQ1"][CRC32 of payload, big-endian]`.

use crate::error::{IndexError, Result};
use crate::hnsw::graph::{EntryPoint, GraphStore, IndexConfig, Node};
use crate::hnsw::index::HnswIndex;
use crate::quantization::{Codebook, Point};
use crate::storage::PointStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SNAPSHOT_MAGIC: &[u8; 4] = b"HPQ1";

/// One live node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: u64,
    pub layer: usize,
    pub vector: Option<Vec<f32>>,
    pub codes: Option<Vec<u8>>,
    pub links: Vec<Vec<u32>>,
}

/// Serializable image of an [`HnswIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub config: IndexConfig,
    pub slots: Vec<Option<NodeRecord>>,
    pub free: Vec<u32>,
    pub entry: Option<EntryPoint>,
    pub codebook: Option<Codebook>,
    pub points: Vec<(u64, Point)>,
}

impl IndexSnapshot {
    /// Bincode payload plus magic and CRC32 footer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let crc = crc32fast::hash(&payload);
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&payload);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&crc.to_be_bytes());
        tracing::debug!(bytes = out.len(), crc = format_args!("{crc:#010x}"), "snapshot encoded");
        Ok(out)
    }

    /// Verifies the footer and decodes the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 || &bytes[bytes.len() - 8..bytes.len() - 4] != SNAPSHOT_MAGIC {
            return Err(IndexError::Corrupted("snapshot footer missing".into()));
        }
        let (payload, footer) = bytes.split_at(bytes.len() - 8);
        let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(IndexError::Corrupted(format!(
                "snapshot CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(bincode::deserialize(payload)?)
    }

    fn check_layout(&self) -> Result<()> {
        let n = self.slots.len();
        let corrupted = |msg: String| Err(IndexError::Corrupted(msg));
        let mut freed = vec![false; n];
        for &slot in &self.free {
            match self.slots.get(slot as usize) {
                Some(None) if !freed[slot as usize] => freed[slot as usize] = true,
                _ => return corrupted(format!("free list entry {slot} is not an empty slot")),
            }
        }
        if let Some(entry) = self.entry {
            match self.slots.get(entry.slot as usize) {
                Some(Some(_)) => {}
                _ => return corrupted(format!("entry point slot {} is not live", entry.slot)),
            }
        }
        for rec in self.slots.iter().flatten() {
            if rec.links.len() != rec.layer + 1 {
                return corrupted(format!("node {} has malformed adjacency", rec.id));
            }
            if rec.links.iter().flatten().any(|&s| s as usize >= n) {
                return corrupted(format!("node {} links past the arena", rec.id));
            }
        }
        Ok(())
    }
}

impl HnswIndex {
    /// Captures the full index state. Blocks inserts and searches meanwhile.
    pub fn export(&self) -> IndexSnapshot {
        let _exclusive = self.gate.write();
        let mut slots: Vec<Option<NodeRecord>> = vec![None; self.graph.slot_count()];
        for (slot, node) in self.graph.live_nodes() {
            slots[slot as usize] = Some(NodeRecord {
                id: node.id,
                layer: node.layer,
                vector: node.vector.as_deref().map(<[f32]>::to_vec),
                codes: node.codes.as_deref().map(<[u8]>::to_vec),
                links: node.links().clone(),
            });
        }
        IndexSnapshot {
            config: self.config.clone(),
            slots,
            free: self.graph.free_list(),
            entry: self.graph.entry(),
            codebook: self.codebook().map(|cb| (*cb).clone()),
            points: self.codec.as_ref().map(|c| c.points()).unwrap_or_default(),
        }
    }

    /// Rebuilds an index from a snapshot, writing codec points through to `store`.
    ///
    /// The snapshot is validated: `Corrupted` if its layout or graph
    /// invariants do not hold.
    pub fn import(snapshot: IndexSnapshot, store: Arc<dyn PointStore>) -> Result<Self> {
        snapshot.check_layout()?;
        let mut index = HnswIndex::with_store(snapshot.config, store)?;

        if let Some(codebook) = snapshot.codebook {
            let codec = index.codec.as_ref().ok_or_else(|| {
                IndexError::Corrupted("snapshot has a codebook but no quantizer config".into())
            })?;
            codec.load_codebook(codebook)?;
        }
        if let Some(codec) = &index.codec {
            for (id, point) in snapshot.points {
                codec.restore(id, point)?;
            }
        }

        let slots = snapshot
            .slots
            .into_iter()
            .map(|rec| {
                rec.map(|r| {
                    Node::new(
                        r.id,
                        r.layer,
                        r.vector.map(Vec::into_boxed_slice),
                        r.codes.map(Vec::into_boxed_slice),
                        r.links,
                    )
                })
            })
            .collect();
        index.graph = GraphStore::from_parts(slots, snapshot.free, snapshot.entry)?;
        index.validate_locked()?;
        tracing::info!(nodes = index.len(), max_layer = index.max_layer(), "index imported");
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantizerParams;
    use crate::storage::MemoryPointStore;

    fn built(quantized: bool) -> HnswIndex {
        let mut cfg = IndexConfig::new(4, "euclidean");
        cfg.hnsw.seed = Some(31);
        if quantized {
            cfg = cfg.with_quantizer(QuantizerParams {
                num_sub_vectors: 2,
                num_centroids: 8,
                train_threshold: 40,
                seed: Some(2),
                ..QuantizerParams::default()
            });
        }
        let idx = HnswIndex::new(cfg).unwrap();
        for i in 0..80u64 {
            let x = i as f32;
            idx.insert(i, &[x.sin(), x.cos(), x * 0.01, (x * 0.3).sin()]).unwrap();
        }
        idx.delete(5).unwrap();
        idx.delete(6).unwrap();
        idx
    }

    #[test]
    fn test_bytes_round_trip() {
        let snap = built(false).export();
        let bytes = snap.to_bytes().unwrap();
        assert_eq!(&bytes[bytes.len() - 8..bytes.len() - 4], SNAPSHOT_MAGIC);
        assert_eq!(IndexSnapshot::from_bytes(&bytes).unwrap(), snap);
    }

    #[test]
    fn test_corrupted_bytes_rejected() {
        let mut bytes = built(false).export().to_bytes().unwrap();
        bytes[10] ^= 0xFF;
        assert!(matches!(IndexSnapshot::from_bytes(&bytes), Err(IndexError::Corrupted(_))));
        assert!(matches!(IndexSnapshot::from_bytes(b"abc"), Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_import_preserves_search_and_free_list() {
        for quantized in [false, true] {
            let idx = built(quantized);
            let snap = idx.export();
            let copy = HnswIndex::import(snap, Arc::new(MemoryPointStore::new())).unwrap();
            assert_eq!(copy.len(), idx.len());
            assert_eq!(copy.graph.free_slots(), 2);
            assert_eq!(copy.stats(), idx.stats());
            for q in 0..20u64 {
                let x = q as f32 * 1.7;
                let v = [x.sin(), x.cos(), x * 0.01, (x * 0.3).sin()];
                assert_eq!(copy.search(&v, 5, 32).unwrap(), idx.search(&v, 5, 32).unwrap());
            }
        }
    }

    #[test]
    fn test_import_rejects_bad_layout() {
        let mut snap = built(false).export();
        if let Some(Some(rec)) = snap.slots.iter_mut().find(|s| s.is_some()) {
            rec.links[0].push(10_000);
        }
        assert!(matches!(
            HnswIndex::import(snap, Arc::new(MemoryPointStore::new())),
            Err(IndexError::Corrupted(_))
        ));

        let mut snap = built(false).export();
        snap.free.push(0);
        assert!(HnswIndex::import(snap, Arc::new(MemoryPointStore::new())).is_err());
    }
}
