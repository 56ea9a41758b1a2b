//! Product quantization: learned per-subvector codebooks that compress a
//! vector to one byte per subvector.
//!
//! The codec owns a write-through point cache (see [`cache`]) so it can be
//! refitted on everything it has seen and re-encode those points afterwards.

/// Dirty-tracked point cache backed by a [`PointStore`](crate::storage::PointStore).
pub mod cache;
/// Codebook training, encoding, and lookup-table distances.
pub mod pq;

pub use cache::{Point, PointCache};
pub use pq::{CodecView, Codebook, DistanceTable, ProductQuantizer};

use crate::config;
use serde::{Deserialize, Serialize};

/// Tunables for a [`ProductQuantizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerParams {
    /// Number of slices a vector is cut into; must divide the dimension.
    pub num_sub_vectors: usize,
    /// Centroids per slice, at most 256.
    pub num_centroids: usize,
    pub kmeans_iterations: usize,
    /// Cached point count at which the owning index fits the codec. 0 disables auto-fit.
    pub train_threshold: usize,
    /// Fixed seed for reproducible training.
    pub seed: Option<u64>,
}

impl Default for QuantizerParams {
    fn default() -> Self {
        Self {
            num_sub_vectors: config::PQ_DEFAULT_SUBVECTORS,
            num_centroids: config::PQ_DEFAULT_CENTROIDS,
            kmeans_iterations: config::PQ_KMEANS_ITERATIONS,
            train_threshold: config::PQ_DEFAULT_TRAIN_THRESHOLD,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_params() {
        let p: QuantizerParams = serde_json::from_str(r#"{"num_sub_vectors": 4}"#).unwrap();
        assert_eq!(p.num_sub_vectors, 4);
        assert_eq!(p.num_centroids, config::PQ_DEFAULT_CENTROIDS);
        assert_eq!(p.seed, None);
    }
}
