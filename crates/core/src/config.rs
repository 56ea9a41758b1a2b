//! Global configuration constants for hnswpq.
//!
//! Tuning defaults and input validation limits are defined here. Runtime
//! configuration lives in [`HnswConfig`](crate::hnsw::HnswConfig),
//! [`QuantizerParams`](crate::quantization::QuantizerParams) and
//! [`IndexConfig`](crate::hnsw::IndexConfig), which fall back to these values.

/// Default number of neighbors selected per node on insert.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default adjacency cap for layers above 0.
pub const HNSW_DEFAULT_M_MAX: usize = 16;

/// Default adjacency cap at layer 0 (typically `2 * M`).
pub const HNSW_DEFAULT_M_MAX0: usize = 32;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Upper bound on centroids per subvector: codes are stored as `u8`.
pub const PQ_MAX_CENTROIDS: usize = 256;

/// Default number of centroids per subvector.
pub const PQ_DEFAULT_CENTROIDS: usize = 256;

/// Default number of subvectors a vector is split into.
pub const PQ_DEFAULT_SUBVECTORS: usize = 8;

/// Lloyd iterations run after k-means++ seeding.
pub const PQ_KMEANS_ITERATIONS: usize = 25;

/// Cached point count that triggers automatic codec training.
pub const PQ_DEFAULT_TRAIN_THRESHOLD: usize = 1_000;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Relative tolerance within which SIMD and scalar kernels must agree.
pub const KERNEL_RELATIVE_TOLERANCE: f32 = 1e-4;
