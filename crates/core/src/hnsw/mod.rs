//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Nodes live in an arena of `u32` slots addressed by caller-supplied `u64`
//! ids. Each node keeps one adjacency list per layer behind its own lock, so
//! inserts and searches run concurrently; deletes and codec training take an
//! index-wide exclusive gate.
//!
//! When a product quantizer is configured, the index holds raw vectors until
//! the codec is trained and then switches beam search to lookup-table
//! distances on codes, optionally reranking with the exact metric.

/// HNSW delete with neighbor repair and slot recycling.
pub mod delete;
/// Distance metrics: euclidean, cosine, and dot product.
pub mod distance;
/// HNSW graph arena, node type, and configuration.
pub mod graph;
/// Nearest-first and furthest-first candidate heaps.
pub mod heap;
/// The index type, its locking, stats, validation, and codec training.
pub mod index;
/// HNSW insertion with bidirectional links and heuristic pruning.
pub mod insert;
/// HNSW search: greedy descent and layer beam search.
pub mod search;
/// CPU-dispatched distance kernels.
pub mod simd;
/// Full-state snapshot export and import.
pub mod snapshot;
/// Epoch-based visited set for graph traversal.
pub mod visited;

pub use distance::{distance_for, DistanceFn, DistanceMetric};
pub use graph::{EntryPoint, HnswConfig, IndexConfig, LevelGenerator, NeighborSelection};
pub use index::{HnswIndex, IndexStats};
pub use search::SearchResult;
pub use snapshot::{IndexSnapshot, NodeRecord};
