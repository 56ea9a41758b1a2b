//! # hnswpq-core
//!
//! Embeddable in-memory approximate nearest neighbor engine: an HNSW graph
//! index with integrated product quantization over a pluggable distance layer.
//!
//! Everything is synchronous and thread-safe; an index can be shared across
//! threads behind an `Arc` and mutated concurrently.

/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Error type and result alias shared by every module.
pub mod error;
/// HNSW approximate nearest neighbor index: graph, insert, search, delete, and distance metrics.
pub mod hnsw;
/// Product quantization: codebook training, encoding, and lookup-table distances.
pub mod quantization;
/// Storage layer: point store interface and the collection manager.
pub mod storage;

pub use error::{IndexError, Result};
pub use hnsw::{DistanceMetric, HnswConfig, HnswIndex, IndexConfig, SearchResult};
pub use quantization::{ProductQuantizer, QuantizerParams};
pub use storage::{CollectionManager, IndexHandle, MemoryPointStore, PointStore};
