//! Storage layer: the point store interface consumed by the codec and the
//! collection manager that owns one index per name.

/// Byte-oriented key/value point store.
pub mod kv;
/// Named indexes behind a single fault boundary.
pub mod manager;

pub use kv::{MemoryPointStore, PointStore};
pub use manager::{CollectionManager, IndexHandle};
