//! Distance metrics for graph construction, search, and codec training.
//!
//! Every metric returns a value where **lower is better**. Euclidean returns
//! the squared distance: it ranks identically to the true distance and skips
//! the square root, so it must be used consistently within one index.
//!
//! Unrecognized metric names resolve to [`DistanceMetric::DEFAULT`]
//! (Euclidean) at every call site.

use crate::hnsw::simd;
use serde::{Deserialize, Serialize};

/// A pure distance function over two equal-length vectors.
pub type DistanceFn = fn(&[f32], &[f32]) -> f32;

/// Distance metric used for vector similarity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    Euclidean,
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Negative dot product: `-dot(a, b)`. Lower = higher similarity.
    DotProduct,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl DistanceMetric {
    /// Metric used when a name is not recognized.
    pub const DEFAULT: DistanceMetric = DistanceMetric::Euclidean;

    /// Resolves a metric by name, case-insensitively.
    ///
    /// Accepts `euclidean`/`l2`, `cosine`, and `dot`/`dotproduct`/`inner_product`.
    /// Anything else resolves to [`DistanceMetric::DEFAULT`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => DistanceMetric::Euclidean,
            "cosine" => DistanceMetric::Cosine,
            "dot" | "dotproduct" | "dot_product" | "inner_product" => DistanceMetric::DotProduct,
            other => {
                tracing::warn!(metric = other, "unknown distance metric, using euclidean");
                Self::DEFAULT
            }
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::DotProduct => "dot",
        }
    }

    /// Distance between two vectors using the process-wide kernels.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let k = simd::kernels();
        match self {
            DistanceMetric::Euclidean => (k.l2_sq)(a, b),
            DistanceMetric::Cosine => 1.0 - (k.cosine)(a, b),
            DistanceMetric::DotProduct => -(k.dot)(a, b),
        }
    }

    /// Same as [`distance`](Self::distance) but always on the scalar path.
    pub fn distance_scalar(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => simd::scalar_l2_sq(a, b),
            DistanceMetric::Cosine => 1.0 - simd::scalar_cosine(a, b),
            DistanceMetric::DotProduct => -simd::scalar_dot(a, b),
        }
    }

    /// Plain function pointer for this metric.
    pub fn as_fn(&self) -> DistanceFn {
        match self {
            DistanceMetric::Euclidean => euclidean,
            DistanceMetric::Cosine => cosine,
            DistanceMetric::DotProduct => dot_product,
        }
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    DistanceMetric::Euclidean.distance(a, b)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    DistanceMetric::Cosine.distance(a, b)
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    DistanceMetric::DotProduct.distance(a, b)
}

/// Resolves `name` to a distance function. Unknown names get Euclidean.
pub fn distance_for(name: &str) -> DistanceFn {
    DistanceMetric::from_name(name).as_fn()
}
