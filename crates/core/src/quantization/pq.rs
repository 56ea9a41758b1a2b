//! Product Quantization (PQ) codec.
//!
//! A vector of dimension D is cut into `num_sub_vectors` slices of length
//! `D / num_sub_vectors`; each slice is replaced by the id of its nearest
//! centroid in that slice's codebook. Distances are then table lookups:
//! a query builds one `[slice][centroid]` table ([`DistanceTable`]), and two
//! encoded points compare through the precomputed centroid-to-centroid table.
//!
//! Cosine is trained and evaluated as squared Euclidean. For unit vectors the
//! two rank identically (`|a - b|² = 2 · (1 - cos)`), and k-means is only
//! well-defined for Euclidean geometry.

use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::simd;
use crate::quantization::cache::{Point, PointCache};
use crate::quantization::QuantizerParams;
use crate::storage::{MemoryPointStore, PointStore};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trained centroids for every slice plus their pairwise distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    metric: DistanceMetric,
    num_sub_vectors: usize,
    num_centroids: usize,
    sub_vector_len: usize,
    /// `centroids[(s * K + c) * sub_len ..][..sub_len]`
    centroids: Vec<f32>,
    /// `centroid_distances[(s * K + a) * K + b]`
    centroid_distances: Vec<f32>,
}

/// Per-query distances from each query slice to every centroid of that slice.
#[derive(Debug, Clone)]
pub struct DistanceTable {
    table: Vec<f32>,
    num_sub_vectors: usize,
    num_centroids: usize,
}

impl DistanceTable {
    /// Approximate distance from the query to an encoded point.
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> Result<f32> {
        if codes.len() != self.num_sub_vectors {
            return Err(IndexError::Corrupted(format!(
                "code length {} does not match {} sub-vectors",
                codes.len(),
                self.num_sub_vectors
            )));
        }
        let k = self.num_centroids;
        let mut sum = 0.0f32;
        for (s, &c) in codes.iter().enumerate() {
            let c = c as usize;
            if c >= k {
                return Err(IndexError::Corrupted(format!(
                    "centroid id {c} out of range for {k} centroids"
                )));
            }
            sum += self.table[s * k + c];
        }
        Ok(sum)
    }
}

impl Codebook {
    fn train<S: AsRef<[f32]> + Sync>(
        metric: DistanceMetric,
        params: &QuantizerParams,
        dim: usize,
        samples: &[S],
    ) -> Self {
        let m = params.num_sub_vectors;
        let k = params.num_centroids;
        let sub_len = dim / m;
        let base_seed = params.seed.unwrap_or_else(rand::random);

        let per_slice: Vec<Vec<f32>> = (0..m)
            .into_par_iter()
            .map(|s| {
                let data: Vec<f32> = samples
                    .iter()
                    .flat_map(|v| v.as_ref()[s * sub_len..(s + 1) * sub_len].iter().copied())
                    .collect();
                let mut rng = StdRng::seed_from_u64(
                    base_seed ^ (s as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
                );
                kmeans(&data, sub_len, k, params.kmeans_iterations, &mut rng)
            })
            .collect();

        let mut centroids = Vec::with_capacity(m * k * sub_len);
        for slice in per_slice {
            centroids.extend_from_slice(&slice);
        }
        Self::from_centroids(metric, m, k, sub_len, centroids)
    }

    fn from_centroids(
        metric: DistanceMetric,
        num_sub_vectors: usize,
        num_centroids: usize,
        sub_vector_len: usize,
        centroids: Vec<f32>,
    ) -> Self {
        let k = num_centroids;
        let mut centroid_distances = vec![0.0f32; num_sub_vectors * k * k];
        centroid_distances
            .par_chunks_mut(k * k)
            .enumerate()
            .for_each(|(s, block)| {
                for a in 0..k {
                    let ca = &centroids[(s * k + a) * sub_vector_len..][..sub_vector_len];
                    for b in 0..k {
                        let cb = &centroids[(s * k + b) * sub_vector_len..][..sub_vector_len];
                        block[a * k + b] = metric.distance(ca, cb);
                    }
                }
            });
        Self {
            metric,
            num_sub_vectors,
            num_centroids,
            sub_vector_len,
            centroids,
            centroid_distances,
        }
    }

    /// Checks that the table sizes agree with the declared shape.
    pub fn check_shape(&self, dim: usize) -> Result<()> {
        let (m, k, len) = (self.num_sub_vectors, self.num_centroids, self.sub_vector_len);
        if m == 0 || k == 0 || k > config::PQ_MAX_CENTROIDS || m * len != dim {
            return Err(IndexError::Corrupted(format!(
                "codebook shape {m}x{k}x{len} does not fit dimension {dim}"
            )));
        }
        if self.centroids.len() != m * k * len || self.centroid_distances.len() != m * k * k {
            return Err(IndexError::Corrupted("codebook table sizes are inconsistent".into()));
        }
        Ok(())
    }

    #[inline]
    fn centroid(&self, s: usize, c: usize) -> &[f32] {
        &self.centroids[(s * self.num_centroids + c) * self.sub_vector_len..][..self.sub_vector_len]
    }

    /// Nearest centroid by squared L2; ties go to the lowest id.
    fn nearest(&self, s: usize, slice: &[f32]) -> u8 {
        let l2 = simd::kernels().l2_sq;
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.num_centroids {
            let d = l2(slice, self.centroid(s, c));
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        best as u8
    }

    /// Encodes a vector already checked to have the codec's dimension.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        vector
            .chunks_exact(self.sub_vector_len)
            .enumerate()
            .map(|(s, slice)| self.nearest(s, slice))
            .collect()
    }

    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        self.check_codes(codes)?;
        let mut out = Vec::with_capacity(self.num_sub_vectors * self.sub_vector_len);
        for (s, &c) in codes.iter().enumerate() {
            out.extend_from_slice(self.centroid(s, c as usize));
        }
        Ok(out)
    }

    pub fn distance_table(&self, query: &[f32]) -> DistanceTable {
        let k = self.num_centroids;
        let mut table = Vec::with_capacity(self.num_sub_vectors * k);
        for (s, slice) in query.chunks_exact(self.sub_vector_len).enumerate() {
            table.extend((0..k).map(|c| self.metric.distance(slice, self.centroid(s, c))));
        }
        DistanceTable {
            table,
            num_sub_vectors: self.num_sub_vectors,
            num_centroids: k,
        }
    }

    /// Symmetric distance between two encoded points.
    pub fn code_distance(&self, a: &[u8], b: &[u8]) -> Result<f32> {
        self.check_codes(a)?;
        self.check_codes(b)?;
        let k = self.num_centroids;
        Ok(a.iter()
            .zip(b)
            .enumerate()
            .map(|(s, (&ca, &cb))| self.centroid_distances[(s * k + ca as usize) * k + cb as usize])
            .sum())
    }

    fn check_codes(&self, codes: &[u8]) -> Result<()> {
        if codes.len() != self.num_sub_vectors {
            return Err(IndexError::Corrupted(format!(
                "code length {} does not match {} sub-vectors",
                codes.len(),
                self.num_sub_vectors
            )));
        }
        if let Some(&c) = codes.iter().find(|&&c| c as usize >= self.num_centroids) {
            return Err(IndexError::Corrupted(format!(
                "centroid id {c} out of range for {} centroids",
                self.num_centroids
            )));
        }
        Ok(())
    }

    pub fn num_sub_vectors(&self) -> usize {
        self.num_sub_vectors
    }

    pub fn num_centroids(&self) -> usize {
        self.num_centroids
    }
}

/// k-means++ seeding followed by Lloyd iterations over `data`, a flat array
/// of `sub_len`-long points. Returns `k * sub_len` centroid values.
fn kmeans(data: &[f32], sub_len: usize, k: usize, iterations: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / sub_len;
    let point = |i: usize| &data[i * sub_len..(i + 1) * sub_len];
    let mut centroids = Vec::with_capacity(k * sub_len);

    if n <= k {
        // Every sample is a centroid; the rest repeat samples.
        for c in 0..k {
            centroids.extend_from_slice(point(c % n));
        }
        return centroids;
    }

    let l2 = simd::kernels().l2_sq;

    centroids.extend_from_slice(point(rng.gen_range(0..n)));
    let mut min_dists = vec![f32::INFINITY; n];
    for c in 1..k {
        let last = &centroids[(c - 1) * sub_len..c * sub_len];
        let mut total = 0.0f64;
        for (i, md) in min_dists.iter_mut().enumerate() {
            let d = l2(point(i), last);
            if d < *md {
                *md = d;
            }
            total += *md as f64;
        }

        let chosen = if total <= f64::EPSILON {
            rng.gen_range(0..n)
        } else {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            min_dists
                .iter()
                .position(|&d| {
                    cumulative += d as f64;
                    cumulative >= threshold
                })
                .unwrap_or(n - 1)
        };
        centroids.extend_from_slice(point(chosen));
    }

    let mut assignments = vec![usize::MAX; n];
    let mut sums = vec![0.0f32; k * sub_len];
    let mut counts = vec![0usize; k];
    for _ in 0..iterations {
        let mut changed = false;
        for (i, slot) in assignments.iter_mut().enumerate() {
            let p = point(i);
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for c in 0..k {
                let d = l2(p, &centroids[c * sub_len..(c + 1) * sub_len]);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        sums.fill(0.0);
        counts.fill(0);
        for (i, &c) in assignments.iter().enumerate() {
            counts[c] += 1;
            for (acc, v) in sums[c * sub_len..(c + 1) * sub_len].iter_mut().zip(point(i)) {
                *acc += v;
            }
        }
        // Empty clusters keep their previous centroid.
        for c in (0..k).filter(|&c| counts[c] > 0) {
            let inv = 1.0 / counts[c] as f32;
            for (dst, src) in centroids[c * sub_len..(c + 1) * sub_len]
                .iter_mut()
                .zip(&sums[c * sub_len..(c + 1) * sub_len])
            {
                *dst = src * inv;
            }
        }
    }

    centroids
}

/// Product quantizer with its own point cache.
#[derive(Debug)]
pub struct ProductQuantizer {
    metric: DistanceMetric,
    params: QuantizerParams,
    dim: usize,
    codebook: RwLock<Option<Arc<Codebook>>>,
    cache: PointCache,
}

impl ProductQuantizer {
    /// Creates an untrained codec over an in-memory point store.
    pub fn new(metric_name: &str, params: QuantizerParams, dim: usize) -> Result<Self> {
        Self::with_store(metric_name, params, dim, Arc::new(MemoryPointStore::new()))
    }

    pub fn with_store(
        metric_name: &str,
        params: QuantizerParams,
        dim: usize,
        store: Arc<dyn PointStore>,
    ) -> Result<Self> {
        Self::with_metric(DistanceMetric::from_name(metric_name), params, dim, store)
    }

    pub fn with_metric(
        metric: DistanceMetric,
        params: QuantizerParams,
        dim: usize,
        store: Arc<dyn PointStore>,
    ) -> Result<Self> {
        if dim == 0 || dim > config::MAX_DIMENSION {
            return Err(IndexError::config(format!(
                "dimension must be between 1 and {}, got {dim}",
                config::MAX_DIMENSION
            )));
        }
        if params.num_sub_vectors == 0 || dim % params.num_sub_vectors != 0 {
            return Err(IndexError::config(format!(
                "dimension {dim} is not divisible into {} sub-vectors",
                params.num_sub_vectors
            )));
        }
        if params.num_centroids == 0 || params.num_centroids > config::PQ_MAX_CENTROIDS {
            return Err(IndexError::config(format!(
                "num_centroids must be between 1 and {}, got {}",
                config::PQ_MAX_CENTROIDS,
                params.num_centroids
            )));
        }
        let metric = match metric {
            DistanceMetric::Cosine => {
                tracing::debug!("product quantizer trains cosine as euclidean");
                DistanceMetric::Euclidean
            }
            other => other,
        };
        Ok(Self {
            metric,
            params,
            dim,
            codebook: RwLock::new(None),
            cache: PointCache::new(store),
        })
    }

    /// Metric the codebook is trained and evaluated under.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn params(&self) -> &QuantizerParams {
        &self.params
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn is_trained(&self) -> bool {
        self.codebook.read().is_some()
    }

    /// Snapshot of the current codebook.
    pub fn codebook(&self) -> Option<Arc<Codebook>> {
        self.codebook.read().clone()
    }

    fn trained(&self) -> Result<Arc<Codebook>> {
        self.codebook().ok_or(IndexError::UntrainedCodec)
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Trains the codebook on `samples`, then re-encodes every cached point.
    pub fn fit<S: AsRef<[f32]> + Sync>(&self, samples: &[S]) -> Result<()> {
        let codebook = Arc::new(self.train_codebook(samples)?);
        let reencoded = self.install(codebook)?;
        tracing::info!(
            samples = samples.len(),
            sub_vectors = self.params.num_sub_vectors,
            centroids = self.params.num_centroids,
            reencoded,
            "product quantizer trained"
        );
        Ok(())
    }

    /// Trains a codebook on `samples` without installing it.
    pub(crate) fn train_codebook<S: AsRef<[f32]> + Sync>(&self, samples: &[S]) -> Result<Codebook> {
        if samples.is_empty() {
            return Err(IndexError::config("cannot fit product quantizer on zero samples"));
        }
        for s in samples {
            self.check_dim(s.as_ref())?;
        }
        Ok(Codebook::train(self.metric, &self.params, self.dim, samples))
    }

    /// Makes `codebook` current and re-encodes every cached point with it.
    /// Returns the number of points re-encoded.
    pub(crate) fn install(&self, codebook: Arc<Codebook>) -> Result<usize> {
        *self.codebook.write() = Some(codebook.clone());
        self.cache.reencode(|v| Ok(codebook.encode(v)))
    }

    /// Fits on every cached point. Returns the sample count.
    pub fn fit_cached(&self) -> Result<usize> {
        let vectors: Vec<Vec<f32>> = self.cache.points().into_iter().map(|(_, p)| p.vector).collect();
        self.fit(&vectors)?;
        Ok(vectors.len())
    }

    /// Installs a previously trained codebook.
    pub fn load_codebook(&self, codebook: Codebook) -> Result<()> {
        codebook.check_shape(self.dim)?;
        if codebook.num_sub_vectors != self.params.num_sub_vectors
            || codebook.num_centroids != self.params.num_centroids
        {
            return Err(IndexError::Corrupted(
                "codebook shape does not match quantizer parameters".into(),
            ));
        }
        *self.codebook.write() = Some(Arc::new(codebook));
        Ok(())
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.check_dim(vector)?;
        Ok(self.trained()?.encode(vector))
    }

    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        self.trained()?.decode(codes)
    }

    /// Precomputes the lookup table for `query`.
    pub fn distance_from_float(&self, query: &[f32]) -> Result<DistanceTable> {
        self.check_dim(query)?;
        Ok(self.trained()?.distance_table(query))
    }

    pub fn distance_between_codes(&self, a: &[u8], b: &[u8]) -> Result<f32> {
        self.trained()?.code_distance(a, b)
    }

    /// Caches `vector` under `id`, encoded when trained. Returns the codes.
    pub fn set(&self, id: u64, vector: &[f32]) -> Result<Option<Vec<u8>>> {
        self.check_dim(vector)?;
        let codes = self.codebook().map(|cb| cb.encode(vector));
        self.cache.set(
            id,
            Point {
                vector: vector.to_vec(),
                codes: codes.clone(),
            },
        )?;
        Ok(codes)
    }

    /// Restores a point exactly as exported, codes included.
    pub(crate) fn restore(&self, id: u64, point: Point) -> Result<()> {
        self.check_dim(&point.vector)?;
        self.cache.set(id, point)
    }

    pub fn get(&self, id: u64) -> Result<Point> {
        self.cache.get(id)
    }

    pub fn delete(&self, ids: &[u64]) -> Result<()> {
        self.cache.delete(ids)
    }

    pub fn flush(&self) -> Result<usize> {
        self.cache.flush()
    }

    pub fn points(&self) -> Vec<(u64, Point)> {
        self.cache.points()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.cache.dirty_count()
    }

    /// True once the cache holds `train_threshold` points and no codebook exists.
    pub fn should_fit(&self) -> bool {
        self.params.train_threshold > 0
            && !self.is_trained()
            && self.cache.len() >= self.params.train_threshold
    }
}

/// Read-only access to the codec owned by an index.
///
/// Training and point writes go through [`HnswIndex`](crate::hnsw::HnswIndex)
/// so graph nodes always carry codes from the installed codebook.
#[derive(Debug, Clone, Copy)]
pub struct CodecView<'a> {
    codec: &'a ProductQuantizer,
}

impl<'a> CodecView<'a> {
    pub(crate) fn new(codec: &'a ProductQuantizer) -> Self {
        Self { codec }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.codec.metric()
    }

    pub fn params(&self) -> &'a QuantizerParams {
        self.codec.params()
    }

    pub fn dimension(&self) -> usize {
        self.codec.dimension()
    }

    pub fn is_trained(&self) -> bool {
        self.codec.is_trained()
    }

    pub fn codebook(&self) -> Option<Arc<Codebook>> {
        self.codec.codebook()
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.codec.encode(vector)
    }

    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        self.codec.decode(codes)
    }

    pub fn distance_from_float(&self, query: &[f32]) -> Result<DistanceTable> {
        self.codec.distance_from_float(query)
    }

    pub fn distance_between_codes(&self, a: &[u8], b: &[u8]) -> Result<f32> {
        self.codec.distance_between_codes(a, b)
    }

    pub fn get(&self, id: u64) -> Result<Point> {
        self.codec.get(id)
    }

    pub fn points(&self) -> Vec<(u64, Point)> {
        self.codec.points()
    }

    pub fn cached_len(&self) -> usize {
        self.codec.cached_len()
    }

    pub fn dirty_count(&self) -> usize {
        self.codec.dirty_count()
    }

    /// Retries store writes for dirty points.
    pub fn flush(&self) -> Result<usize> {
        self.codec.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    fn params(m: usize, k: usize) -> QuantizerParams {
        QuantizerParams {
            num_sub_vectors: m,
            num_centroids: k,
            seed: Some(7),
            ..QuantizerParams::default()
        }
    }

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_config_errors() {
        assert!(matches!(
            ProductQuantizer::new("euclidean", params(5, 16), 127),
            Err(IndexError::Config(_))
        ));
        assert!(matches!(
            ProductQuantizer::new("euclidean", params(4, 300), 128),
            Err(IndexError::Config(_))
        ));
        assert!(matches!(
            ProductQuantizer::new("euclidean", params(0, 16), 128),
            Err(IndexError::Config(_))
        ));
        assert!(ProductQuantizer::new("euclidean", params(4, 256), 128).is_ok());
    }

    #[test]
    fn test_cosine_trains_as_euclidean() {
        let pq = ProductQuantizer::new("cosine", params(2, 4), 8).unwrap();
        assert_eq!(pq.metric(), DistanceMetric::Euclidean);
        let pq = ProductQuantizer::new("bogus", params(2, 4), 8).unwrap();
        assert_eq!(pq.metric(), DistanceMetric::Euclidean);
    }

    #[test]
    fn test_untrained_encode_fails() {
        let pq = ProductQuantizer::new("euclidean", params(2, 4), 8).unwrap();
        assert!(matches!(pq.encode(&[0.0; 8]), Err(IndexError::UntrainedCodec)));
        assert!(matches!(pq.distance_from_float(&[0.0; 8]), Err(IndexError::UntrainedCodec)));
    }

    #[test]
    fn test_fit_rejects_empty_and_bad_samples() {
        let pq = ProductQuantizer::new("euclidean", params(2, 4), 8).unwrap();
        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(matches!(pq.fit(&empty), Err(IndexError::Config(_))));
        assert!(matches!(
            pq.fit(&[vec![0.0; 7]]),
            Err(IndexError::DimensionMismatch { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn test_encode_length_and_range() {
        let pq = ProductQuantizer::new("euclidean", params(4, 16), 16).unwrap();
        pq.fit(&random_vectors(200, 16, 1)).unwrap();
        for v in random_vectors(20, 16, 2) {
            let codes = pq.encode(&v).unwrap();
            assert_eq!(codes.len(), 4);
            assert!(codes.iter().all(|&c| (c as usize) < 16));
        }
        assert!(matches!(
            pq.encode(&[0.0; 15]),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_fewer_samples_than_centroids() {
        let pq = ProductQuantizer::new("euclidean", params(2, 8), 4).unwrap();
        let samples = vec![vec![0.0, 0.0, 1.0, 1.0], vec![5.0, 5.0, 9.0, 9.0]];
        pq.fit(&samples).unwrap();
        for s in &samples {
            let decoded = pq.decode(&pq.encode(s).unwrap()).unwrap();
            assert_eq!(&decoded, s);
        }
    }

    #[test]
    fn test_ties_pick_lowest_centroid() {
        let pq = ProductQuantizer::new("euclidean", params(1, 4), 2).unwrap();
        // One sample: all four centroids are copies of it.
        pq.fit(&[vec![1.0, 1.0]]).unwrap();
        assert_eq!(pq.encode(&[3.0, -2.0]).unwrap(), vec![0]);
    }

    #[test]
    fn test_table_distance_matches_decoded() {
        let pq = ProductQuantizer::new("euclidean", params(4, 32), 16).unwrap();
        let data = random_vectors(300, 16, 3);
        pq.fit(&data).unwrap();
        let query = &data[0];
        let table = pq.distance_from_float(query).unwrap();
        for v in data.iter().take(10) {
            let codes = pq.encode(v).unwrap();
            let decoded = pq.decode(&codes).unwrap();
            let exact = DistanceMetric::Euclidean.distance(query, &decoded);
            let approx = table.distance(&codes).unwrap();
            assert!((exact - approx).abs() <= 1e-3 * exact.max(1.0));
        }
    }

    #[test]
    fn test_table_rejects_bad_codes() {
        let pq = ProductQuantizer::new("euclidean", params(2, 4), 4).unwrap();
        pq.fit(&random_vectors(20, 4, 4)).unwrap();
        let table = pq.distance_from_float(&[0.0; 4]).unwrap();
        assert!(matches!(table.distance(&[0]), Err(IndexError::Corrupted(_))));
        assert!(matches!(table.distance(&[0, 9]), Err(IndexError::Corrupted(_))));
        assert!(matches!(pq.distance_between_codes(&[0, 1], &[1]), Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_code_distance_symmetric() {
        let pq = ProductQuantizer::new("euclidean", params(4, 16), 16).unwrap();
        let data = random_vectors(100, 16, 5);
        pq.fit(&data).unwrap();
        let a = pq.encode(&data[1]).unwrap();
        let b = pq.encode(&data[2]).unwrap();
        let ab = pq.distance_between_codes(&a, &b).unwrap();
        let ba = pq.distance_between_codes(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(pq.distance_between_codes(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_seeded_training_is_deterministic() {
        let data = random_vectors(150, 8, 6);
        let a = ProductQuantizer::new("euclidean", params(2, 16), 8).unwrap();
        let b = ProductQuantizer::new("euclidean", params(2, 16), 8).unwrap();
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_eq!(a.codebook(), b.codebook());
    }

    #[test]
    fn test_fit_reencodes_cached_points() {
        let pq = ProductQuantizer::new("euclidean", params(2, 4), 4).unwrap();
        let data = random_vectors(30, 4, 8);
        for (i, v) in data.iter().enumerate() {
            assert_eq!(pq.set(i as u64, v).unwrap(), None);
        }
        assert_eq!(pq.flush().unwrap(), 0);
        assert_eq!(pq.fit_cached().unwrap(), 30);
        assert_eq!(pq.dirty_count(), 30);
        let p = pq.get(3).unwrap();
        assert_eq!(p.codes, Some(pq.encode(&data[3]).unwrap()));
        assert_eq!(pq.flush().unwrap(), 30);
    }

    #[test]
    fn test_should_fit_threshold() {
        let p = QuantizerParams {
            train_threshold: 3,
            ..params(1, 2)
        };
        let pq = ProductQuantizer::new("l2", p, 2).unwrap();
        pq.set(1, &[0.0, 0.0]).unwrap();
        pq.set(2, &[1.0, 0.0]).unwrap();
        assert!(!pq.should_fit());
        pq.set(3, &[0.0, 1.0]).unwrap();
        assert!(pq.should_fit());
        pq.fit_cached().unwrap();
        assert!(!pq.should_fit());
    }

    #[test]
    fn test_load_codebook_shape_check() {
        let a = ProductQuantizer::new("euclidean", params(2, 4), 8).unwrap();
        a.fit(&random_vectors(40, 8, 9)).unwrap();
        let cb = (*a.codebook().unwrap()).clone();
        let b = ProductQuantizer::new("euclidean", params(2, 4), 8).unwrap();
        b.load_codebook(cb.clone()).unwrap();
        assert!(b.is_trained());
        let c = ProductQuantizer::new("euclidean", params(4, 4), 8).unwrap();
        assert!(matches!(c.load_codebook(cb), Err(IndexError::Corrupted(_))));
    }
}
