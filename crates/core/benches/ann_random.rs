//! ANN Benchmark: uniform random vectors, exact vs product-quantized search.
//! Measures build rate, Recall@10 against brute force, and QPS per ef.
//!
//! Usage: cargo bench --bench ann_random

use hnswpq_core::hnsw::{DistanceMetric, HnswIndex, IndexConfig};
use hnswpq_core::quantization::QuantizerParams;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::time::Instant;

const DIM: usize = 64;
const TRAIN: usize = 20_000;
const QUERIES: usize = 500;
const K: usize = 10;

fn random_vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

fn ground_truth(train: &[Vec<f32>], queries: &[Vec<f32>]) -> Vec<Vec<u64>> {
    queries
        .iter()
        .map(|q| {
            let mut all: Vec<(f32, u64)> = train
                .iter()
                .enumerate()
                .map(|(i, v)| (DistanceMetric::Euclidean.distance(q, v), i as u64))
                .collect();
            all.sort_by(|a, b| a.0.total_cmp(&b.0));
            all.into_iter().take(K).map(|(_, id)| id).collect()
        })
        .collect()
}

fn recall_at_k(predicted: &[u64], truth: &[u64]) -> f64 {
    let truth: HashSet<u64> = truth.iter().copied().collect();
    predicted.iter().filter(|id| truth.contains(id)).count() as f64 / K as f64
}

fn main() {
    println!("=== ANN Benchmark: random {DIM}d, {TRAIN} vectors ===");
    println!();

    let train = random_vectors(TRAIN, 1);
    let queries = random_vectors(QUERIES, 2);
    print!("Computing ground truth...");
    let truth = ground_truth(&train, &queries);
    println!(" done");

    let exact = IndexConfig::new(DIM, "euclidean");
    let mut pq = IndexConfig::new(DIM, "euclidean").with_quantizer(QuantizerParams {
        num_sub_vectors: 16,
        train_threshold: 5_000,
        seed: Some(7),
        ..QuantizerParams::default()
    });
    pq.hnsw.store_raw_vectors = true;
    let configs = vec![("exact f32", exact), ("pq16 + rerank", pq)];

    for (label, config) in configs {
        println!();
        println!("Config: {label}");
        let index = match HnswIndex::new(config) {
            Ok(index) => index,
            Err(e) => panic!("bad config: {e}"),
        };

        let t0 = Instant::now();
        for (i, v) in train.iter().enumerate() {
            if let Err(e) = index.insert(i as u64, v) {
                panic!("insert {i} failed: {e}");
            }
        }
        let build = t0.elapsed().as_secs_f64();
        let stats = index.stats();
        println!(
            "  Build time: {build:.2}s ({:.0} inserts/s), max layer {}, avg degree {:.1}",
            TRAIN as f64 / build,
            stats.max_layer,
            stats.average_degree
        );

        println!("  ef_search | Recall@10 |    QPS");
        println!("  ----------+-----------+----------");
        for ef in [10, 20, 40, 80, 160] {
            let t0 = Instant::now();
            let mut recall = 0.0;
            for (q, gt) in queries.iter().zip(&truth) {
                let hits = index.search(q, K, ef).unwrap_or_default();
                let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
                recall += recall_at_k(&ids, gt);
            }
            let elapsed = t0.elapsed().as_secs_f64();
            println!(
                "  {ef:>9} | {:.4}    | {:>8.1}",
                recall / QUERIES as f64,
                QUERIES as f64 / elapsed
            );
        }
    }

    println!();
    println!("=== Benchmark complete ===");
}
