//! Shared retrieval primitives for passive streaming and active tool use:
//! in-process cosine vector search, clustering-based diversity sampling,
//! and dual-kind memory search.
//!
//! Embeddings from the generator are not guaranteed unit-length, so
//! similarity is true cosine (normalized by both norms), all in f32.
//! Zero-norm vectors and NaN (corrupt blobs) score 0.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;

use crate::error::Result;
use crate::events::EventLog;
use crate::memory::store::{MemoryStore, SearchFilters};
use crate::memory::types::{Episode, Fact};

/// Fixed seed for diversity clustering, so a given candidate set always
/// samples the same way.
const DIVERSITY_SEED: u64 = 42;
const KMEANS_ITERATIONS: usize = 10;

/// Which memory table(s) to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Episodic,
    Semantic,
    Both,
}

impl MemoryKind {
    pub fn includes_episodic(&self) -> bool {
        matches!(self, Self::Episodic | Self::Both)
    }

    pub fn includes_semantic(&self) -> bool {
        matches!(self, Self::Semantic | Self::Both)
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "both" => Ok(Self::Both),
            _ => Err(format!("unknown memory kind: {s}")),
        }
    }
}

/// A record that may carry an embedding.
pub trait Embedded {
    fn embedding(&self) -> Option<&[f32]>;
}

impl Embedded for Episode {
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

impl Embedded for Fact {
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

/// A record paired with its query similarity.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub item: T,
    pub similarity: f32,
}

pub type ScoredEpisode = Scored<Episode>;
pub type ScoredFact = Scored<Fact>;

/// Results of a dual-kind search.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub episodic: Vec<ScoredEpisode>,
    pub semantic: Vec<ScoredFact>,
}

/// Cosine similarity in f32. Zero-norm inputs and NaN results score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_nan() {
        0.0
    } else {
        similarity
    }
}

/// Vector search and diversity sampling over the store.
#[derive(Clone)]
pub struct MemoryRetriever {
    store: MemoryStore,
    events: EventLog,
}

impl MemoryRetriever {
    pub fn new(store: MemoryStore, events: EventLog) -> Self {
        Self { store, events }
    }

    /// Cosine-ranked episodes matching the filters. Rows with a missing,
    /// mismatched, or zero embedding score 0.
    pub fn search_episodes(
        &self,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredEpisode>> {
        let rows = self.store.episodes_with_embeddings(filters)?;
        Ok(rank(query, rows, limit, &self.events))
    }

    /// Cosine-ranked facts matching the filters.
    pub fn search_facts(
        &self,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredFact>> {
        let rows = self.store.facts_with_embeddings(filters)?;
        Ok(rank(query, rows, limit, &self.events))
    }

    /// Search one or both memory kinds: over-fetch 3× per kind, then
    /// diversity-sample down to `k_per_kind`.
    pub fn search_memories(
        &self,
        query: &[f32],
        kind: MemoryKind,
        k_per_kind: usize,
        filters: &SearchFilters,
    ) -> Result<SearchResults> {
        let mut results = SearchResults::default();

        if kind.includes_episodic() {
            let raw = self.search_episodes(query, k_per_kind * 3, filters)?;
            results.episodic = self.diversity_sample(raw, k_per_kind);
        }
        if kind.includes_semantic() {
            let raw = self.search_facts(query, k_per_kind * 3, filters)?;
            results.semantic = self.diversity_sample(raw, k_per_kind);
        }

        Ok(results)
    }

    /// Reduce redundancy among similar high-scoring rows: cluster the row
    /// embeddings into `min(k, |rows|)` groups and keep the most similar
    /// row from each, sorted by similarity.
    pub fn diversity_sample<T: Embedded>(&self, rows: Vec<Scored<T>>, k: usize) -> Vec<Scored<T>> {
        if rows.len() <= k {
            return rows;
        }

        let embeddings: Vec<&[f32]> = rows
            .iter()
            .filter_map(|row| row.item.embedding())
            .collect();
        if embeddings.len() < rows.len() || embeddings.len() < k {
            // Cannot cluster without a full embedding matrix
            let mut truncated = rows;
            truncated.truncate(k);
            return truncated;
        }

        let n_clusters = k.min(embeddings.len());
        let labels = kmeans(&embeddings, n_clusters);

        let mut selected: Vec<usize> = Vec::with_capacity(n_clusters);
        for cluster in 0..n_clusters {
            let best = labels
                .iter()
                .enumerate()
                .filter(|(_, label)| **label == cluster)
                .max_by(|(a, _), (b, _)| {
                    rows[*a]
                        .similarity
                        .partial_cmp(&rows[*b].similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(idx, _)| idx);
            if let Some(idx) = best {
                selected.push(idx);
            }
        }
        selected.sort_unstable();
        selected.dedup();

        self.events.emit(
            "diversity_sample",
            json!({
                "original_count": rows.len(),
                "sampled_count": selected.len(),
                "clusters_used": n_clusters,
            }),
        );

        let mut sampled: Vec<Scored<T>> = Vec::with_capacity(selected.len());
        let mut keep = vec![false; rows.len()];
        for idx in &selected {
            keep[*idx] = true;
        }
        for (idx, row) in rows.into_iter().enumerate() {
            if keep[idx] {
                sampled.push(row);
            }
        }
        sampled.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        sampled
    }
}

/// Score and truncate rows by cosine similarity, descending.
fn rank<T: Embedded>(
    query: &[f32],
    rows: Vec<T>,
    limit: usize,
    events: &EventLog,
) -> Vec<Scored<T>> {
    let mut scored: Vec<Scored<T>> = rows
        .into_iter()
        .map(|item| {
            let similarity = match item.embedding() {
                Some(embedding) if embedding.len() == query.len() => {
                    cosine_similarity(query, embedding)
                }
                Some(embedding) => {
                    events.emit_always(
                        "invariant_violation",
                        json!({
                            "reason": "embedding_dimension_mismatch",
                            "expected": query.len(),
                            "actual": embedding.len(),
                        }),
                    );
                    0.0
                }
                None => 0.0,
            };
            Scored { item, similarity }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// Lloyd's k-means with a fixed seed: deterministic initialization by
/// shuffled index, squared-euclidean assignment, mean update. Returns one
/// cluster label per input row.
fn kmeans(data: &[&[f32]], k: usize) -> Vec<usize> {
    let n = data.len();
    let dim = data[0].len();
    let mut rng = StdRng::seed_from_u64(DIVERSITY_SEED);

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);
    let mut centroids: Vec<Vec<f32>> = indices[..k].iter().map(|i| data[*i].to_vec()).collect();

    let mut labels = vec![0usize; n];
    for _ in 0..KMEANS_ITERATIONS {
        // Assign
        let mut changed = false;
        for (i, point) in data.iter().enumerate() {
            let mut best = 0usize;
            let mut best_distance = f32::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let distance = squared_distance(point, centroid);
                if distance < best_distance {
                    best_distance = distance;
                    best = c;
                }
            }
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        // Update; an emptied cluster keeps its previous centroid
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, point) in data.iter().enumerate() {
            counts[labels[i]] += 1;
            for (d, value) in point.iter().enumerate() {
                sums[labels[i]][d] += value;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                for d in 0..dim {
                    centroids[c][d] = sums[c][d] / counts[c] as f32;
                }
            }
        }
    }

    labels
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
