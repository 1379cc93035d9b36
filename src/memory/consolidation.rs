//! Consolidation: clusters unconsolidated episodes and distills them into
//! semantic facts.
//!
//! Episodes are grouped by HDBSCAN over their embeddings (noise points
//! become singleton clusters), oversized clusters are re-clustered with a
//! larger minimum size and chunked as a last resort, and each batch is put
//! to the generator in one prompt asking for first-person facts grounded
//! in the batch summaries. Failure of one batch never aborts the others;
//! its episodes simply stay unconsolidated for the next run.

use std::sync::Arc;

use hdbscan::{Hdbscan, HdbscanHyperParams};
use serde_json::json;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::events::EventLog;
use crate::generator::{ChatRequest, EmbeddingTask, Generator};
use crate::memory::store::MemoryStore;
use crate::memory::types::{Episode, EpisodeStatus, FactStatus, NewFact};

/// Confidence assigned to freshly extracted facts.
const EXTRACTED_CONFIDENCE: f64 = 0.7;

/// Minimum characters for a parsed fact line.
const MIN_FACT_CHARS: usize = 6;

/// Relational analysis upserts under this category.
const INTERACTION_STYLE: &str = "interaction_style";

// ── Clustering ───────────────────────────────────────────────────────────

/// Density-based episode batching for consolidation.
pub struct EpisodeClustering {
    min_cluster_size: usize,
    max_cluster_size: usize,
}

impl EpisodeClustering {
    pub fn new(min_cluster_size: usize, max_cluster_size: usize) -> Self {
        Self {
            min_cluster_size: min_cluster_size.max(2),
            max_cluster_size: max_cluster_size.max(1),
        }
    }

    /// Cluster episode indices by embedding density. Noise points come
    /// back as singleton clusters; fewer episodes than the minimum cluster
    /// size are all singletons.
    pub fn cluster(&self, episodes: &[Episode]) -> Vec<Vec<usize>> {
        self.cluster_indices(episodes, &(0..episodes.len()).collect::<Vec<_>>(), self.min_cluster_size)
    }

    fn cluster_indices(
        &self,
        episodes: &[Episode],
        indices: &[usize],
        min_size: usize,
    ) -> Vec<Vec<usize>> {
        if indices.len() < min_size {
            return indices.iter().map(|i| vec![*i]).collect();
        }

        let features: Vec<Vec<f32>> = indices
            .iter()
            .map(|i| episodes[*i].embedding.clone().unwrap_or_default())
            .collect();

        let hyper_params = HdbscanHyperParams::builder()
            .min_cluster_size(min_size)
            .min_samples(1)
            .build();
        let clusterer = Hdbscan::new(&features, hyper_params);
        let labels = match clusterer.cluster() {
            Ok(labels) => labels,
            // Degenerate geometry: treat everything as noise
            Err(_) => return indices.iter().map(|i| vec![*i]).collect(),
        };

        let mut clusters: Vec<Vec<usize>> = Vec::new();
        let mut by_label: std::collections::HashMap<i32, Vec<usize>> =
            std::collections::HashMap::new();
        for (position, label) in labels.iter().enumerate() {
            if *label < 0 {
                clusters.push(vec![indices[position]]);
            } else {
                by_label.entry(*label).or_default().push(indices[position]);
            }
        }
        let mut labeled: Vec<(i32, Vec<usize>)> = by_label.into_iter().collect();
        labeled.sort_by_key(|(label, _)| *label);
        clusters.extend(labeled.into_iter().map(|(_, members)| members));
        clusters
    }

    /// Re-cluster any cluster above `max_cluster_size` with progressively
    /// larger minimum sizes; chunk sequentially as a last resort.
    fn split_large(&self, episodes: &[Episode], clusters: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        let mut result: Vec<Vec<usize>> = Vec::new();

        for cluster in clusters {
            if cluster.len() <= self.max_cluster_size {
                result.push(cluster);
                continue;
            }

            let mut min_size = (self.max_cluster_size / 2 + 1).max(self.min_cluster_size + 1);
            let mut split = None;
            while min_size <= self.max_cluster_size {
                let subclusters = self.cluster_indices(episodes, &cluster, min_size);
                if subclusters.iter().all(|sub| sub.len() <= self.max_cluster_size) {
                    split = Some(subclusters);
                    break;
                }
                min_size += 1;
            }

            match split {
                Some(subclusters) => result.extend(subclusters),
                None => {
                    for chunk in cluster.chunks(self.max_cluster_size) {
                        result.push(chunk.to_vec());
                    }
                }
            }
        }

        result
    }

    /// Cluster, split oversized clusters, and guarantee that no batch
    /// exceeds `max_cluster_size`.
    pub fn batches(&self, episodes: &[Episode]) -> Vec<Vec<usize>> {
        if episodes.is_empty() {
            return Vec::new();
        }

        let clusters = self.cluster(episodes);
        let split = self.split_large(episodes, clusters);

        let mut batches = Vec::new();
        for batch in split {
            if batch.len() <= self.max_cluster_size {
                batches.push(batch);
            } else {
                for chunk in batch.chunks(self.max_cluster_size) {
                    batches.push(chunk.to_vec());
                }
            }
        }
        batches
    }
}

// ── Semantic extraction ──────────────────────────────────────────────────

/// Distills first-person facts from one episode batch via the generator.
pub struct SemanticExtractor {
    generator: Arc<dyn Generator>,
    embedder: Embedder,
    store: MemoryStore,
    model: String,
}

impl SemanticExtractor {
    pub fn new(
        generator: Arc<dyn Generator>,
        embedder: Embedder,
        store: MemoryStore,
        model: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            embedder,
            store,
            model: model.into(),
        }
    }

    /// One prompt per batch: ask for facts, parse, embed, insert. Returns
    /// the new fact ids. A chat failure surfaces so the caller can leave
    /// the batch unconsolidated.
    pub async fn extract_facts(&self, batch: &[Episode]) -> Result<Vec<String>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut prompt = String::from(
            "Extract facts you have observed from these memories of yours.\n\
             Phrase each fact in the first person: say \"The user asked me to tell \
             a story\", never \"The user asked the assistant\".\n\
             These are related conversations. Look for:\n\
             - Facts that appear multiple times\n\
             - Recurring preferences, patterns, and decisions\n\n",
        );
        for episode in batch {
            prompt.push_str("- ");
            prompt.push_str(&episode.summary);
            prompt.push('\n');
        }
        prompt.push_str("\nExtract facts as simple sentences. Format: one fact per line.\n\nFacts:");

        let response = self
            .generator
            .chat(ChatRequest::new(&self.model, prompt))
            .await?;

        let facts: Vec<String> = response
            .text
            .lines()
            .map(|line| line.trim().trim_start_matches(['-', '*']).trim().to_string())
            .filter(|line| line.chars().count() >= MIN_FACT_CHARS)
            .collect();
        if facts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .embedder
            .embed_batch(&facts, EmbeddingTask::Storage)
            .await;

        let derived_from: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
        let existing = self.store.get_facts(FactStatus::Stable, usize::MAX)?;

        let mut fact_ids = Vec::with_capacity(facts.len());
        for (fact, embedding) in facts.into_iter().zip(embeddings) {
            let id = self.store.add_fact(NewFact {
                fact: fact.clone(),
                confidence: EXTRACTED_CONFIDENCE,
                derived_from: derived_from.clone(),
                embedding: Some(embedding),
                contradictions: vec![],
                status: FactStatus::Stable,
            })?;

            // Cheap negation scan against what we already believe
            for conflicting in find_contradictions(&fact, &existing) {
                self.store.add_contradiction(&id, &conflicting)?;
            }
            fact_ids.push(id);
        }

        Ok(fact_ids)
    }
}

/// Heuristic contradiction scan: a negated fact whose un-negated form
/// appears inside an existing fact points at that fact.
fn find_contradictions(new_fact: &str, existing: &[crate::memory::types::Fact]) -> Vec<String> {
    let lowered = new_fact.to_lowercase();
    if !lowered.contains("not ") {
        return Vec::new();
    }
    let affirmed = lowered.replace("not ", "");
    existing
        .iter()
        .filter(|fact| fact.fact.to_lowercase().contains(affirmed.trim()))
        .map(|fact| fact.id.clone())
        .collect()
}

// ── Relational analysis ──────────────────────────────────────────────────

/// Summarizes interaction style from consolidated episodes and upserts it
/// into relational memory.
pub struct RelationalManager {
    generator: Arc<dyn Generator>,
    store: MemoryStore,
    model: String,
}

impl RelationalManager {
    pub fn new(generator: Arc<dyn Generator>, store: MemoryStore, model: impl Into<String>) -> Self {
        Self {
            generator,
            store,
            model: model.into(),
        }
    }

    /// Analyze interaction patterns. Failures are logged and swallowed —
    /// the relational table just does not move this run.
    pub async fn analyze(&self, episodes: &[Episode]) -> Result<()> {
        if episodes.is_empty() {
            return Ok(());
        }

        let summaries: Vec<&str> = episodes.iter().map(|e| e.summary.as_str()).collect();
        let current = self.store.get_relational(Some(INTERACTION_STYLE))?;
        let current_json = serde_json::to_string(&current).unwrap_or_else(|_| "[]".into());

        let prompt = format!(
            "Analyze these conversation summaries to update our interaction style \
             and user preferences.\n\
             Focus on: tone, communication style, topics of interest, and interaction \
             norms.\n\
             Be conservative: only update if patterns are consistent.\n\n\
             Summaries:\n{}\n\n\
             Current relational state: {}\n\n\
             Updated relational analysis:",
            summaries.join("\n"),
            current_json,
        );

        match self
            .generator
            .chat(ChatRequest::new(&self.model, prompt))
            .await
        {
            Ok(response) if !response.text.trim().is_empty() => {
                self.store.update_relational(
                    INTERACTION_STYLE,
                    json!({"analysis": response.text.trim()}),
                    0.8,
                )?;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "relational analysis failed, skipping this run");
            }
        }
        Ok(())
    }
}

// ── Consolidation run ────────────────────────────────────────────────────

/// Outcome of one consolidation run.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    pub episodes_seen: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub facts_created: usize,
    pub episodes_consolidated: usize,
}

/// Drives the full consolidation pass.
pub struct Consolidator {
    store: MemoryStore,
    clustering: EpisodeClustering,
    extractor: SemanticExtractor,
    relational: RelationalManager,
    events: EventLog,
}

impl Consolidator {
    pub fn new(
        store: MemoryStore,
        clustering: EpisodeClustering,
        extractor: SemanticExtractor,
        relational: RelationalManager,
        events: EventLog,
    ) -> Self {
        Self {
            store,
            clustering,
            extractor,
            relational,
            events,
        }
    }

    /// Cluster unconsolidated episodes, extract facts per batch, mark the
    /// processed episodes consolidated in one transaction, then run the
    /// relational pass.
    pub async fn perform_consolidation(&self) -> Result<ConsolidationReport> {
        let episodes = self
            .store
            .get_unconsolidated_episodes(EpisodeStatus::Active)?;
        if episodes.is_empty() {
            return Ok(ConsolidationReport::default());
        }

        let batches = self.clustering.batches(&episodes);
        let mut report = ConsolidationReport {
            episodes_seen: episodes.len(),
            batches: batches.len(),
            ..Default::default()
        };

        let mut processed_ids: Vec<String> = Vec::new();
        for batch_indices in &batches {
            let batch: Vec<Episode> = batch_indices
                .iter()
                .map(|i| episodes[*i].clone())
                .collect();

            match self.extractor.extract_facts(&batch).await {
                Ok(fact_ids) => {
                    report.facts_created += fact_ids.len();
                    processed_ids.extend(batch.iter().map(|e| e.id.clone()));
                }
                Err(error) => {
                    // This batch stays unconsolidated; the others continue
                    report.failed_batches += 1;
                    self.events.emit_always(
                        "consolidation_batch_error",
                        json!({"batch_size": batch.len(), "error": error.to_string()}),
                    );
                }
            }
        }

        if !processed_ids.is_empty() {
            self.store.mark_consolidated(&processed_ids)?;
            report.episodes_consolidated = processed_ids.len();
        }

        self.relational.analyze(&episodes).await?;

        self.events.emit(
            "consolidation_complete",
            json!({
                "episodes_seen": report.episodes_seen,
                "batches": report.batches,
                "failed_batches": report.failed_batches,
                "facts_created": report.facts_created,
                "episodes_consolidated": report.episodes_consolidated,
            }),
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::ExchangeText;
    use chrono::Utc;

    fn episode_with_embedding(id: usize, embedding: Vec<f32>) -> Episode {
        Episode {
            id: format!("ep-{id}"),
            summary: format!("summary {id}"),
            full_text: ExchangeText::default(),
            timestamp: Utc::now(),
            embedding: Some(embedding),
            importance: 0.5,
            topics: vec![],
            entities: vec![],
            connections: vec![],
            status: EpisodeStatus::Active,
        }
    }

    /// Tight blob of points around a spike on `axis`.
    fn blob(axis: usize, count: usize, start_id: usize) -> Vec<Episode> {
        (0..count)
            .map(|i| {
                let mut v = vec![0.0f32; 8];
                v[axis] = 1.0;
                v[(axis + 4) % 8] = 0.01 * (i as f32 + 1.0);
                episode_with_embedding(start_id + i, v)
            })
            .collect()
    }

    #[test]
    fn too_few_episodes_become_singletons() {
        let clustering = EpisodeClustering::new(3, 50);
        let episodes = blob(0, 2, 0);
        let clusters = clustering.cluster(&episodes);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn dense_groups_cluster_and_isolates_stay_single() {
        let clustering = EpisodeClustering::new(3, 50);
        let mut episodes = blob(0, 5, 0);
        episodes.extend(blob(1, 5, 10));
        // One isolate far from both blobs
        let mut outlier = vec![0.0f32; 8];
        outlier[3] = 5.0;
        episodes.push(episode_with_embedding(99, outlier));

        let batches = clustering.batches(&episodes);
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 11);

        // The isolate ends up alone; the blobs produce multi-member batches
        assert!(batches.iter().any(|b| b.len() == 1));
        assert!(batches.iter().filter(|b| b.len() >= 3).count() >= 2);
    }

    #[test]
    fn batches_never_exceed_max_cluster_size() {
        let clustering = EpisodeClustering::new(2, 4);
        // One big dense blob that must be broken up
        let episodes = blob(0, 19, 0);
        let batches = clustering.batches(&episodes);

        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 19);
        assert!(batches.iter().all(|b| b.len() <= 4), "batches: {batches:?}");
    }

    #[test]
    fn contradiction_scan_matches_negation() {
        let existing = vec![crate::memory::types::Fact {
            id: "f-1".into(),
            fact: "I enjoy mornings with the user.".into(),
            confidence: 0.7,
            first_observed: Utc::now(),
            last_confirmed: Utc::now(),
            derived_from: vec!["ep".into()],
            embedding: None,
            contradictions: vec![],
            status: FactStatus::Stable,
        }];

        let hits = find_contradictions("I do not enjoy mornings with the user.", &existing);
        assert_eq!(hits, vec!["f-1"]);

        assert!(find_contradictions("I enjoy evenings.", &existing).is_empty());
    }
}
