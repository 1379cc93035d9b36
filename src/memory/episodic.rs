//! Episodic memory manager: the write path for new exchanges and the
//! reranked read path for relevance queries.
//!
//! Writes land immediately with status `pending_embedding` and the summary
//! goes onto a FIFO queue; the embedding worker drains it on the
//! background executor, attaching the vector and flipping the episode to
//! `active`. A failed embedding leaves the episode pending — invisible to
//! retrieval until a later pass succeeds. Every successful write ticks the
//! budget.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::events::EventLog;
use crate::generator::EmbeddingTask;
use crate::memory::budget::MemoryBudget;
use crate::memory::retriever::MemoryRetriever;
use crate::memory::scoring;
use crate::memory::store::{MemoryStore, SearchFilters};
use crate::memory::types::{Episode, EpisodeStatus, EpisodeUpdate, ExchangeText, NewEpisode};

/// An episode scored by the relevance formula
/// `0.5 · similarity + 0.3 · decayed_importance + 0.2 · recency`.
#[derive(Debug, Clone)]
pub struct RelevantEpisode {
    pub episode: Episode,
    pub similarity: f32,
    pub relevance: f64,
}

/// Accepts new exchanges and serves relevance-ranked retrieval.
pub struct EpisodicManager {
    store: MemoryStore,
    embedder: Embedder,
    retriever: MemoryRetriever,
    budget: Arc<MemoryBudget>,
    events: EventLog,
    queue: mpsc::UnboundedSender<(String, String)>,
}

impl EpisodicManager {
    /// Build the manager plus its embedding worker. The worker must be
    /// spawned on the background executor; the manager only enqueues.
    pub fn new(
        store: MemoryStore,
        embedder: Embedder,
        retriever: MemoryRetriever,
        budget: Arc<MemoryBudget>,
        events: EventLog,
    ) -> (Self, EmbeddingWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = EmbeddingWorker {
            rx,
            store: store.clone(),
            embedder: embedder.clone(),
            events: events.clone(),
        };
        (
            Self {
                store,
                embedder,
                retriever,
                budget,
                events,
                queue: tx,
            },
            worker,
        )
    }

    /// Store an exchange immediately (status `pending_embedding`) and queue
    /// its summary for embedding. Returns the episode id.
    pub async fn add_episode(
        &self,
        summary: &str,
        full_text: ExchangeText,
        importance: Option<f64>,
    ) -> Result<String> {
        let importance =
            importance.unwrap_or_else(|| scoring::importance(&full_text.user, &full_text.assistant));

        let id = self
            .store
            .add_episode(NewEpisode::new(summary, full_text, importance))?;

        // FIFO: the worker embeds in write order
        let _ = self.queue.send((id.clone(), summary.to_string()));

        self.budget.note_write()?;
        Ok(id)
    }

    /// Embed the query, over-fetch 4k active candidates by similarity,
    /// rerank by relevance, and return the top k. Ties break by timestamp
    /// (newest first) then id.
    pub async fn retrieve_relevant(&self, query: &str, k: usize) -> Result<Vec<RelevantEpisode>> {
        let query_vec = self.embedder.embed(query, EmbeddingTask::Query).await;

        let filters = SearchFilters {
            status: Some(EpisodeStatus::Active),
            confidence_gt: None,
        };
        let candidates = self.retriever.search_episodes(&query_vec, k * 4, &filters)?;
        let candidate_count = candidates.len();

        let now = Utc::now();
        let mut reranked: Vec<RelevantEpisode> = candidates
            .into_iter()
            .map(|scored| {
                let decayed = scoring::decayed_importance(
                    scored.item.importance,
                    scored.item.timestamp,
                    now,
                );
                let recency = scoring::recency_weight(scored.item.timestamp, now);
                let relevance = 0.5 * scored.similarity as f64 + 0.3 * decayed + 0.2 * recency;
                RelevantEpisode {
                    episode: scored.item,
                    similarity: scored.similarity,
                    relevance,
                }
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.episode.timestamp.cmp(&a.episode.timestamp))
                .then_with(|| a.episode.id.cmp(&b.episode.id))
        });
        reranked.truncate(k);

        self.events.emit(
            "retrieval",
            json!({
                "query": crate::memory::gate::truncate_chars(query, 100),
                "candidate_count": candidate_count,
                "top_relevance": reranked.first().map(|r| r.relevance).unwrap_or(0.0),
            }),
        );

        Ok(reranked)
    }
}

/// Drains the embedding queue on the background executor.
pub struct EmbeddingWorker {
    rx: mpsc::UnboundedReceiver<(String, String)>,
    store: MemoryStore,
    embedder: Embedder,
    events: EventLog,
}

impl EmbeddingWorker {
    /// Process queue entries until every sender is dropped.
    pub async fn run(mut self) {
        while let Some((episode_id, text)) = self.rx.recv().await {
            self.process(&episode_id, &text).await;
        }
    }

    async fn process(&self, episode_id: &str, text: &str) {
        let embedding = self.embedder.embed(text, EmbeddingTask::Storage).await;
        if self.embedder.is_zero(&embedding) {
            // Embedding failed; the episode stays pending and out of
            // retrieval until a later pass succeeds.
            tracing::warn!(episode_id, "embedding unavailable, episode stays pending");
            return;
        }

        let patch = EpisodeUpdate {
            embedding: Some(embedding),
            status: Some(EpisodeStatus::Active),
            ..Default::default()
        };
        match self.store.update_episode(episode_id, patch) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(episode_id, "embedded episode no longer exists");
            }
            Err(error) => {
                self.events.emit_always(
                    "storage_error",
                    json!({"operation": "attach_embedding", "episode_id": episode_id, "error": error.to_string()}),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{ChatRequest, ChatResponse, Generator, GeneratorError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DIM: usize = 8;

    /// Embeds text as a spike on (text length mod DIM); can be failed.
    struct LengthGenerator {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Generator for LengthGenerator {
        async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>, GeneratorError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GeneratorError::Transport("down".into()));
            }
            let mut v = vec![0.0; DIM];
            v[text.len() % DIM] = 1.0;
            Ok(v)
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            task: EmbeddingTask,
        ) -> Result<Vec<Vec<f32>>, GeneratorError> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text, task).await?);
            }
            Ok(out)
        }

        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, GeneratorError> {
            Ok(ChatResponse::default())
        }
    }

    fn build_manager(fail_embed: bool) -> (EpisodicManager, EmbeddingWorker, MemoryStore) {
        let store = MemoryStore::in_memory().unwrap();
        let generator = Arc::new(LengthGenerator {
            fail: AtomicBool::new(fail_embed),
        });
        let embedder = Embedder::new(generator, DIM);
        let retriever = MemoryRetriever::new(store.clone(), EventLog::quiet());
        let budget = Arc::new(MemoryBudget::new(store.clone(), 1000, EventLog::quiet()));
        let (manager, worker) =
            EpisodicManager::new(store.clone(), embedder, retriever, budget, EventLog::quiet());
        (manager, worker, store)
    }

    #[tokio::test]
    async fn add_episode_writes_pending_then_worker_activates() {
        let (manager, mut worker, store) = build_manager(false);

        let id = manager
            .add_episode(
                "I met the user's dog Pippin.",
                ExchangeText::new("my dog is Pippin", "Lovely!"),
                None,
            )
            .await
            .unwrap();

        let pending = store.get_episode(&id).unwrap().unwrap();
        assert_eq!(pending.status, EpisodeStatus::PendingEmbedding);
        assert!(pending.embedding.is_none());

        // Drive the worker through the single queued entry
        let (queued_id, text) = worker.rx.recv().await.unwrap();
        assert_eq!(queued_id, id);
        worker.process(&queued_id, &text).await;

        let active = store.get_episode(&id).unwrap().unwrap();
        assert_eq!(active.status, EpisodeStatus::Active);
        assert_eq!(active.embedding.unwrap().len(), DIM);
    }

    #[tokio::test]
    async fn embedding_failure_leaves_episode_pending() {
        let (manager, mut worker, store) = build_manager(true);

        let id = manager
            .add_episode("summary", ExchangeText::new("hello", "hi"), None)
            .await
            .unwrap();

        let (queued_id, text) = worker.rx.recv().await.unwrap();
        worker.process(&queued_id, &text).await;

        let episode = store.get_episode(&id).unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::PendingEmbedding);
        assert!(episode.embedding.is_none());

        // And retrieval cannot see it
        let results = manager.retrieve_relevant("hello", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn importance_defaults_to_scorer() {
        let (manager, _worker, store) = build_manager(false);

        let id = manager
            .add_episode(
                "s",
                ExchangeText::new("remember this: i am a baker", "Noted."),
                None,
            )
            .await
            .unwrap();
        let episode = store.get_episode(&id).unwrap().unwrap();
        // remember (+0.30) + personal (+0.20) over the 0.5 baseline, capped
        assert!((episode.importance - 1.0).abs() < 1e-9);

        let id2 = manager
            .add_episode("s", ExchangeText::new("hello", "hi"), Some(0.33))
            .await
            .unwrap();
        let episode2 = store.get_episode(&id2).unwrap().unwrap();
        assert!((episode2.importance - 0.33).abs() < 1e-9);
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let (manager, mut worker, _store) = build_manager(false);

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(
                manager
                    .add_episode(&format!("episode {i}"), ExchangeText::default(), None)
                    .await
                    .unwrap(),
            );
        }

        for expected in &ids {
            let (queued_id, _) = worker.rx.recv().await.unwrap();
            assert_eq!(&queued_id, expected);
        }
    }

    #[tokio::test]
    async fn retrieve_relevant_ranks_by_blended_score() {
        let (manager, mut worker, _store) = build_manager(false);

        // Two episodes with distinct spike embeddings (lengths 3 and 4)
        let id_match = manager
            .add_episode("abc", ExchangeText::default(), Some(0.5))
            .await
            .unwrap();
        let _id_other = manager
            .add_episode("abcd", ExchangeText::default(), Some(0.5))
            .await
            .unwrap();

        for _ in 0..2 {
            let (id, text) = worker.rx.recv().await.unwrap();
            worker.process(&id, &text).await;
        }

        // Query of length 3 spikes the same dimension as "abc"
        let results = manager.retrieve_relevant("xyz", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].episode.id, id_match);
        assert!(results[0].similarity > 0.99);
        assert!(results[0].relevance > 0.5);
    }
}
