//! Prefetch stream: a single-writer, many-reader cache of memories likely
//! to matter next turn, keyed by the concatenation of the most recent
//! turns.
//!
//! `observe_turn` is synchronous from the foreground — it appends to the
//! turn window and schedules a refresh on the background executor without
//! blocking. Readers snapshot whatever cache exists; the cache is
//! eventually consistent with the turn history and replacement is
//! newest-write-wins. No lock is held across an I/O boundary; lock scope
//! is the pointer swap only.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::background::BackgroundHandle;
use crate::embedding::Embedder;
use crate::events::EventLog;
use crate::generator::EmbeddingTask;
use crate::memory::retriever::{MemoryKind, MemoryRetriever, ScoredEpisode, ScoredFact};
use crate::memory::store::SearchFilters;

/// Rows fetched per memory kind on each refresh.
const PREFETCH_LIMIT: usize = 5;

/// Hard ceiling on the turn window.
const MAX_RECENT_TURNS: usize = 3;

/// One completed prefetch.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    pub episodic: Vec<ScoredEpisode>,
    pub semantic: Vec<ScoredFact>,
    pub context_text: String,
    pub context_embedding: Vec<f32>,
    pub captured_at: DateTime<Utc>,
}

/// Snapshot handed to readers.
#[derive(Debug, Clone)]
pub struct CachedMemories {
    pub episodic: Vec<ScoredEpisode>,
    pub semantic: Vec<ScoredFact>,
}

struct StreamState {
    recent_turns: VecDeque<String>,
    cache: Option<Arc<MemoryCache>>,
}

/// Background-refreshed retrieval cache.
pub struct PrefetchStream {
    state: Mutex<StreamState>,
    retriever: MemoryRetriever,
    embedder: Embedder,
    background: BackgroundHandle,
    events: EventLog,
    max_recent_turns: usize,
}

impl PrefetchStream {
    pub fn new(
        retriever: MemoryRetriever,
        embedder: Embedder,
        background: BackgroundHandle,
        events: EventLog,
        max_recent_turns: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StreamState {
                recent_turns: VecDeque::new(),
                cache: None,
            }),
            retriever,
            embedder,
            background,
            events,
            max_recent_turns: max_recent_turns.clamp(1, MAX_RECENT_TURNS),
        })
    }

    /// Record a completed turn and schedule a cache refresh. Never blocks
    /// the caller; a subsequent [`get_cached`] may still observe the
    /// previous cache or none.
    ///
    /// [`get_cached`]: PrefetchStream::get_cached
    pub fn observe_turn(self: &Arc<Self>, user_message: &str, assistant_message: &str) {
        let turn = format!("User: {user_message}\nAssistant: {assistant_message}");
        {
            let mut state = self.state.lock().expect("stream mutex poisoned");
            state.recent_turns.push_back(turn);
            while state.recent_turns.len() > self.max_recent_turns {
                state.recent_turns.pop_front();
            }
        }

        let stream = Arc::clone(self);
        self.background.spawn(async move {
            stream.refresh().await;
        });
    }

    /// Snapshot of the turn window, oldest first. Used as summarization
    /// context.
    pub fn recent_turns(&self) -> Vec<String> {
        let state = self.state.lock().expect("stream mutex poisoned");
        state.recent_turns.iter().cloned().collect()
    }

    /// Non-blocking snapshot of the current cache.
    pub fn get_cached(&self) -> Option<CachedMemories> {
        let snapshot = {
            let state = self.state.lock().expect("stream mutex poisoned");
            state.cache.clone()
        };
        match snapshot {
            Some(cache) => {
                self.events.emit(
                    "cache_hit",
                    json!({
                        "episodic_count": cache.episodic.len(),
                        "semantic_count": cache.semantic.len(),
                    }),
                );
                Some(CachedMemories {
                    episodic: cache.episodic.clone(),
                    semantic: cache.semantic.clone(),
                })
            }
            None => {
                self.events.emit("cache_miss", json!({}));
                None
            }
        }
    }

    /// Rebuild the cache against the current turn window. A no-op when the
    /// window is empty or unchanged since the last completed refresh.
    pub async fn refresh(&self) {
        let (context_text, cached_text) = {
            let state = self.state.lock().expect("stream mutex poisoned");
            let text = state
                .recent_turns
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            let cached = state.cache.as_ref().map(|c| c.context_text.clone());
            (text, cached)
        };

        if context_text.trim().is_empty() {
            return;
        }
        if cached_text.as_deref() == Some(context_text.as_str()) {
            self.events
                .emit("cache_refresh_skipped", json!({"reason": "context_unchanged"}));
            return;
        }

        let context_embedding = self
            .embedder
            .embed(&context_text, EmbeddingTask::Storage)
            .await;

        let episodic = self.retriever.search_memories(
            &context_embedding,
            MemoryKind::Episodic,
            PREFETCH_LIMIT,
            &SearchFilters::active(),
        );
        let semantic = self.retriever.search_memories(
            &context_embedding,
            MemoryKind::Semantic,
            PREFETCH_LIMIT,
            &SearchFilters::default(),
        );

        let (episodic, semantic) = match (episodic, semantic) {
            (Ok(e), Ok(s)) => (e.episodic, s.semantic),
            (Err(error), _) | (_, Err(error)) => {
                self.events
                    .emit_always("cache_refresh_error", json!({"error": error.to_string()}));
                return;
            }
        };

        let cache = Arc::new(MemoryCache {
            episodic,
            semantic,
            context_text: context_text.clone(),
            context_embedding,
            captured_at: Utc::now(),
        });

        // Atomic swap; readers see the old cache or the new one, never a mix
        {
            let mut state = self.state.lock().expect("stream mutex poisoned");
            state.cache = Some(Arc::clone(&cache));
        }

        self.events.emit(
            "cache_refreshed",
            json!({
                "episodic_count": cache.episodic.len(),
                "semantic_count": cache.semantic.len(),
                "context_length": context_text.len(),
            }),
        );
    }
}
