#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use engram::embedding::Embedder;
use engram::events::EventLog;
use engram::generator::{
    ChatRequest, ChatResponse, EmbeddingTask, Generator, GeneratorError,
};
use engram::memory::retriever::MemoryRetriever;
use engram::memory::store::MemoryStore;
use engram::memory::types::{EpisodeStatus, ExchangeText, NewEpisode};

/// Embedding dimension used across integration tests. Small keeps the
/// clustering fast; nothing in the engine assumes 768.
pub const DIM: usize = 16;

/// Scripted generator: programmable embeddings keyed by exact text (with a
/// hashed spike as default), a FIFO of canned chat replies, and switchable
/// failure modes.
pub struct StubGenerator {
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    chat_replies: Mutex<Vec<String>>,
    pub fail_embed: AtomicBool,
    pub fail_chat: AtomicBool,
    pub embed_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            embeddings: Mutex::new(HashMap::new()),
            chat_replies: Mutex::new(Vec::new()),
            fail_embed: AtomicBool::new(false),
            fail_chat: AtomicBool::new(false),
            embed_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
        })
    }

    /// Pin the embedding for an exact text.
    pub fn set_embedding(&self, text: &str, vector: Vec<f32>) {
        self.embeddings
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    /// Queue the next chat reply (FIFO). With the queue empty, chat
    /// answers "YES" — convenient for gate-heavy tests.
    pub fn push_chat_reply(&self, text: &str) {
        self.chat_replies.lock().unwrap().push(text.to_string());
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.embeddings.lock().unwrap().get(text) {
            return vector.clone();
        }
        // Default: deterministic spike from a cheap hash of the text
        let mut hash = 0usize;
        for byte in text.bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
        }
        spike(hash % DIM)
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>, GeneratorError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed.load(Ordering::SeqCst) {
            return Err(GeneratorError::Transport("embed down".into()));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, GeneratorError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed.load(Ordering::SeqCst) {
            return Err(GeneratorError::Transport("embed down".into()));
        }
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, GeneratorError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_chat.load(Ordering::SeqCst) {
            return Err(GeneratorError::Transport("chat down".into()));
        }
        let mut replies = self.chat_replies.lock().unwrap();
        let text = if replies.is_empty() {
            "YES".to_string()
        } else {
            replies.remove(0)
        };
        Ok(ChatResponse {
            text,
            tool_calls: vec![],
        })
    }
}

/// Unit spike on one dimension.
pub fn spike(at: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[at % DIM] = 1.0;
    v
}

/// A vector near `base` (high cosine similarity, not identical).
pub fn near(base: &[f32], jitter_dim: usize, jitter: f32) -> Vec<f32> {
    let mut v = base.to_vec();
    v[jitter_dim % DIM] += jitter;
    v
}

/// Fresh in-memory store.
pub fn test_store() -> MemoryStore {
    MemoryStore::in_memory().unwrap()
}

pub fn test_retriever(store: &MemoryStore) -> MemoryRetriever {
    MemoryRetriever::new(store.clone(), EventLog::quiet())
}

pub fn test_embedder(generator: Arc<StubGenerator>) -> Embedder {
    Embedder::new(generator as Arc<dyn Generator>, DIM)
}

/// Insert an already-embedded active episode. Returns the id.
pub fn insert_active_episode(
    store: &MemoryStore,
    summary: &str,
    importance: f64,
    embedding: Vec<f32>,
) -> String {
    let mut episode = NewEpisode::new(summary, ExchangeText::default(), importance);
    episode.embedding = Some(embedding);
    episode.status = EpisodeStatus::Active;
    store.add_episode(episode).unwrap()
}

/// Install a test subscriber once so `RUST_LOG=engram=debug` surfaces
/// memory events during test runs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll until `condition` holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
