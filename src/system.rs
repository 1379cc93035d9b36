//! Wiring and the per-turn pipeline.
//!
//! [`MemorySystem`] builds every component in dependency order, reads the
//! master switch, and only then starts background work. When disabled
//! (switch off, or no generator credentials) every operation is a no-op
//! and the host turn loop continues without recall.

use std::sync::Arc;

use serde_json::json;

use crate::background::{BackgroundExecutor, BackgroundHandle};
use crate::config::EngramConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::events::EventLog;
use crate::generator::{Generator, ToolSpec};
use crate::memory::budget::MemoryBudget;
use crate::memory::consolidation::{
    ConsolidationReport, Consolidator, EpisodeClustering, RelationalManager, SemanticExtractor,
};
use crate::memory::context::ContextBuilder;
use crate::memory::episodic::EpisodicManager;
use crate::memory::gate::MemoryGate;
use crate::memory::retriever::MemoryRetriever;
use crate::memory::store::MemoryStore;
use crate::memory::stream::PrefetchStream;
use crate::memory::summarizer::Summarizer;
use crate::memory::types::ExchangeText;
use crate::tools::search_memory::{MemorySearchTool, SearchMemoryParams};

struct SystemInner {
    store: MemoryStore,
    stream: Arc<PrefetchStream>,
    manager: Arc<EpisodicManager>,
    gate: Arc<MemoryGate>,
    summarizer: Arc<Summarizer>,
    context: ContextBuilder,
    consolidator: Consolidator,
    tool: MemorySearchTool,
    background: BackgroundHandle,
    _executor: BackgroundExecutor,
    gating_enabled: bool,
    events: EventLog,
}

/// The assembled memory subsystem.
pub struct MemorySystem {
    inner: Option<SystemInner>,
}

impl MemorySystem {
    /// Construct the subsystem. Ordering matters: components first, then
    /// the enabled check, and only if enabled does background work start.
    pub fn new(config: &EngramConfig, generator: Arc<dyn Generator>) -> Result<Self> {
        if !config.memory_enabled() {
            tracing::info!("memory disabled (switch off or missing credentials); running as no-op");
            return Ok(Self { inner: None });
        }

        let conn = crate::db::open_database(config.resolved_db_path())
            .map_err(|e| crate::error::MemoryError::config(e.to_string()))?;
        let store = MemoryStore::new(conn);
        let events = EventLog::new(config.memory.verbose_logging);

        let embedder = Embedder::new(Arc::clone(&generator), config.memory.embedding_dim);
        let retriever = MemoryRetriever::new(store.clone(), events.clone());
        let budget = Arc::new(MemoryBudget::new(
            store.clone(),
            config.memory.max_episodic_active,
            events.clone(),
        ));

        let (manager, worker) = EpisodicManager::new(
            store.clone(),
            embedder.clone(),
            retriever.clone(),
            budget,
            events.clone(),
        );
        let manager = Arc::new(manager);

        let executor = BackgroundExecutor::start();
        let background = executor.handle();
        background.spawn(worker.run());

        let stream = PrefetchStream::new(
            retriever.clone(),
            embedder.clone(),
            background.clone(),
            events.clone(),
            config.memory.prefetch_recent_turns,
        );

        let context = ContextBuilder::new(
            store.clone(),
            Arc::clone(&stream),
            events.clone(),
            config.memory.context_token_budget,
        );

        let gate = Arc::new(MemoryGate::new(
            Arc::clone(&generator),
            &config.memory.gate_model,
            events.clone(),
        ));
        let summarizer = Arc::new(Summarizer::new(
            Arc::clone(&generator),
            &config.memory.summarizer_model,
        ));

        let clustering = EpisodeClustering::new(
            config.memory.min_cluster_size,
            config.memory.max_semantic_extraction_batch_size,
        );
        let extractor = SemanticExtractor::new(
            Arc::clone(&generator),
            embedder.clone(),
            store.clone(),
            &config.memory.semantic_model,
        );
        let relational = RelationalManager::new(
            Arc::clone(&generator),
            store.clone(),
            &config.memory.relational_model,
        );
        let consolidator = Consolidator::new(
            store.clone(),
            clustering,
            extractor,
            relational,
            events.clone(),
        );

        let tool = MemorySearchTool::new(retriever, embedder, events.clone());

        Ok(Self {
            inner: Some(SystemInner {
                store,
                stream,
                manager,
                gate,
                summarizer,
                context,
                consolidator,
                tool,
                background,
                _executor: executor,
                gating_enabled: config.memory.feature_flags.enable_gating,
                events,
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Tool declarations to hand to the generator.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        if self.inner.is_some() {
            vec![MemorySearchTool::spec()]
        } else {
            Vec::new()
        }
    }

    /// Dispatch a tool call from the generator. Returns `None` for tools
    /// this subsystem does not own.
    pub async fn handle_tool_call(&self, name: &str, arguments: serde_json::Value) -> Option<String> {
        let inner = self.inner.as_ref()?;
        if name != "search_memory" {
            return None;
        }
        let params: SearchMemoryParams = match serde_json::from_value(arguments) {
            Ok(params) => params,
            Err(error) => return Some(format!("Invalid search_memory arguments: {error}")),
        };
        Some(inner.tool.search(params).await)
    }

    /// Assemble the context block for the next prompt. Failures degrade to
    /// an empty context — no error reaches the turn loop.
    pub fn build_context(&self, tool_results: Option<&str>) -> String {
        let Some(inner) = &self.inner else {
            return String::new();
        };
        match inner.context.build(tool_results) {
            Ok(context) => context,
            Err(error) => {
                inner
                    .events
                    .emit_always("context_error", json!({"error": error.to_string()}));
                String::new()
            }
        }
    }

    /// Run the post-turn pipeline on the background executor: gate →
    /// summarize → store episode, then let the prefetch stream observe the
    /// turn. Returns immediately.
    pub fn remember_exchange(&self, user_message: &str, assistant_message: &str) {
        let Some(inner) = &self.inner else { return };

        let user = user_message.to_string();
        let assistant = assistant_message.to_string();
        let gate = Arc::clone(&inner.gate);
        let summarizer = Arc::clone(&inner.summarizer);
        let manager = Arc::clone(&inner.manager);
        let stream = Arc::clone(&inner.stream);
        let gating_enabled = inner.gating_enabled;

        inner.background.spawn(async move {
            let keep = if gating_enabled {
                gate.should_remember(&user, &assistant).await
            } else {
                true
            };

            if keep {
                let recent = stream.recent_turns();
                let summary = summarizer.summarize(&user, &assistant, &recent).await;
                if let Err(error) = manager
                    .add_episode(&summary, ExchangeText::new(&user, &assistant), None)
                    .await
                {
                    tracing::warn!(%error, "failed to store episode");
                }
            }

            // The stream tracks conversation turns, stored or not
            stream.observe_turn(&user, &assistant);
        });
    }

    /// Run one consolidation pass.
    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        match &self.inner {
            Some(inner) => inner.consolidator.perform_consolidation().await,
            None => Ok(ConsolidationReport::default()),
        }
    }

    /// The prefetch stream (read-side cache).
    pub fn stream(&self) -> Option<&Arc<PrefetchStream>> {
        self.inner.as_ref().map(|inner| &inner.stream)
    }

    /// The episodic manager (write path and relevance retrieval).
    pub fn manager(&self) -> Option<&Arc<EpisodicManager>> {
        self.inner.as_ref().map(|inner| &inner.manager)
    }

    /// The underlying store.
    pub fn store(&self) -> Option<&MemoryStore> {
        self.inner.as_ref().map(|inner| &inner.store)
    }
}
