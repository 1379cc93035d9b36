//! The `search_memory` tool: explicit recall the generator can invoke.

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::json;

use crate::embedding::Embedder;
use crate::events::EventLog;
use crate::generator::{EmbeddingTask, ToolSpec};
use crate::memory::retriever::{MemoryKind, MemoryRetriever};
use crate::memory::store::SearchFilters;

/// Result limit bounds per memory kind.
const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 10;
const DEFAULT_LIMIT: usize = 5;

/// Parameters for the `search_memory` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    /// Natural-language description of what to find in memory.
    #[schemars(description = "The search query - describe what you want to find in memory")]
    pub query: String,

    /// `"episodic"` (past conversations), `"semantic"` (facts), or
    /// `"both"`. Defaults to both.
    #[schemars(
        description = "Type of memory to search: 'episodic' (past conversations), 'semantic' (facts), or 'both'"
    )]
    pub search_type: Option<String>,

    /// Maximum results per memory type (1-10). Defaults to 5.
    #[schemars(description = "Maximum results to return per memory type (1-10)")]
    pub limit: Option<usize>,
}

/// Active memory search exposed to the generator.
pub struct MemorySearchTool {
    retriever: MemoryRetriever,
    embedder: Embedder,
    events: EventLog,
}

impl MemorySearchTool {
    pub fn new(retriever: MemoryRetriever, embedder: Embedder, events: EventLog) -> Self {
        Self {
            retriever,
            embedder,
            events,
        }
    }

    /// Tool declaration handed to the generator.
    pub fn spec() -> ToolSpec {
        ToolSpec {
            name: "search_memory".into(),
            description: "Search through episodic memories (past conversations) and semantic \
                          facts. Use this when you need to recall specific information from \
                          previous interactions or established facts."
                .into(),
            parameters: schema_for!(SearchMemoryParams),
        }
    }

    /// Run a search and format the results as a text blob for the model.
    pub async fn search(&self, params: SearchMemoryParams) -> String {
        let kind: MemoryKind = params
            .search_type
            .as_deref()
            .unwrap_or("both")
            .parse()
            .unwrap_or(MemoryKind::Both);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(MIN_LIMIT, MAX_LIMIT);

        self.events.emit(
            "tool_memory_search",
            json!({
                "query": crate::memory::gate::truncate_chars(&params.query, 100),
                "search_type": format!("{kind:?}").to_lowercase(),
                "limit": limit,
            }),
        );

        let query_vec = self.embedder.embed(&params.query, EmbeddingTask::Query).await;

        let results = match self.retriever.search_memories(
            &query_vec,
            kind,
            limit,
            &SearchFilters::active(),
        ) {
            Ok(results) => results,
            Err(error) => {
                self.events
                    .emit_always("tool_memory_search_error", json!({"error": error.to_string()}));
                return format!("Memory search failed: {error}");
            }
        };

        let mut lines = vec![format!("Memory search results for '{}':", params.query), String::new()];

        if !results.episodic.is_empty() {
            lines.push("**Episodic Memories:**".into());
            for (i, row) in results.episodic.iter().enumerate() {
                lines.push(format!(
                    "{}. [{}] {}",
                    i + 1,
                    row.item.timestamp.format("%Y-%m-%d"),
                    row.item.summary
                ));
                lines.push(format!(
                    "   Importance: {:.2}, Similarity: {:.2}",
                    row.item.importance, row.similarity
                ));
                lines.push(String::new());
            }
        }

        if !results.semantic.is_empty() {
            lines.push("**Semantic Facts:**".into());
            for (i, row) in results.semantic.iter().enumerate() {
                lines.push(format!("{}. {}", i + 1, row.item.fact));
                lines.push(format!(
                    "   Confidence: {:.2}, Similarity: {:.2}",
                    row.item.confidence, row.similarity
                ));
                lines.push(String::new());
            }
        }

        if results.episodic.is_empty() && results.semantic.is_empty() {
            lines.push("No memories found matching the query.".into());
        }

        lines.join("\n")
    }
}
