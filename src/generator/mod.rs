//! Contract for the external generator collaborator.
//!
//! The generator is a foreign language-model service exposing chat
//! completion with tool-call arbitration and embedding of short texts into
//! fixed-dimensional vectors. The memory subsystem consumes both but owns
//! neither; everything here is the consuming side of that contract.
//!
//! [`http::HttpGenerator`] is the one concrete implementation; tests use
//! scripted stubs.

pub mod http;

use async_trait::async_trait;
use schemars::Schema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generator failure. Embed callers fall back to a zero-vector sentinel;
/// chat callers fall back per component (gate: store anyway, summarizer:
/// mechanical truncation, extractor: skip batch).
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("generator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed generator response: {0}")]
    Malformed(String),
}

/// Task-type hint distinguishing storage-side and query-side embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    /// Embedding text that will be stored and searched against.
    Storage,
    /// Embedding a query that will be matched against stored vectors.
    Query,
}

impl EmbeddingTask {
    /// Wire representation of the hint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "RETRIEVAL_DOCUMENT",
            Self::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// A tool made available to the generator during chat.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool parameters.
    pub parameters: Schema,
}

/// A tool invocation requested by the generator.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Opaque model identifier.
    pub model: String,
    /// The user-side prompt.
    pub prompt: String,
    /// Optional system instruction.
    pub system_instruction: Option<String>,
    /// Tools the generator may call.
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_instruction: None,
            tools: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Chat completion outcome: final text plus any tool calls the generator
/// requested. The memory subsystem only consumes the non-streaming surface;
/// token streaming belongs to the outer turn loop.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// The external generator contract.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Embed a single text into a fixed-dimensional vector.
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, GeneratorError>;

    /// Embed a batch of texts. Implementations may fan out or batch on the
    /// wire; order must match the input.
    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, GeneratorError>;

    /// One chat completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GeneratorError>;
}
