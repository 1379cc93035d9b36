//! REST client for a Gemini-style generator API.
//!
//! Implements [`Generator`] over `generateContent`, `embedContent`, and
//! `batchEmbedContents`. No retries: the store rule of never retrying
//! silently extends to this client, and the service enforces its own
//! timeouts.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChatRequest, ChatResponse, EmbeddingTask, Generator, GeneratorError, ToolCall};
use crate::config::GeneratorConfig;

/// HTTP-backed generator client.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
}

impl HttpGenerator {
    pub fn new(config: &GeneratorConfig, embedding_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            embedding_model: embedding_model.into(),
        }
    }

    fn endpoint(&self, model: &str, verb: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}?key={}",
            self.base_url, model, verb, self.api_key
        )
    }

    async fn post(&self, url: &str, body: Value) -> Result<Value, GeneratorError> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GeneratorError::Malformed(e.to_string()))
    }
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

fn parse_embedding(value: &Value) -> Result<Vec<f32>, GeneratorError> {
    let embedding: EmbeddingValues = serde_json::from_value(value.clone())
        .map_err(|e| GeneratorError::Malformed(format!("embedding payload: {e}")))?;
    Ok(embedding.values)
}

/// Extract final text and tool calls from a `generateContent` response.
fn parse_chat(value: &Value) -> Result<ChatResponse, GeneratorError> {
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| GeneratorError::Malformed("no candidate parts".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| GeneratorError::Malformed("functionCall without name".into()))?;
            tool_calls.push(ToolCall {
                name: name.to_string(),
                arguments: call.get("args").cloned().unwrap_or(Value::Null),
            });
        }
    }

    Ok(ChatResponse { text, tool_calls })
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, GeneratorError> {
        let url = self.endpoint(&self.embedding_model, "embedContent");
        let body = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": {"parts": [{"text": text}]},
            "taskType": task.as_str(),
        });
        let response = self.post(&url, body).await?;
        let embedding = response
            .get("embedding")
            .ok_or_else(|| GeneratorError::Malformed("missing embedding".into()))?;
        parse_embedding(embedding)
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, GeneratorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint(&self.embedding_model, "batchEmbedContents");
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", self.embedding_model),
                    "content": {"parts": [{"text": text}]},
                    "taskType": task.as_str(),
                })
            })
            .collect();

        let response = self.post(&url, json!({ "requests": requests })).await?;
        let embeddings = response
            .get("embeddings")
            .and_then(Value::as_array)
            .ok_or_else(|| GeneratorError::Malformed("missing embeddings".into()))?;

        if embeddings.len() != texts.len() {
            return Err(GeneratorError::Malformed(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        embeddings.iter().map(parse_embedding).collect()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GeneratorError> {
        let url = self.endpoint(&request.model, "generateContent");

        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
        });
        if let Some(system) = &request.system_instruction {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        let response = self.post(&url, body).await?;
        parse_chat(&response)
    }
}
