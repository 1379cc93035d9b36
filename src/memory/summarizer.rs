//! First-person episode summaries.
//!
//! Asks the generator for a 1–2 sentence summary written from the
//! assistant's own perspective, optionally grounded in up to the last
//! three turns. On failure the summary degrades to a mechanical truncation
//! of the exchange — never to an error.

use std::sync::Arc;

use crate::generator::{ChatRequest, Generator};
use crate::memory::gate::truncate_chars;

/// Generator-backed exchange summarizer.
pub struct Summarizer {
    generator: Arc<dyn Generator>,
    model: String,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn Generator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// Summarize one exchange, with optional recent turns for context.
    pub async fn summarize(
        &self,
        user_msg: &str,
        assistant_msg: &str,
        recent_context: &[String],
    ) -> String {
        let context_section = if recent_context.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nRecent conversation context:\n{}\n",
                recent_context.join("\n\n")
            )
        };

        let prompt = format!(
            "Write a 1-2 sentence summary of the recent exchange to be stored in \
             your long-term memory.\n\
             Write the summary in the first person, as if you are recording your own \
             memory. Use \"I\", \"me\", \"my\" to refer to yourself.\n\
             The user may be speaking through voice recognition and their input may \
             contain transcription errors; rely on your own responses to clarify them.\n\
             Focus primarily on the most recent messages, using earlier turns only for \
             supporting context.\n\
             Preserve: key facts, emotions, decisions.{context_section}\n\n\
             Current exchange:\n\
             User: {user_msg}\n\
             Assistant: {assistant_msg}\n\n\
             Summary:"
        );

        match self
            .generator
            .chat(ChatRequest::new(&self.model, prompt))
            .await
        {
            Ok(response) if !response.text.trim().is_empty() => response.text.trim().to_string(),
            Ok(_) => self.mechanical_fallback(user_msg, assistant_msg),
            Err(error) => {
                tracing::warn!(%error, "summarization failed, falling back to truncation");
                self.mechanical_fallback(user_msg, assistant_msg)
            }
        }
    }

    fn mechanical_fallback(&self, user_msg: &str, assistant_msg: &str) -> String {
        format!(
            "User: {} | Assistant: {}",
            truncate_chars(user_msg, 100),
            truncate_chars(assistant_msg, 100)
        )
    }
}
