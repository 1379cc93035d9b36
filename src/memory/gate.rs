//! The retention gate: decides whether an exchange becomes an episode.
//!
//! Explicit retention phrases short-circuit to yes without touching the
//! generator. Everything else is put to a cheap model as a YES/NO question
//! about identity, emotional intensity, commitments, and relational
//! salience. On generator failure the gate says yes — losing a memory is
//! worse than keeping a mundane one.

use std::sync::Arc;

use serde_json::json;

use crate::events::EventLog;
use crate::generator::{ChatRequest, Generator};

/// Phrases that bypass the generator entirely.
const RETENTION_PHRASES: &[&str] = &[
    "remember this",
    "don't forget",
    "take a note",
    "keep this in mind",
];

/// Generator-aided retention gate.
pub struct MemoryGate {
    generator: Arc<dyn Generator>,
    model: String,
    events: EventLog,
}

impl MemoryGate {
    pub fn new(generator: Arc<dyn Generator>, model: impl Into<String>, events: EventLog) -> Self {
        Self {
            generator,
            model: model.into(),
            events,
        }
    }

    /// Decide whether this exchange should be stored.
    pub async fn should_remember(&self, user_msg: &str, assistant_msg: &str) -> bool {
        // 1. Explicit request bypass (fast)
        let user = user_msg.to_lowercase();
        if RETENTION_PHRASES.iter().any(|phrase| user.contains(phrase)) {
            self.events.emit(
                "gate_decision",
                json!({"decision": "explicit", "should_remember": true}),
            );
            return true;
        }

        // 2. Generator evaluation
        let prompt = format!(
            "Evaluate if this conversation exchange should be remembered long-term.\n\
             Remember it if it contains:\n\
             - Identity-defining facts about the user (e.g., job, family, core beliefs)\n\
             - High emotional intensity (e.g., strong stress, joy, anger)\n\
             - Significant user decisions, goals, or commitments\n\
             - Information that would cause relational damage if forgotten\n\n\
             User: {user_msg}\n\
             Assistant: {assistant_msg}\n\n\
             Answer with only 'YES' or 'NO':"
        );

        match self
            .generator
            .chat(ChatRequest::new(&self.model, prompt))
            .await
        {
            Ok(response) => {
                let decision = response.text.trim().to_uppercase();
                let should_remember = decision.starts_with("YES");
                self.events.emit(
                    "gate_decision",
                    json!({
                        "decision": decision,
                        "should_remember": should_remember,
                        "user_msg": truncate_chars(user_msg, 100),
                        "assistant_msg": truncate_chars(assistant_msg, 100),
                    }),
                );
                should_remember
            }
            Err(error) => {
                // Conservative fallback: store it anyway
                self.events
                    .emit_always("gate_error", json!({"error": error.to_string()}));
                true
            }
        }
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{ChatResponse, EmbeddingTask, GeneratorError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedGenerator {
        answer: Mutex<Option<String>>,
        chat_calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn answering(answer: &str) -> Self {
            Self {
                answer: Mutex::new(Some(answer.to_string())),
                chat_calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                answer: Mutex::new(None),
                chat_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn embed(
            &self,
            _text: &str,
            _task: EmbeddingTask,
        ) -> Result<Vec<f32>, GeneratorError> {
            Ok(vec![0.0; 4])
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            _task: EmbeddingTask,
        ) -> Result<Vec<Vec<f32>>, GeneratorError> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }

        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, GeneratorError> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            match self.answer.lock().unwrap().clone() {
                Some(text) => Ok(ChatResponse {
                    text,
                    tool_calls: vec![],
                }),
                None => Err(GeneratorError::Transport("down".into())),
            }
        }
    }

    fn gate(generator: Arc<ScriptedGenerator>) -> MemoryGate {
        MemoryGate::new(generator, "gate-model", EventLog::quiet())
    }

    #[tokio::test]
    async fn explicit_phrase_bypasses_generator() {
        let generator = Arc::new(ScriptedGenerator::answering("NO"));
        let gate = gate(Arc::clone(&generator));

        assert!(
            gate.should_remember("Remember this: my dog's name is Pippin", "Got it.")
                .await
        );
        assert_eq!(generator.chat_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn yes_answer_stores() {
        let generator = Arc::new(ScriptedGenerator::answering("YES, clearly identity-defining"));
        assert!(gate(generator).should_remember("i work as a nurse", "Nice.").await);
    }

    #[tokio::test]
    async fn no_answer_skips() {
        let generator = Arc::new(ScriptedGenerator::answering("NO"));
        assert!(
            !gate(generator)
                .should_remember("what's 2+2", "4")
                .await
        );
    }

    #[tokio::test]
    async fn answer_must_begin_with_yes() {
        // "NO, YES would be wrong" must not count as a yes
        let generator = Arc::new(ScriptedGenerator::answering("NO, YES would be wrong"));
        assert!(!gate(generator).should_remember("hm", "ok").await);
    }

    #[tokio::test]
    async fn generator_failure_is_conservative() {
        let generator = Arc::new(ScriptedGenerator::failing());
        assert!(gate(generator).should_remember("anything", "at all").await);
    }
}
