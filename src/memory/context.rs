//! Context assembly: one priority-ordered, token-budgeted block prepended
//! to the next generator prompt.
//!
//! Sections in priority order: tool results from an explicit memory
//! search, then prefetched episodes, then facts. Each section either fits
//! whole, is trimmed to whole lines within its allocation, or ends
//! assembly. Tokens are approximated as ⌈chars/4⌉ — deliberately cheap and
//! identical across languages.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use crate::error::Result;
use crate::events::EventLog;
use crate::memory::store::MemoryStore;
use crate::memory::stream::PrefetchStream;
use crate::memory::types::{EpisodeStatus, FactStatus};

/// Trimming below this many remaining tokens is pointless; assembly stops
/// instead.
const MIN_USEFUL_TOKENS: usize = 50;

/// Episodic target allocation in tokens.
const EPISODIC_TARGET: usize = 400;

/// Facts target allocation in tokens.
const FACTS_TARGET: usize = 300;

/// Tool-results allocation cap; the actual target is
/// `min(400, budget / 3)`.
const TOOL_RESULTS_CAP: usize = 400;

/// Fallback scan bounds when the prefetch cache is cold.
const FALLBACK_SCAN_LIMIT: usize = 100;
const FALLBACK_MAX_AGE_DAYS: i64 = 7;
const FALLBACK_MIN_IMPORTANCE: f64 = 0.7;
const FALLBACK_FACT_LIMIT: usize = 10;

/// Approximate token count: ⌈chars / 4⌉.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Assembles the memory context block.
pub struct ContextBuilder {
    store: MemoryStore,
    stream: Arc<PrefetchStream>,
    events: EventLog,
    token_budget: usize,
}

impl ContextBuilder {
    pub fn new(
        store: MemoryStore,
        stream: Arc<PrefetchStream>,
        events: EventLog,
        token_budget: usize,
    ) -> Self {
        Self {
            store,
            stream,
            events,
            token_budget,
        }
    }

    /// Build the context block. `tool_results` is the raw output of the
    /// last `search_memory` tool call, given priority placement.
    pub fn build(&self, tool_results: Option<&str>) -> Result<String> {
        let cached = self.stream.get_cached();

        let episodic_body = match &cached {
            Some(cache) if !cache.episodic.is_empty() => cache
                .episodic
                .iter()
                .map(|row| {
                    format!(
                        "[{}] {}",
                        row.item.timestamp.format("%Y-%m-%d"),
                        row.item.summary
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => self.fallback_episodes()?,
        };

        let facts_body = match &cached {
            Some(cache) if !cache.semantic.is_empty() => cache
                .semantic
                .iter()
                .map(|row| format!("- {}", row.item.fact))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => self
                .store
                .get_facts(FactStatus::Stable, FALLBACK_FACT_LIMIT)?
                .iter()
                .map(|fact| format!("- {}", fact.fact))
                .collect::<Vec<_>>()
                .join("\n"),
        };

        let tool_target = TOOL_RESULTS_CAP.min(self.token_budget / 3);
        let sections: [(&str, String, usize); 3] = [
            (
                "TOOL_RESULTS",
                tool_results.unwrap_or("").to_string(),
                tool_target,
            ),
            ("EPISODIC", episodic_body, EPISODIC_TARGET),
            ("FACTS", facts_body, FACTS_TARGET),
        ];

        let mut parts: Vec<String> = Vec::new();
        let mut tokens_used = 0usize;

        for (label, body, target) in sections {
            if body.trim().is_empty() {
                continue;
            }

            let section_text = format!("--- {label} ---\n{body}\n\n");
            let section_tokens = approx_tokens(&section_text);
            let remaining = self.token_budget.saturating_sub(tokens_used);

            if remaining == 0 {
                self.events.emit(
                    "context_skip",
                    json!({"label": label, "reason": "budget_exhausted"}),
                );
                break;
            }

            if section_tokens <= remaining {
                tokens_used += section_tokens;
                parts.push(section_text);
                self.events.emit(
                    "context_section",
                    json!({"label": label, "tokens": section_tokens, "status": "full"}),
                );
                continue;
            }

            if remaining > MIN_USEFUL_TOKENS {
                // Trim to whole lines within the section's allocation,
                // leaving room for the closing separator.
                let allowed = target.min(remaining).saturating_sub(1);
                let trimmed = trim_to_whole_items(&section_text, allowed);
                if !trimmed.trim().is_empty() {
                    let final_text = format!("{trimmed}\n\n");
                    let added = approx_tokens(&final_text);
                    tokens_used += added;
                    parts.push(final_text);
                    self.events.emit(
                        "context_section",
                        json!({"label": label, "tokens": added, "status": "truncated"}),
                    );
                }
            } else {
                self.events.emit(
                    "context_skip",
                    json!({"label": label, "reason": "budget_too_low"}),
                );
            }
            // A section that did not fit whole ends assembly either way
            break;
        }

        self.events.emit(
            "context_build_complete",
            json!({"total_tokens": tokens_used}),
        );

        Ok(parts.concat().trim_end().to_string())
    }

    /// Cold-cache fallback: recent high-importance active episodes.
    fn fallback_episodes(&self) -> Result<String> {
        let cutoff = Utc::now() - Duration::days(FALLBACK_MAX_AGE_DAYS);
        let episodes = self
            .store
            .search_episodes_by_filter(EpisodeStatus::Active, FALLBACK_SCAN_LIMIT)?;
        let lines: Vec<String> = episodes
            .iter()
            .filter(|e| e.timestamp >= cutoff && e.importance >= FALLBACK_MIN_IMPORTANCE)
            .map(|e| format!("[{}] {}", e.timestamp.format("%Y-%m-%d"), e.summary))
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Keep whole newline-delimited items while they fit the token allowance.
/// Never splits mid-item.
fn trim_to_whole_items(text: &str, max_tokens: usize) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut tokens = 0usize;

    for item in text.split('\n') {
        let item_tokens = approx_tokens(item) + 1; // item plus its newline
        if tokens + item_tokens > max_tokens {
            break;
        }
        tokens += item_tokens;
        kept.push(item);
    }

    kept.join("\n")
}
