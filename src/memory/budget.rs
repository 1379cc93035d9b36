//! Episodic budget: keeps the active set bounded.
//!
//! Invoked opportunistically every [`CHECK_FREQUENCY`] writes and on
//! demand. Over-budget episodes are ranked by
//! `0.6 · decayed_importance + 0.4 · recency`; the top `max_active` stay
//! active, the rest flip to `archived`. Archiving is not reversed by
//! normal operation, and a back-to-back sweep with no intervening writes
//! is a no-op.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use serde_json::json;

use crate::error::Result;
use crate::events::EventLog;
use crate::memory::scoring;
use crate::memory::store::MemoryStore;
use crate::memory::types::EpisodeStatus;

/// Budget is checked every this many episode writes.
pub const CHECK_FREQUENCY: usize = 50;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub initial_count: usize,
    pub archived_count: usize,
}

/// Active-set budget enforcer.
pub struct MemoryBudget {
    store: MemoryStore,
    events: EventLog,
    max_active: usize,
    add_count: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(store: MemoryStore, max_active: usize, events: EventLog) -> Self {
        Self {
            store,
            events,
            max_active,
            add_count: AtomicUsize::new(0),
        }
    }

    /// Record one episode write; runs a sweep after every
    /// [`CHECK_FREQUENCY`] writes.
    pub fn note_write(&self) -> Result<Option<PruneReport>> {
        let count = self.add_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= CHECK_FREQUENCY {
            self.add_count.store(0, Ordering::SeqCst);
            return self.enforce().map(Some);
        }
        Ok(None)
    }

    /// Sweep the active set down to `max_active`.
    pub fn enforce(&self) -> Result<PruneReport> {
        let active = self
            .store
            .search_episodes_by_filter(EpisodeStatus::Active, usize::MAX)?;

        if active.len() <= self.max_active {
            return Ok(PruneReport {
                initial_count: active.len(),
                archived_count: 0,
            });
        }

        let now = Utc::now();
        let mut ranked: Vec<(f64, &str)> = active
            .iter()
            .map(|episode| {
                let decayed = scoring::decayed_importance(episode.importance, episode.timestamp, now);
                let recency = scoring::recency_weight(episode.timestamp, now);
                (0.6 * decayed + 0.4 * recency, episode.id.as_str())
            })
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let to_archive: Vec<String> = ranked[self.max_active..]
            .iter()
            .map(|(_, id)| (*id).to_string())
            .collect();
        let archived = self.store.archive_episodes(&to_archive)?;

        self.events.emit_always(
            "budget_pruning",
            json!({
                "initial_count": active.len(),
                "archived_count": archived,
                "max_active": self.max_active,
            }),
        );

        Ok(PruneReport {
            initial_count: active.len(),
            archived_count: archived,
        })
    }
}
