//! Structured memory event log.
//!
//! Every memory decision (gate verdicts, retrievals, cache refreshes,
//! budget sweeps) emits an event with a kind and a JSON detail map, carried
//! over `tracing`. Most events are diagnostic and suppressed unless
//! `memory.verbose_logging` is set; errors and budget pruning always emit.

use serde_json::Value;

/// Handle for emitting memory events. Cheap to clone; components hold a
/// copy each.
#[derive(Debug, Clone)]
pub struct EventLog {
    verbose: bool,
}

impl EventLog {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Event log that only emits the always-on kinds.
    pub fn quiet() -> Self {
        Self::new(false)
    }

    /// Emit a diagnostic event. Dropped unless verbose logging is enabled.
    pub fn emit(&self, kind: &str, details: Value) {
        if !self.verbose {
            return;
        }
        tracing::debug!(target: "engram::events", event = kind, details = %details, "memory event");
    }

    /// Emit an event that bypasses the verbose gate (errors, pruning).
    pub fn emit_always(&self, kind: &str, details: Value) {
        tracing::info!(target: "engram::events", event = kind, details = %details, "memory event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quiet_log_drops_diagnostic_events() {
        // Emitting against a quiet log must not panic or block; the verbose
        // gate is the only observable behavior without a subscriber.
        let log = EventLog::quiet();
        log.emit("retrieval", json!({"candidate_count": 3}));
        log.emit_always("budget_pruning", json!({"archived_count": 5}));
    }

    #[test]
    fn verbose_log_emits() {
        let log = EventLog::new(true);
        log.emit("cache_refreshed", json!({"episodic_count": 2}));
    }
}
