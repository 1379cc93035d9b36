//! SQL DDL for all engram tables.
//!
//! Defines the `episodic_memory`, `semantic_memory`, `relational_memory`,
//! `emotional_thread`, and `schema_version` tables. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization. List- and struct-valued
//! columns are JSON text; embeddings are little-endian f32 blobs.

use rusqlite::Connection;

/// All schema DDL statements.
const SCHEMA_SQL: &str = r#"
-- One user/assistant exchange
CREATE TABLE IF NOT EXISTS episodic_memory (
    id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    full_text TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    embedding BLOB,
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0),
    topics TEXT NOT NULL DEFAULT '[]',
    entities TEXT NOT NULL DEFAULT '[]',
    connections TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'pending_embedding'
        CHECK(status IN ('pending_embedding','active','archived','consolidated'))
);

CREATE INDEX IF NOT EXISTS idx_episodic_status ON episodic_memory(status);
CREATE INDEX IF NOT EXISTS idx_episodic_timestamp ON episodic_memory(timestamp);

-- Semantic claims distilled from episodes
CREATE TABLE IF NOT EXISTS semantic_memory (
    id TEXT PRIMARY KEY,
    fact TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    first_observed TEXT NOT NULL,
    last_confirmed TEXT NOT NULL,
    derived_from TEXT NOT NULL DEFAULT '[]',
    embedding BLOB,
    contradictions TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'stable' CHECK(status IN ('stable','provisional'))
);

CREATE INDEX IF NOT EXISTS idx_semantic_status ON semantic_memory(status);

-- Interaction norms and preferences, keyed by category
CREATE TABLE IF NOT EXISTS relational_memory (
    category TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    confidence REAL NOT NULL,
    evidence_count INTEGER NOT NULL DEFAULT 1,
    last_updated TEXT NOT NULL
);

-- Emotional continuity (single current row)
CREATE TABLE IF NOT EXISTS emotional_thread (
    id TEXT PRIMARY KEY,
    current_state TEXT NOT NULL,
    should_acknowledge INTEGER NOT NULL DEFAULT 0,
    thread_length INTEGER NOT NULL DEFAULT 1,
    last_update TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    let rows: i64 = conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?;
    if rows == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}
