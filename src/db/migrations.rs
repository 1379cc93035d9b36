//! Forward-only schema migration framework.
//!
//! The `schema_version` table holds every version the database has reached;
//! the current version is the maximum. Migrations run sequentially at
//! startup to bring the database up to [`CURRENT_SCHEMA_VERSION`] — the
//! version is readable and only ever increases.

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        let version: Option<u32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    })
}

/// Record that the database has reached a new version.
fn record_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(
        schema_version = version,
        target_version = CURRENT_SCHEMA_VERSION,
        "checking migrations"
    );

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        match next {
            1 => {} // base schema, created by init_schema
            2 => migrate_v1_to_v2(conn)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }

        record_schema_version(conn, next)?;
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: index semantic memory by confidence, which the
/// retriever filters on for every prefetch and tool search.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_semantic_confidence ON semantic_memory(confidence)",
    )?;
    Ok(())
}
