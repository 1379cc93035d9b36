//! Durable keyed storage for episodes, facts, relational entries, and the
//! emotional thread.
//!
//! [`MemoryStore`] exclusively owns all persisted rows; every other
//! component borrows immutable snapshots returned from queries. A single
//! mutex serializes writes; each call is atomic and I/O faults surface to
//! the caller as storage errors — the store never retries silently.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::{MemoryError, Result};
use crate::memory::types::{
    EmotionalThread, Episode, EpisodeStatus, EpisodeUpdate, ExchangeText, Fact, FactStatus,
    NewEpisode, NewFact, RelationalEntry,
};
use crate::memory::{bytes_to_embedding, embedding_to_bytes};

/// Filters for the scan-and-score accessors. `status` applies to the
/// episodic table only; `confidence_gt` to the semantic table only.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub status: Option<EpisodeStatus>,
    pub confidence_gt: Option<f64>,
}

impl SearchFilters {
    /// The filter set used by the prefetch stream and the memory search
    /// tool: active episodes, facts above the 0.5 confidence floor.
    pub fn active() -> Self {
        Self {
            status: Some(EpisodeStatus::Active),
            confidence_gt: Some(0.5),
        }
    }
}

/// Handle to the persisted memory tables. Cheap to clone; all clones share
/// one serialized connection.
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open an in-memory store with schema and migrations applied.
    pub fn in_memory() -> Result<Self> {
        let conn = crate::db::open_memory_database()
            .map_err(|e| MemoryError::config(format!("in-memory database: {e}")))?;
        Ok(Self::new(conn))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    // ── Episodes ─────────────────────────────────────────────────────────

    /// Insert a new episode row. Returns the generated id.
    pub fn add_episode(&self, episode: NewEpisode) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        let timestamp = episode.timestamp.unwrap_or_else(Utc::now);
        let embedding_blob = episode.embedding.as_deref().map(embedding_to_bytes);

        let conn = self.lock();
        conn.execute(
            "INSERT INTO episodic_memory \
             (id, summary, full_text, timestamp, embedding, importance, topics, entities, connections, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]', '[]', '[]', ?7)",
            params![
                id,
                episode.summary,
                serde_json::to_string(&episode.full_text).expect("exchange text serializes"),
                timestamp.to_rfc3339(),
                embedding_blob,
                episode.importance.clamp(0.0, 1.0),
                episode.status.as_str(),
            ],
        )?;
        Ok(id)
    }

    /// Fetch a single episode by id.
    pub fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, summary, full_text, timestamp, embedding, importance, \
             topics, entities, connections, status \
             FROM episodic_memory WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], episode_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Apply a patch to an episode. Returns `false` when the id does not
    /// exist or the patch is empty.
    pub fn update_episode(&self, id: &str, patch: EpisodeUpdate) -> Result<bool> {
        let mut set_parts: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let mut push = |column: &str, value: Box<dyn rusqlite::types::ToSql>| {
            values.push(value);
            set_parts.push(format!("{column} = ?{}", values.len()));
        };

        if let Some(summary) = patch.summary {
            push("summary", Box::new(summary));
        }
        if let Some(embedding) = patch.embedding {
            push("embedding", Box::new(embedding_to_bytes(&embedding)));
        }
        if let Some(status) = patch.status {
            push("status", Box::new(status.as_str().to_string()));
        }
        if let Some(topics) = patch.topics {
            push(
                "topics",
                Box::new(serde_json::to_string(&topics).expect("list serializes")),
            );
        }
        if let Some(entities) = patch.entities {
            push(
                "entities",
                Box::new(serde_json::to_string(&entities).expect("list serializes")),
            );
        }
        if let Some(connections) = patch.connections {
            push(
                "connections",
                Box::new(serde_json::to_string(&connections).expect("list serializes")),
            );
        }

        if set_parts.is_empty() {
            return Ok(false);
        }

        values.push(Box::new(id.to_string()));
        let sql = format!(
            "UPDATE episodic_memory SET {} WHERE id = ?{}",
            set_parts.join(", "),
            values.len()
        );
        let params: Vec<&dyn rusqlite::types::ToSql> = values
            .iter()
            .map(|v| v.as_ref() as &dyn rusqlite::types::ToSql)
            .collect();

        let conn = self.lock();
        let affected = conn.execute(&sql, params.as_slice())?;
        Ok(affected > 0)
    }

    /// List episodes by status, newest first. Filter only — no similarity.
    pub fn search_episodes_by_filter(
        &self,
        status: EpisodeStatus,
        limit: usize,
    ) -> Result<Vec<Episode>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, summary, full_text, timestamp, embedding, importance, \
             topics, entities, connections, status \
             FROM episodic_memory WHERE status = ?1 \
             ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let episodes = stmt
            .query_map(params![status.as_str(), limit], episode_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    /// Count episodes with the given status.
    pub fn count_episodes(&self, status: EpisodeStatus) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM episodic_memory WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Scan-and-score accessor: episodes matching the filters that have a
    /// non-null embedding. Used by the retriever.
    pub fn episodes_with_embeddings(&self, filters: &SearchFilters) -> Result<Vec<Episode>> {
        let conn = self.lock();
        let status = filters
            .status
            .unwrap_or(EpisodeStatus::Active)
            .as_str()
            .to_string();
        let mut stmt = conn.prepare(
            "SELECT id, summary, full_text, timestamp, embedding, importance, \
             topics, entities, connections, status \
             FROM episodic_memory WHERE status = ?1 AND embedding IS NOT NULL",
        )?;
        let episodes = stmt
            .query_map(params![status], episode_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    /// Active episodes not yet consolidated (still carrying the given
    /// status), oldest first so consolidation reads in capture order.
    pub fn get_unconsolidated_episodes(&self, status: EpisodeStatus) -> Result<Vec<Episode>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, summary, full_text, timestamp, embedding, importance, \
             topics, entities, connections, status \
             FROM episodic_memory WHERE status = ?1 AND embedding IS NOT NULL \
             ORDER BY timestamp ASC",
        )?;
        let episodes = stmt
            .query_map(params![status.as_str()], episode_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    /// Flip the given episodes to `consolidated` in one transaction.
    /// Returns `true` when every id was found.
    pub fn mark_consolidated(&self, ids: &[String]) -> Result<bool> {
        if ids.is_empty() {
            return Ok(true);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut all_found = true;
        {
            let mut stmt =
                tx.prepare("UPDATE episodic_memory SET status = 'consolidated' WHERE id = ?1")?;
            for id in ids {
                if stmt.execute(params![id])? == 0 {
                    all_found = false;
                }
            }
        }
        tx.commit()?;
        Ok(all_found)
    }

    /// Flip the given episodes to `archived` in one transaction. Returns
    /// the number of rows changed.
    pub fn archive_episodes(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut archived = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE episodic_memory SET status = 'archived' WHERE id = ?1")?;
            for id in ids {
                archived += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(archived)
    }

    // ── Facts ────────────────────────────────────────────────────────────

    /// Insert a new semantic fact. Returns the generated id.
    pub fn add_fact(&self, fact: NewFact) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let embedding_blob = fact.embedding.as_deref().map(embedding_to_bytes);

        let conn = self.lock();
        conn.execute(
            "INSERT INTO semantic_memory \
             (id, fact, confidence, first_observed, last_confirmed, derived_from, embedding, contradictions, status) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                fact.fact,
                fact.confidence.clamp(0.0, 1.0),
                now,
                serde_json::to_string(&fact.derived_from).expect("list serializes"),
                embedding_blob,
                serde_json::to_string(&fact.contradictions).expect("list serializes"),
                fact.status.as_str(),
            ],
        )?;
        Ok(id)
    }

    /// List facts by status, most recently confirmed first.
    pub fn get_facts(&self, status: FactStatus, limit: usize) -> Result<Vec<Fact>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, fact, confidence, first_observed, last_confirmed, \
             derived_from, embedding, contradictions, status \
             FROM semantic_memory WHERE status = ?1 \
             ORDER BY last_confirmed DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let facts = stmt
            .query_map(params![status.as_str(), limit], fact_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(facts)
    }

    /// Scan-and-score accessor: facts above the confidence floor with a
    /// non-null embedding.
    pub fn facts_with_embeddings(&self, filters: &SearchFilters) -> Result<Vec<Fact>> {
        let floor = filters.confidence_gt.unwrap_or(0.0);
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, fact, confidence, first_observed, last_confirmed, \
             derived_from, embedding, contradictions, status \
             FROM semantic_memory WHERE confidence > ?1 AND embedding IS NOT NULL",
        )?;
        let facts = stmt
            .query_map(params![floor], fact_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(facts)
    }

    /// Record a contradiction pointer on an existing fact.
    pub fn add_contradiction(&self, fact_id: &str, contradicts: &str) -> Result<bool> {
        let conn = self.lock();
        let current: Option<String> = conn
            .query_row(
                "SELECT contradictions FROM semantic_memory WHERE id = ?1",
                params![fact_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let Some(current) = current else {
            return Ok(false);
        };
        let mut contradictions: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
        if !contradictions.iter().any(|c| c == contradicts) {
            contradictions.push(contradicts.to_string());
        }
        conn.execute(
            "UPDATE semantic_memory SET contradictions = ?1 WHERE id = ?2",
            params![
                serde_json::to_string(&contradictions).expect("list serializes"),
                fact_id
            ],
        )?;
        Ok(true)
    }

    // ── Relational ───────────────────────────────────────────────────────

    /// Upsert a relational entry; the evidence count increments on every
    /// update to the same category.
    pub fn update_relational(
        &self,
        category: &str,
        data: serde_json::Value,
        confidence: f64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO relational_memory (category, data, confidence, evidence_count, last_updated) \
             VALUES (?1, ?2, ?3, \
                 COALESCE((SELECT evidence_count FROM relational_memory WHERE category = ?1) + 1, 1), \
                 ?4)",
            params![category, data.to_string(), confidence.clamp(0.0, 1.0), now],
        )?;
        Ok(())
    }

    /// Fetch relational entries, optionally restricted to one category.
    pub fn get_relational(&self, category: Option<&str>) -> Result<Vec<RelationalEntry>> {
        let conn = self.lock();
        let mut entries = Vec::new();

        let map_row = |row: &Row<'_>| -> rusqlite::Result<RelationalEntry> {
            let data_str: String = row.get(1)?;
            Ok(RelationalEntry {
                category: row.get(0)?,
                data: serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null),
                confidence: row.get(2)?,
                evidence_count: row.get(3)?,
                last_updated: parse_timestamp(row, 4)?,
            })
        };

        match category {
            Some(category) => {
                let mut stmt = conn.prepare(
                    "SELECT category, data, confidence, evidence_count, last_updated \
                     FROM relational_memory WHERE category = ?1",
                )?;
                for row in stmt.query_map(params![category], map_row)? {
                    entries.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT category, data, confidence, evidence_count, last_updated \
                     FROM relational_memory ORDER BY category",
                )?;
                for row in stmt.query_map([], map_row)? {
                    entries.push(row?);
                }
            }
        }
        Ok(entries)
    }

    // ── Emotional thread ─────────────────────────────────────────────────

    /// Overwrite the emotional thread with a new observation. A repeated
    /// state extends the thread; a new state resets it. The acknowledge
    /// flag is raised once a state persists for three consecutive turns.
    pub fn update_emotional(&self, state: &str) -> Result<EmotionalThread> {
        let previous = self.get_emotional()?;
        let thread_length = match &previous {
            Some(thread) if thread.current_state == state => thread.thread_length + 1,
            _ => 1,
        };
        let should_acknowledge = thread_length >= 3;
        let now = Utc::now();

        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO emotional_thread \
             (id, current_state, should_acknowledge, thread_length, last_update) \
             VALUES ('current', ?1, ?2, ?3, ?4)",
            params![
                state,
                should_acknowledge as i64,
                thread_length,
                now.to_rfc3339()
            ],
        )?;

        Ok(EmotionalThread {
            current_state: state.to_string(),
            should_acknowledge,
            thread_length,
            last_update: now,
        })
    }

    /// Fetch the current emotional thread, if any has been recorded.
    pub fn get_emotional(&self) -> Result<Option<EmotionalThread>> {
        let conn = self.lock();
        let thread = conn
            .query_row(
                "SELECT current_state, should_acknowledge, thread_length, last_update \
                 FROM emotional_thread ORDER BY last_update DESC LIMIT 1",
                [],
                |row| {
                    let acknowledge: i64 = row.get(1)?;
                    Ok(EmotionalThread {
                        current_state: row.get(0)?,
                        should_acknowledge: acknowledge != 0,
                        thread_length: row.get(2)?,
                        last_update: parse_timestamp(row, 3)?,
                    })
                },
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(thread)
    }
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> rusqlite::Result<Option<T>> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    let full_text_str: String = row.get(2)?;
    let embedding_blob: Option<Vec<u8>> = row.get(4)?;
    let status_str: String = row.get(9)?;
    Ok(Episode {
        id: row.get(0)?,
        summary: row.get(1)?,
        full_text: serde_json::from_str(&full_text_str).unwrap_or_else(|_| ExchangeText::default()),
        timestamp: parse_timestamp(row, 3)?,
        embedding: embedding_blob.map(|blob| bytes_to_embedding(&blob)),
        importance: row.get(5)?,
        topics: parse_list(row, 6)?,
        entities: parse_list(row, 7)?,
        connections: parse_list(row, 8)?,
        status: status_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
    })
}

fn fact_from_row(row: &Row<'_>) -> rusqlite::Result<Fact> {
    let embedding_blob: Option<Vec<u8>> = row.get(6)?;
    let status_str: String = row.get(8)?;
    Ok(Fact {
        id: row.get(0)?,
        fact: row.get(1)?,
        confidence: row.get(2)?,
        first_observed: parse_timestamp(row, 3)?,
        last_confirmed: parse_timestamp(row, 4)?,
        derived_from: parse_list(row, 5)?,
        embedding: embedding_blob.map(|blob| bytes_to_embedding(&blob)),
        contradictions: parse_list(row, 7)?,
        status: status_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
    })
}
