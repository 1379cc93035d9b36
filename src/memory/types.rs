use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an episode.
///
/// Created `pending_embedding` → embedded → `active` → either `archived`
/// by the budget or `consolidated` by the consolidator. Episodes are never
/// deleted by normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    PendingEmbedding,
    Active,
    Archived,
    Consolidated,
}

impl EpisodeStatus {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingEmbedding => "pending_embedding",
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Consolidated => "consolidated",
        }
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EpisodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_embedding" => Ok(Self::PendingEmbedding),
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "consolidated" => Ok(Self::Consolidated),
            _ => Err(format!("unknown episode status: {s}")),
        }
    }
}

/// Lifecycle of a semantic fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    Stable,
    Provisional,
}

impl FactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Provisional => "provisional",
        }
    }
}

impl std::fmt::Display for FactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Self::Stable),
            "provisional" => Ok(Self::Provisional),
            _ => Err(format!("unknown fact status: {s}")),
        }
    }
}

/// The verbatim text of one user/assistant exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeText {
    pub user: String,
    pub assistant: String,
}

impl ExchangeText {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// A stored record of one user/assistant exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    /// Short first-person synopsis of the exchange.
    pub summary: String,
    pub full_text: ExchangeText,
    pub timestamp: DateTime<Utc>,
    /// Fixed-length vector; `None` while `pending_embedding`.
    pub embedding: Option<Vec<f32>>,
    /// In [0, 1]; set at write time, never mutated. Ranking uses the
    /// time-decayed value, not this one.
    pub importance: f64,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub connections: Vec<String>,
    pub status: EpisodeStatus,
}

/// Fields for a new episode row. `timestamp` defaults to now, `status` to
/// `pending_embedding`.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub summary: String,
    pub full_text: ExchangeText,
    pub importance: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
    pub status: EpisodeStatus,
}

impl NewEpisode {
    pub fn new(summary: impl Into<String>, full_text: ExchangeText, importance: f64) -> Self {
        Self {
            summary: summary.into(),
            full_text,
            importance,
            timestamp: None,
            embedding: None,
            status: EpisodeStatus::PendingEmbedding,
        }
    }
}

/// Patch applied by [`update_episode`]; `None` fields are left untouched.
///
/// [`update_episode`]: crate::memory::store::MemoryStore::update_episode
#[derive(Debug, Clone, Default)]
pub struct EpisodeUpdate {
    pub summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub status: Option<EpisodeStatus>,
    pub topics: Option<Vec<String>>,
    pub entities: Option<Vec<String>>,
    pub connections: Option<Vec<String>>,
}

/// A semantic claim distilled from one or more episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub fact: String,
    pub confidence: f64,
    pub first_observed: DateTime<Utc>,
    pub last_confirmed: DateTime<Utc>,
    /// Episode ids this fact was distilled from. Never empty.
    pub derived_from: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    /// Ids of facts this one contradicts.
    pub contradictions: Vec<String>,
    pub status: FactStatus,
}

/// Fields for a new fact row.
#[derive(Debug, Clone)]
pub struct NewFact {
    pub fact: String,
    pub confidence: f64,
    pub derived_from: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub contradictions: Vec<String>,
    pub status: FactStatus,
}

/// An interaction-norm record, keyed by category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalEntry {
    pub category: String,
    pub data: serde_json::Value,
    pub confidence: f64,
    /// Incremented on every update to this category.
    pub evidence_count: u32,
    pub last_updated: DateTime<Utc>,
}

/// The current emotional continuity state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionalThread {
    pub current_state: String,
    pub should_acknowledge: bool,
    /// Consecutive turns the current state has persisted.
    pub thread_length: u32,
    pub last_update: DateTime<Utc>,
}
