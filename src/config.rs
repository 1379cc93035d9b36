//! Configuration loading and management.
//!
//! Engram reads configuration from a TOML file with environment variable
//! overrides (`ENGRAM_DB`, `ENGRAM_API_KEY`). All fields have defaults —
//! no configuration file is required, though without generator credentials
//! the subsystem starts disabled.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level configuration, deserialized from `config.toml`.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngramConfig {
    /// Memory engine settings.
    pub memory: MemoryConfig,
    /// Database path.
    pub storage: StorageConfig,
    /// External generator endpoint and credentials.
    pub generator: GeneratorConfig,
}

/// Memory engine settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Master switch. When off, every memory operation is a no-op.
    pub enabled: bool,
    /// Maximum number of episodes kept `active`; the budget archives the
    /// rest (default 1000).
    pub max_episodic_active: usize,
    /// Embedding vector dimension (default 768). Validated on every read.
    pub embedding_dim: usize,
    /// Minimum HDBSCAN cluster size for consolidation (default 3).
    pub min_cluster_size: usize,
    /// Maximum episodes per semantic-extraction batch (default 50).
    pub max_semantic_extraction_batch_size: usize,
    /// Approximate token budget for the assembled context (default 1500).
    pub context_token_budget: usize,
    /// How many recent turns feed the prefetch cache (default 3, max 3).
    pub prefetch_recent_turns: usize,
    /// Emit verbose memory events (default false).
    pub verbose_logging: bool,
    /// Opaque model identifiers, one per generator-backed concern.
    pub embedding_model: String,
    pub semantic_model: String,
    pub summarizer_model: String,
    pub relational_model: String,
    pub gate_model: String,
    /// Feature flags.
    pub feature_flags: FeatureFlags,
}

/// Feature flags.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeatureFlags {
    /// When off, every exchange is stored without asking the gate.
    pub enable_gating: bool,
}

/// Database path settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file (supports `~` expansion).
    pub db_path: String,
}

/// External generator endpoint and credentials.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Base URL of the generator REST API.
    pub base_url: String,
    /// API key. Empty means no credentials: the subsystem starts disabled.
    pub api_key: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_episodic_active: 1000,
            embedding_dim: 768,
            min_cluster_size: 3,
            max_semantic_extraction_batch_size: 50,
            context_token_budget: 1500,
            prefetch_recent_turns: 3,
            verbose_logging: false,
            embedding_model: "text-embedding-004".into(),
            semantic_model: "gemini-1.5-flash".into(),
            summarizer_model: "gemini-1.5-flash-8b".into(),
            relational_model: "gemini-1.5-flash".into(),
            gate_model: "gemini-1.5-flash-8b".into(),
            feature_flags: FeatureFlags::default(),
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_gating: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_engram_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: String::new(),
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from the default TOML path, then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ENGRAM_DB, ENGRAM_API_KEY).
    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key));
    }

    /// Apply overrides using a custom env lookup function.
    fn apply_env_overrides_with(
        &mut self,
        env: impl Fn(&str) -> Result<String, std::env::VarError>,
    ) {
        if let Ok(val) = env("ENGRAM_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = env("ENGRAM_API_KEY") {
            self.generator.api_key = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Whether the subsystem can run at all: master switch on and
    /// generator credentials present.
    pub fn memory_enabled(&self) -> bool {
        self.memory.enabled && !self.generator.api_key.is_empty()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
