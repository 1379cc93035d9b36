//! Error kinds for the memory subsystem.
//!
//! Errors never cross the foreground/background boundary as panics; every
//! fallible call returns [`MemoryError`] and the caller decides whether to
//! degrade (empty context, skipped batch) or surface the failure.

use thiserror::Error;

use crate::generator::GeneratorError;

/// The error type returned by all fallible memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// I/O failure against persisted state. Surfaced to the caller; the
    /// store never retries silently.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Embed or chat failure from the external generator.
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// Missing or invalid configuration (e.g. credentials). The subsystem
    /// initializes disabled rather than failing the host process.
    #[error("config error: {0}")]
    Config(String),

    /// A persisted row violates an invariant (e.g. embedding dimension
    /// mismatch). The row is treated as if its embedding were zero.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl MemoryError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = MemoryError> = std::result::Result<T, E>;
