//! Cognitive memory for conversational assistants — episodic storage,
//! semantic consolidation, and prefetched recall.
//!
//! Engram gives an assistant a persistent record of past exchanges plus the
//! machinery around it: a gate that decides what is worth keeping, an
//! embedding-indexed store searched by cosine similarity, a background
//! prefetch cache warmed against the last few turns, a budget that bounds
//! the active set, and a consolidation pass that distills episodes into
//! longer-lived facts.
//!
//! # Architecture
//!
//! - **Storage**: SQLite; embeddings at rest as little-endian f32 blobs,
//!   similarity computed in-process
//! - **Embeddings & language**: an external generator service behind the
//!   [`generator::Generator`] trait
//! - **Scheduling**: a synchronous foreground path plus one background
//!   executor thread that serializes all deferred work
//!
//! # Modules
//!
//! - [`config`] — TOML configuration with environment overrides
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`generator`] — the external embed/chat collaborator contract
//! - [`embedding`] — batched text-to-vector pipeline over the generator
//! - [`memory`] — the engine: store, scoring, retrieval, prefetch,
//!   context assembly, budget, consolidation
//! - [`tools`] — the `search_memory` tool surfaced to the generator
//! - [`system`] — wiring and the per-turn pipeline

pub mod background;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod events;
pub mod generator;
pub mod memory;
pub mod system;
pub mod tools;
