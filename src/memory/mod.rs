//! Core memory engine — storage, scoring, retrieval, prefetch, context
//! assembly, and consolidation.
//!
//! The write path runs gate ([`gate`]) → summary ([`summarizer`]) → episode
//! ([`episodic`]) with the budget ([`budget`]) sweeping behind it. The read
//! path is the retriever ([`retriever`]) feeding the prefetch cache
//! ([`stream`]) and the context builder ([`context`]). Consolidation
//! ([`consolidation`]) periodically distills episodes into facts. Type
//! definitions live in [`types`]; all rows are owned by [`store`].

pub mod budget;
pub mod consolidation;
pub mod context;
pub mod episodic;
pub mod gate;
pub mod retriever;
pub mod scoring;
pub mod store;
pub mod stream;
pub mod summarizer;
pub mod types;

/// Convert an f32 embedding slice to little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert a little-endian BLOB back to an f32 embedding. Trailing bytes
/// that do not form a whole f32 are dropped.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
        .collect()
}
