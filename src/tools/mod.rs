//! Tools surfaced to the generator during chat.
//!
//! One tool today: [`search_memory::MemorySearchTool`], active recall over
//! the memory tables. Its output gets priority placement by the context
//! builder on the following turn.

pub mod search_memory;
