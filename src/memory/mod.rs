//! Bounded TTL working memory with relevance retrieval.
//!
//! Each agent owns one [`MemoryStore`]. Every user turn, model turn, tool
//! call, and reasoning trace lands here as a typed entry; reasoning prompts
//! pull the most relevant entries back out via substring matching with a
//! store-wide time-decay factor.

mod store;

pub use store::{
    MemoryEntry, MemoryKind, MemoryStats, MemoryStore, ScoredEntry, SearchOptions,
    DEFAULT_RELEVANT_LIMIT, DEFAULT_SWEEP_INTERVAL,
};
