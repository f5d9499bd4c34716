//! Shelf Cache Library
//!
//! Bounded in-memory cache for rendered thumbnails with insertion-order eviction.

pub mod fifo;

pub use fifo::{CacheStats, FifoCache};
