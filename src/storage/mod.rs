//! Content-addressed object storage.

pub mod cache;

pub use cache::{CacheStats, ContentCache};
