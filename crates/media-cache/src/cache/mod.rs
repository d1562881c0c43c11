//! # Cache System
//!
//! On-disk storage for fetched and decrypted media. Both partitions share
//! one naming scheme, so the location of an entry is known before any I/O.

// Module declarations
mod namer;
mod store;
mod types;

// Re-export primary types from our various modules
pub use namer::{CacheNamer, extension_for_mime};
pub use store::{CacheStore, STAGING_DIR_NAME, StagedFile};
pub use types::{CacheConfig, CacheKey, CachedFile, Partition};
