//! # Media Cache
//!
//! Local cache-and-fetch manager for remote media attachments.
//!
//! ## Features
//!
//! - At most one network fetch per locator, however many callers ask
//! - Fetched bytes persisted on disk and served from there afterwards
//! - Encrypted attachments decrypted once into a separate clear partition
//! - Deterministic cache file names derived from locator and MIME type
//!
//! ```no_run
//! use media_cache::{CacheConfig, ContentUrlResolver, FetchPipeline, MediaRequest};
//! use std::sync::Arc;
//!
//! # async fn run() -> media_cache::Result<()> {
//! let homeserver = url::Url::parse("https://matrix.example.org").unwrap();
//! let pipeline = FetchPipeline::builder()
//!     .with_cache_config(CacheConfig::for_session("/tmp/app-cache", "session-1"))
//!     .with_resolver(Arc::new(ContentUrlResolver::new(homeserver)))
//!     .build()
//!     .await?;
//!
//! let file = pipeline
//!     .fetch(MediaRequest::new("mxc://server/abc123").with_mime_hint("image/png"))
//!     .await?;
//! println!("cached at {}", file.path().display());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod decryption;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod state;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::{FetchPipelineBuilder, FetcherConfigBuilder};
pub use cache::{CacheConfig, CacheKey, CacheNamer, CacheStore, CachedFile, Partition};
pub use config::FetcherConfig;
pub use decryption::{AttachmentDecryptor, DecryptionMaterial, Decryptor};
pub use error::{FailureKind, MediaCacheError, Result};
pub use fetcher::{ByteStream, FetchedBody, Fetcher, HttpFetcher};
pub use pipeline::{FetchPipeline, MediaRequest, RequestHandle, RequestRole};
pub use registry::{BeginOutcome, FetchOutcome, InFlightRegistry, WaiterId};
pub use resolver::{AddressResolver, ContentUrlResolver, DirectUrlResolver};
pub use state::{CacheState, StateQuery};
