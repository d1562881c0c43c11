//! # Builders
//!
//! Fluent construction of [`FetcherConfig`] values and of the
//! [`FetchPipeline`](crate::FetchPipeline) itself.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use media_cache::FetcherConfig;
//!
//! let config = FetcherConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("Authorization", "Bearer secret")
//!     .with_max_retries(4)
//!     .build();
//! assert_eq!(config.max_retries, 4);
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::cache::{CacheConfig, CacheStore};
use crate::decryption::{AttachmentDecryptor, Decryptor};
use crate::error::Result;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::pipeline::{FetchPipeline, PipelineInner};
use crate::registry::InFlightRegistry;
use crate::resolver::{AddressResolver, DirectUrlResolver};
use crate::FetcherConfig;

/// Builder for creating FetcherConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct FetcherConfigBuilder {
    config: FetcherConfig,
}

impl FetcherConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: FetcherConfig::default(),
        }
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header, invalid names or values are ignored
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_base(mut self, delay: Duration) -> Self {
        self.config.retry_delay_base = delay;
        self
    }

    /// Build the FetcherConfig instance
    pub fn build(self) -> FetcherConfig {
        self.config
    }
}

impl Default for FetcherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles a [`FetchPipeline`].
///
/// Collaborators left unset fall back to [`HttpFetcher`] (built from the
/// fetcher config), [`AttachmentDecryptor`] and [`DirectUrlResolver`].
#[derive(Default)]
pub struct FetchPipelineBuilder {
    cache_config: CacheConfig,
    fetcher_config: FetcherConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    decryptor: Option<Arc<dyn Decryptor>>,
    resolver: Option<Arc<dyn AddressResolver>>,
}

impl FetchPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Used only when no fetcher is supplied
    pub fn with_fetcher_config(mut self, fetcher_config: FetcherConfig) -> Self {
        self.fetcher_config = fetcher_config;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Create the partition directories and assemble the pipeline
    pub async fn build(self) -> Result<FetchPipeline> {
        let store = CacheStore::new(&self.cache_config);
        store.ensure_initialized().await?;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(self.fetcher_config)?),
        };

        Ok(FetchPipeline::from_inner(PipelineInner {
            store,
            registry: Arc::new(InFlightRegistry::new()),
            fetcher,
            decryptor: self
                .decryptor
                .unwrap_or_else(|| Arc::new(AttachmentDecryptor)),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(DirectUrlResolver)),
        }))
    }
}
