// Network collaborator: turns a resolved address into a byte stream.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetcherConfig;
use crate::error::{MediaCacheError, Result};

/// Chunks of a response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A successful response ready to be streamed to disk
pub struct FetchedBody {
    /// Declared length of the body, when the server sent one
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

impl FetchedBody {
    pub fn new(content_length: Option<u64>, stream: ByteStream) -> Self {
        Self {
            content_length,
            stream,
        }
    }

    /// A body made of a single in-memory chunk
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self::new(
            Some(len),
            Box::pin(futures::stream::once(async move { Ok::<_, MediaCacheError>(data) })),
        )
    }
}

impl fmt::Debug for FetchedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue the request. Transport errors and non-success statuses fail here;
    /// errors while streaming surface as items of the returned stream.
    async fn fetch(&self, address: &Url) -> Result<FetchedBody>;
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &FetcherConfig) -> Result<Client> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder.build().map_err(MediaCacheError::from)
}

/// [`Fetcher`] over HTTP(S).
///
/// Owns the retry policy: connect and timeout errors and 5xx responses are
/// retried with exponential backoff, 4xx responses fail immediately.
pub struct HttpFetcher {
    http_client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let http_client = create_client(&config)?;
        Ok(Self::with_client(http_client, config))
    }

    pub fn with_client(http_client: Client, config: FetcherConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, address: &Url) -> Result<FetchedBody> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.http_client.get(address.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let content_length = response.content_length();
                        debug!(url = %address, ?content_length, "Response received");
                        let stream = response
                            .bytes_stream()
                            .map(|chunk| chunk.map_err(MediaCacheError::from));
                        return Ok(FetchedBody::new(content_length, Box::pin(stream)));
                    }
                    // Non-retryable client errors (4xx) and exhausted retries
                    if !status.is_server_error() || attempts > self.config.max_retries {
                        return Err(MediaCacheError::HttpStatus {
                            status,
                            url: address.to_string(),
                        });
                    }
                    warn!(url = %address, %status, attempt = attempts, "Server error, retrying");
                }
                Err(e) => {
                    if !e.is_connect() && !e.is_timeout() {
                        return Err(MediaCacheError::from(e));
                    }
                    if attempts > self.config.max_retries {
                        return Err(MediaCacheError::FetchFailure(format!(
                            "Max retries ({}) exceeded for {} due to network error: {}",
                            self.config.max_retries, address, e
                        )));
                    }
                    warn!(url = %address, error = %e, attempt = attempts, "Network error, retrying");
                }
            }

            tokio::time::sleep(self.config.retry_delay(attempts)).await;
        }
    }
}
