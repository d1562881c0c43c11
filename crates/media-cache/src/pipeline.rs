//! # Fetch Pipeline
//!
//! Turns a [`MediaRequest`] into a local file. Concurrent requests for the
//! same locator share one driver: the first caller fetches (and decrypts)
//! while later callers queue as waiters and receive the same outcome.
//!
//! The work is split in two independently cached stages:
//!
//! 1. fetch into the raw partition, skipped when the raw file exists;
//! 2. decrypt into the clear partition, only when decryption material is
//!    supplied and skipped when the clear file exists.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::builder::FetchPipelineBuilder;
use crate::cache::{CacheNamer, CacheStore, CachedFile, Partition};
use crate::decryption::{DecryptionMaterial, Decryptor};
use crate::error::{MediaCacheError, Result};
use crate::fetcher::Fetcher;
use crate::registry::{BeginOutcome, FetchOutcome, InFlightRegistry, WaiterId};
use crate::resolver::AddressResolver;
use crate::state::{CacheState, StateQuery};

/// A request for a remote resource as a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub locator: String,
    /// Human readable name, used for logging only
    pub display_name: String,
    pub mime_hint: Option<String>,
    pub decryption: Option<DecryptionMaterial>,
}

impl MediaRequest {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            display_name: String::new(),
            mime_hint: None,
            decryption: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_mime_hint(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }

    pub fn with_decryption(mut self, material: DecryptionMaterial) -> Self {
        self.decryption = Some(material);
        self
    }
}

/// How a request participates in the fetch for its locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRole {
    /// Drives the fetch itself
    Driver,
    /// Joined a fetch already in flight
    Waiter(WaiterId),
    /// Failed validation, no fetch involved
    Rejected,
}

/// Receives the single terminal outcome of a request
#[derive(Debug)]
pub struct RequestHandle {
    locator: String,
    role: RequestRole,
    receiver: oneshot::Receiver<FetchOutcome>,
    registry: Arc<InFlightRegistry>,
}

impl RequestHandle {
    pub fn role(&self) -> RequestRole {
        self.role
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Wait for the outcome
    pub async fn outcome(self) -> FetchOutcome {
        self.receiver.await.unwrap_or_else(|_| Err(abandoned_error()))
    }

    /// Stop waiting.
    ///
    /// A waiter still queued is dropped from the registry and `true` is
    /// returned. A started fetch is never interrupted.
    pub fn cancel(self) -> bool {
        match self.role {
            RequestRole::Waiter(id) => self.registry.remove_waiter(&self.locator, id),
            RequestRole::Driver | RequestRole::Rejected => false,
        }
    }
}

fn abandoned_error() -> MediaCacheError {
    MediaCacheError::from(std::io::Error::other(
        "fetch task ended without reporting an outcome",
    ))
}

/// Owns a locator's in-flight entry on behalf of its driver task.
///
/// Settling it clears the entry, then notifies the driver, then every
/// waiter. If the driver task is dropped before settling (runtime shutdown,
/// aborted task) the guard settles with an I/O failure so the locator never
/// stays in flight.
struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    locator: String,
    driver: Option<oneshot::Sender<FetchOutcome>>,
}

impl InFlightGuard {
    fn new(
        registry: Arc<InFlightRegistry>,
        locator: String,
        driver: oneshot::Sender<FetchOutcome>,
    ) -> Self {
        Self {
            registry,
            locator,
            driver: Some(driver),
        }
    }

    fn settle(&mut self, outcome: FetchOutcome) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        // Cleared before anyone is notified so a follow-up request starts fresh
        let waiters = self.registry.complete(&self.locator);
        let _ = driver.send(outcome.clone());

        if !waiters.is_empty() {
            debug!(
                locator = %self.locator,
                count = waiters.len(),
                "Notifying waiters"
            );
        }
        for waiter in waiters {
            waiter.notify(outcome.clone());
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.driver.is_some() {
            warn!(locator = %self.locator, "Fetch task dropped before completing");
            self.settle(Err(abandoned_error()));
        }
    }
}

pub(crate) struct PipelineInner {
    pub(crate) store: CacheStore,
    pub(crate) registry: Arc<InFlightRegistry>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) decryptor: Arc<dyn Decryptor>,
    pub(crate) resolver: Arc<dyn AddressResolver>,
}

/// Deduplicating fetch-and-decrypt cache.
///
/// Cloning is cheap and clones share the registry and the cache.
#[derive(Clone)]
pub struct FetchPipeline {
    inner: Arc<PipelineInner>,
    state: StateQuery,
}

impl FetchPipeline {
    pub fn builder() -> FetchPipelineBuilder {
        FetchPipelineBuilder::new()
    }

    pub(crate) fn from_inner(inner: PipelineInner) -> Self {
        let state = StateQuery::new(inner.store.clone(), Arc::clone(&inner.registry));
        Self {
            inner: Arc::new(inner),
            state,
        }
    }

    /// Submit a request. Must be called within a tokio runtime; the work runs
    /// on a spawned task and the handle receives the outcome.
    pub fn request(&self, request: MediaRequest) -> RequestHandle {
        let (mut sender, receiver) = oneshot::channel();
        let registry = Arc::clone(&self.inner.registry);

        if request.locator.trim().is_empty() {
            let _ = sender.send(Err(MediaCacheError::InvalidRequest(
                "locator is missing".to_string(),
            )));
            return RequestHandle {
                locator: request.locator,
                role: RequestRole::Rejected,
                receiver,
                registry,
            };
        }

        let locator = request.locator.clone();
        loop {
            match registry.try_begin(&locator) {
                BeginOutcome::Started => {
                    let guard =
                        InFlightGuard::new(Arc::clone(&registry), locator.clone(), sender);
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(inner.drive(request, guard));
                    return RequestHandle {
                        locator,
                        role: RequestRole::Driver,
                        receiver,
                        registry,
                    };
                }
                BeginOutcome::AlreadyInFlight => match registry.add_waiter(&locator, sender) {
                    Ok(id) => {
                        debug!(locator = %locator, "Joined in-flight fetch");
                        return RequestHandle {
                            locator,
                            role: RequestRole::Waiter(id),
                            receiver,
                            registry,
                        };
                    }
                    // The driver finished between the two calls, start over
                    Err(returned) => sender = returned,
                },
            }
        }
    }

    /// Submit a request and wait for its outcome
    pub async fn fetch(&self, request: MediaRequest) -> FetchOutcome {
        self.request(request).outcome().await
    }

    pub async fn state_of(
        &self,
        locator: &str,
        mime_hint: Option<&str>,
        decryption: Option<&DecryptionMaterial>,
    ) -> CacheState {
        self.state.state_of(locator, mime_hint, decryption).await
    }

    pub async fn is_file_in_cache(
        &self,
        locator: &str,
        mime_hint: Option<&str>,
        decryption: Option<&DecryptionMaterial>,
    ) -> bool {
        self.state_of(locator, mime_hint, decryption).await == CacheState::Cached
    }

    pub fn state_query(&self) -> &StateQuery {
        &self.state
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    /// Bytes held by the raw partition
    pub async fn cache_size(&self) -> Result<u64> {
        self.inner.store.size_of(Partition::Raw).await
    }

    /// Bytes held by the clear partition
    pub async fn decrypted_cache_size(&self) -> Result<u64> {
        self.inner.store.size_of(Partition::Clear).await
    }

    /// Delete every fetched file. Decrypted files are kept.
    pub async fn clear_cache(&self) -> Result<()> {
        info!("Clearing fetched media cache");
        self.inner.store.wipe(Partition::Raw).await
    }

    /// Delete every decrypted file. Fetched files are kept.
    pub async fn clear_decrypted_cache(&self) -> Result<()> {
        info!("Clearing decrypted media cache");
        self.inner.store.wipe(Partition::Clear).await
    }
}

impl PipelineInner {
    async fn drive(self: Arc<Self>, request: MediaRequest, mut guard: InFlightGuard) {
        let outcome = AssertUnwindSafe(self.run(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(MediaCacheError::from(std::io::Error::other(
                    "fetch pipeline panicked",
                )))
            });

        match &outcome {
            Ok(file) => debug!(
                locator = %request.locator,
                path = ?file.path(),
                "Media available"
            ),
            Err(e) => warn!(
                locator = %request.locator,
                name = %request.display_name,
                error = %e,
                "Media request failed"
            ),
        }

        guard.settle(outcome);
    }

    async fn run(&self, request: &MediaRequest) -> FetchOutcome {
        let key = CacheNamer::key_for(&request.locator, request.mime_hint.as_deref());

        let raw = self.store.path_for(Partition::Raw, &key);
        let fetched = if self.store.exists(&raw).await {
            debug!(locator = %request.locator, key = %key, "Raw cache hit");
            raw
        } else {
            self.fetch_to_cache(request, &raw).await?
        };

        let Some(material) = &request.decryption else {
            return Ok(fetched);
        };

        let clear = self.store.path_for(Partition::Clear, &key);
        if self.store.exists(&clear).await {
            debug!(locator = %request.locator, key = %key, "Decrypted cache hit");
            return Ok(clear);
        }

        self.decrypt_to_cache(&fetched, &clear, material).await
    }

    async fn fetch_to_cache(&self, request: &MediaRequest, raw: &CachedFile) -> FetchOutcome {
        let address = self
            .resolver
            .resolve(&request.locator)
            .ok_or_else(|| MediaCacheError::ResolutionFailure(request.locator.clone()))?;

        info!(
            locator = %request.locator,
            name = %request.display_name,
            url = %address,
            "Fetching media"
        );

        let body = self.fetcher.fetch(&address).await?;
        let content_length = body.content_length;
        let mut stream = body.stream;

        let mut staged = self.store.begin_write(raw).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let copied = match chunk {
                Ok(chunk) => staged
                    .sink()
                    .write_all(&chunk)
                    .await
                    .map(|()| chunk.len())
                    .map_err(MediaCacheError::from),
                Err(e) => Err(e),
            };
            match copied {
                Ok(len) => written += len as u64,
                Err(e) => {
                    staged.abort().await;
                    return Err(e);
                }
            }
        }

        if content_length.is_some_and(|expected| expected != written) {
            warn!(
                locator = %request.locator,
                ?content_length,
                written,
                "Body length differs from declared content length"
            );
        }

        let file = staged.commit().await?;
        debug!(locator = %request.locator, bytes = written, path = ?file.path(), "Fetched into cache");
        Ok(file)
    }

    async fn decrypt_to_cache(
        &self,
        fetched: &CachedFile,
        clear: &CachedFile,
        material: &DecryptionMaterial,
    ) -> FetchOutcome {
        let mut input = BufReader::new(tokio::fs::File::open(fetched.path()).await?);
        let mut staged = self.store.begin_write(clear).await?;

        if let Err(e) = self
            .decryptor
            .decrypt(&mut input, material, staged.sink())
            .await
        {
            staged.abort().await;
            return Err(e);
        }

        let file = staged.commit().await?;
        debug!(key = %clear.key(), path = ?file.path(), "Decrypted into cache");
        Ok(file)
    }
}
