//! # Cache State
//!
//! Read-only view combining what is on disk with what is in flight.

use std::sync::Arc;

use crate::cache::{CacheNamer, CacheStore, CachedFile, Partition};
use crate::decryption::DecryptionMaterial;
use crate::registry::InFlightRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Neither on disk nor being fetched
    Unknown,
    /// A fetch for the locator is underway
    Fetching,
    /// The usable file is on disk
    Cached,
}

#[derive(Debug, Clone)]
pub struct StateQuery {
    store: CacheStore,
    registry: Arc<InFlightRegistry>,
}

impl StateQuery {
    pub fn new(store: CacheStore, registry: Arc<InFlightRegistry>) -> Self {
        Self { store, registry }
    }

    /// The file a request would hand back: the clear entry when decryption
    /// material is given, the raw entry otherwise.
    pub fn effective_file(
        &self,
        locator: &str,
        mime_hint: Option<&str>,
        decryption: Option<&DecryptionMaterial>,
    ) -> CachedFile {
        let partition = if decryption.is_some() {
            Partition::Clear
        } else {
            Partition::Raw
        };
        self.store
            .path_for(partition, &CacheNamer::key_for(locator, mime_hint))
    }

    pub async fn state_of(
        &self,
        locator: &str,
        mime_hint: Option<&str>,
        decryption: Option<&DecryptionMaterial>,
    ) -> CacheState {
        let file = self.effective_file(locator, mime_hint, decryption);
        if self.store.exists(&file).await {
            CacheState::Cached
        } else if self.registry.is_in_flight(locator) {
            CacheState::Fetching
        } else {
            CacheState::Unknown
        }
    }
}
