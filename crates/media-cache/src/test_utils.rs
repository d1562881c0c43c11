use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, Semaphore};
use url::Url;

use crate::decryption::{AttachmentDecryptor, DecryptionMaterial, Decryptor};
use crate::error::{MediaCacheError, Result};
use crate::fetcher::{FetchedBody, Fetcher};

/// Macro to initialize tracing for tests
///
/// Usage:
/// - `init_test_tracing!()` - uses DEBUG level (default)
/// - `init_test_tracing!(INFO)` - uses specified level
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        $crate::init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

pub use crate::init_test_tracing;

/// Encrypt `plaintext` the way attachments are encrypted, with a fixed key.
pub fn encrypt_attachment(plaintext: &[u8]) -> (Vec<u8>, DecryptionMaterial) {
    let key = [0x42u8; 32];
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);

    let mut ciphertext = plaintext.to_vec();
    let mut cipher = ctr::Ctr128BE::<aes::Aes256>::new(&key.into(), &iv.into());
    cipher.apply_keystream(&mut ciphertext);

    let hash = Sha256::digest(&ciphertext);
    let material = DecryptionMaterial::a256ctr(
        URL_SAFE_NO_PAD.encode(key),
        STANDARD_NO_PAD.encode(iv),
        STANDARD_NO_PAD.encode(hash),
    );
    (ciphertext, material)
}

/// Fetcher returning a fixed body, optionally held until released.
pub struct MockFetcher {
    body: Vec<u8>,
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    gate: Option<Semaphore>,
    started: Notify,
}

impl MockFetcher {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            gate: None,
            started: Notify::new(),
        }
    }

    /// Every fetch waits for [`MockFetcher::release`] before answering
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// The next `count` fetches fail with a transport error
    pub fn failing(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(fetches);
        }
    }

    /// Resolves once a fetch has been entered
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, address: &Url) -> Result<FetchedBody> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| MediaCacheError::FetchFailure(e.to_string()))?
                .forget();
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(MediaCacheError::FetchFailure(format!(
                "connection reset fetching {address}"
            )));
        }

        Ok(FetchedBody::from_bytes(self.body.clone()))
    }
}

/// [`AttachmentDecryptor`] that counts its invocations
#[derive(Default)]
pub struct CountingDecryptor {
    calls: AtomicUsize,
}

impl CountingDecryptor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decryptor for CountingDecryptor {
    async fn decrypt(
        &self,
        input: &mut (dyn AsyncRead + Unpin + Send),
        material: &DecryptionMaterial,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        AttachmentDecryptor.decrypt(input, material, output).await
    }
}
