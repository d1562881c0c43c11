//! # Cache Store
//!
//! File-backed storage split into a raw partition (bytes as fetched) and a
//! clear partition (decrypted bytes). The directory listing is the index:
//! no metadata is kept besides the files themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs;
use tokio::io::{self, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::types::{CacheConfig, CacheKey, CachedFile, Partition};
use crate::error::Result;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Subdirectory of each partition holding in-progress writes. Skipped by
/// [`CacheStore::size_of`] and [`CacheStore::wipe`].
pub const STAGING_DIR_NAME: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct CacheStore {
    raw_dir: PathBuf,
    clear_dir: PathBuf,
    initialized: Arc<AtomicBool>,
}

impl CacheStore {
    /// Create a store for the configured root. Nothing is touched on disk
    /// until [`CacheStore::ensure_initialized`] or the first write.
    pub fn new(config: &CacheConfig) -> Self {
        let root = config.root();
        Self {
            raw_dir: root.join(&config.raw_dir_name),
            clear_dir: root.join(&config.clear_dir_name),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Initialize the partition directories
    pub async fn ensure_initialized(&self) -> io::Result<()> {
        // Fast path - already initialized
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        fs::create_dir_all(&self.raw_dir).await?;
        fs::create_dir_all(&self.clear_dir).await?;

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn partition_dir(&self, partition: Partition) -> &Path {
        match partition {
            Partition::Raw => &self.raw_dir,
            Partition::Clear => &self.clear_dir,
        }
    }

    /// Compose the location of a cache entry. No I/O.
    pub fn path_for(&self, partition: Partition, key: &CacheKey) -> CachedFile {
        let path = self.partition_dir(partition).join(key.as_str());
        CachedFile::new(partition, key.clone(), path)
    }

    /// Whether the entry is present. Unreadable metadata counts as absent.
    pub async fn exists(&self, file: &CachedFile) -> bool {
        match fs::metadata(file.path()).await {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = ?file.path(), error = %e, "Failed to stat cache file");
                false
            }
        }
    }

    pub fn staging_dir(&self, partition: Partition) -> PathBuf {
        self.partition_dir(partition).join(STAGING_DIR_NAME)
    }

    /// Open a staged writer for `file`.
    ///
    /// Content goes to a uniquely named temporary file in the partition's
    /// staging directory and only becomes visible at `file`'s path on
    /// [`StagedFile::commit`]. The temporary name does not embed the key, so
    /// any key that fits the filesystem can be staged.
    pub async fn begin_write(&self, file: &CachedFile) -> Result<StagedFile> {
        let staging = self.staging_dir(file.partition());
        fs::create_dir_all(&staging).await?;

        let temp_path = staging.join(format!("{}.part", Uuid::new_v4().simple()));
        let handle = fs::File::create(&temp_path).await.inspect_err(|e| {
            warn!(path = ?temp_path, error = %e, "Failed to create temporary cache file");
        })?;

        Ok(StagedFile {
            target: file.clone(),
            temp_path,
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, handle),
            finished: false,
        })
    }

    /// Total bytes of every file under the partition, by a full walk.
    /// In-progress writes are not counted.
    pub async fn size_of(&self, partition: Partition) -> Result<u64> {
        let mut total = 0u64;
        let staging = self.staging_dir(partition);
        let mut pending = vec![self.partition_dir(partition).to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    let path = entry.path();
                    if path != staging {
                        pending.push(path);
                    }
                } else {
                    total += meta.len();
                }
            }
        }

        Ok(total)
    }

    /// Remove everything under the partition except writes still in
    /// progress. The other partition is untouched.
    pub async fn wipe(&self, partition: Partition) -> Result<()> {
        let dir = self.partition_dir(partition);

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(dir).await?;
                return Ok(());
            }
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Failed to read cache directory");
                return Err(e.into());
            }
        };

        let mut entry_count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == STAGING_DIR_NAME {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
            entry_count += 1;
        }

        debug!(%partition, count = entry_count, "Cleared cache partition");
        Ok(())
    }
}

/// An in-progress write to the cache.
///
/// Error paths should call [`StagedFile::abort`]. Dropping it without
/// committing also deletes the temporary file, so failed writes never leave
/// anything visible to `exists`.
#[derive(Debug)]
pub struct StagedFile {
    target: CachedFile,
    temp_path: PathBuf,
    writer: BufWriter<fs::File>,
    finished: bool,
}

impl StagedFile {
    pub fn target(&self) -> &CachedFile {
        &self.target
    }

    /// The output sink receiving the content
    pub fn sink(&mut self) -> &mut BufWriter<fs::File> {
        &mut self.writer
    }

    /// Flush the content and move it to its final path.
    ///
    /// If another writer already produced the destination, the redundant
    /// content is discarded and the existing file is returned.
    pub async fn commit(mut self) -> Result<CachedFile> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;

        let dest = self.target.path();
        if fs::try_exists(dest).await.unwrap_or(false) {
            debug!(path = ?dest, "Cache entry already present, discarding redundant write");
            let target = self.target.clone();
            self.abort().await;
            return Ok(target);
        }

        if let Err(e) = fs::rename(&self.temp_path, dest).await {
            warn!(
                from = ?self.temp_path,
                to = ?dest,
                error = %e,
                "Failed to rename temporary cache file"
            );
            return Err(e.into());
        }

        self.finished = true;
        Ok(self.target.clone())
    }

    /// Discard the content and remove the temporary file
    pub async fn abort(mut self) {
        self.finished = true;
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => debug!(path = ?self.temp_path, "Rolled back staged cache write"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = ?self.temp_path, error = %e, "Failed to remove temporary cache file")
            }
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Reached when the owning task is cancelled mid-write. Drop cannot
        // await, so the single unlink runs on the current thread.
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(path = ?self.temp_path, "Rolled back staged cache write"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = ?self.temp_path, error = %e, "Failed to remove temporary cache file")
            }
        }
    }
}
