//! Local File Cache
//!
//! Caches full-size images on local disk at `root/<folder>/<name>.webp` so they
//! are not downloaded again from the public URL. Populated on read misses and on
//! upload (write-through). Entries older than the maximum age are removed by a
//! sweep that runs after every write-through.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetch::SourceFetcher;
use super::sweep::{sweep_dir, SweepReport, DEFAULT_MAX_AGE};
use crate::gallery::image::{Folder, ImageInfo};
use crate::gallery::urls::{PublicUrls, PREVIEW_EXTENSION};

/// Suffix of in-progress writes; leftovers are removed at initialization
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Image cache used before initialization")]
    Uninitialized,

    #[error("Image not found at {url}: {reason}")]
    NotFound { url: String, reason: String },

    #[error("Cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read-through / write-through disk cache for full-size images
pub struct LocalCacheStore {
    /// Set once by `initialize`
    root: OnceLock<PathBuf>,
    /// Entries older than this are swept
    max_age: Duration,
    fetcher: Arc<dyn SourceFetcher>,
    urls: RwLock<PublicUrls>,
    /// One lock per entry path; collapses concurrent misses for the same image
    inflight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    /// Writers hold this shared; the sweep holds it exclusively
    gate: tokio::sync::RwLock<()>,
}

impl LocalCacheStore {
    /// Create an uninitialized cache
    ///
    /// # Arguments
    /// * `fetcher` - Downloads originals on a read miss
    /// * `urls` - Public URL scheme used to locate originals
    ///
    /// Call [`LocalCacheStore::initialize`] before any other operation.
    pub fn new(fetcher: Arc<dyn SourceFetcher>, urls: PublicUrls) -> Self {
        Self {
            root: OnceLock::new(),
            max_age: DEFAULT_MAX_AGE,
            fetcher,
            urls: RwLock::new(urls),
            inflight: Mutex::new(HashMap::new()),
            gate: tokio::sync::RwLock::new(()),
        }
    }

    /// Override the eviction age (default: 30 days)
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Default cache root for a bucket (`<cache dir>/s3img/<bucket>`)
    pub fn default_root(bucket: &str) -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("s3img")
            .join(bucket)
    }

    /// Create the cache root. Must run once before any other operation.
    pub async fn initialize(&self, root: PathBuf) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| CacheError::io(&root, e))?;

        let removed = remove_stale_temp_files(&root).await;

        if self.root.set(root.clone()).is_err() {
            warn!(root = %root.display(), "Image cache already initialized, keeping first root");
            return Ok(());
        }

        info!(
            cache_dir = %root.display(),
            max_age_days = self.max_age.as_secs() / 86_400,
            stale_temp_files = removed,
            "Image cache initialized"
        );
        Ok(())
    }

    pub fn root(&self) -> Result<&Path, CacheError> {
        self.root
            .get()
            .map(PathBuf::as_path)
            .ok_or(CacheError::Uninitialized)
    }

    /// Replace the public URL base used for misses
    pub fn set_public_urls(&self, urls: PublicUrls) {
        *self.urls.write() = urls;
    }

    /// Deterministic location of an entry
    pub fn entry_path(&self, folder: &Folder, image: &ImageInfo) -> Result<PathBuf, CacheError> {
        Ok(self
            .root()?
            .join(folder.as_str())
            .join(format!("{}.{}", image.name, PREVIEW_EXTENSION)))
    }

    /// Path to the cached bytes, fetching through the public URL on a miss
    ///
    /// # Arguments
    /// * `folder` - Folder the image lives in
    /// * `image` - Image to resolve
    ///
    /// # Returns
    /// Local path of the full-size image. A miss does not trigger a sweep.
    pub async fn get_cached_path(
        &self,
        folder: &Folder,
        image: &ImageInfo,
    ) -> Result<PathBuf, CacheError> {
        let path = self.entry_path(folder, image)?;

        // Check cache first
        if self.is_cached(&path).await {
            debug!(path = %path.display(), "Image cache HIT");
            return Ok(path);
        }

        // Cache miss - one download per path
        let key_lock = self.key_lock(&path);
        let result = {
            let _guard = key_lock.lock().await;
            // Another caller may have filled it while we waited
            if self.is_cached(&path).await {
                debug!(path = %path.display(), "Image cache HIT after wait");
                Ok(path.clone())
            } else {
                self.fetch_and_store(folder, image, &path).await
            }
        };
        self.release_key_lock(&path, key_lock);
        result
    }

    async fn fetch_and_store(
        &self,
        folder: &Folder,
        image: &ImageInfo,
        path: &Path,
    ) -> Result<PathBuf, CacheError> {
        let url = self.urls.read().original_url(folder, image);

        debug!(path = %path.display(), url = %url, "Image cache MISS, downloading");
        let bytes = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| CacheError::NotFound {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        self.store(path, bytes).await?;
        Ok(path.to_path_buf())
    }

    /// Seed the cache after a successful upload, then sweep expired entries
    ///
    /// # Returns
    /// Path of the stored entry
    pub async fn write_through(
        &self,
        folder: &Folder,
        image: &ImageInfo,
        bytes: Bytes,
    ) -> Result<PathBuf, CacheError> {
        let path = self.entry_path(folder, image)?;

        let key_lock = self.key_lock(&path);
        let stored = {
            let _guard = key_lock.lock().await;
            self.store(&path, bytes).await
        };
        self.release_key_lock(&path, key_lock);
        stored?;

        match self.sweep(&CancellationToken::new()).await {
            Ok(report) if !report.errors.is_empty() => {
                warn!(errors = report.errors.len(), "Cache sweep finished with errors");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Cache sweep failed"),
        }

        Ok(path)
    }

    /// Remove entries older than the maximum age and prune empty folders
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepReport, CacheError> {
        let root = self.root()?.to_path_buf();
        let max_age = self.max_age;
        let cancel = cancel.clone();

        let _exclusive = self.gate.write().await;
        let sweep_root = root.clone();
        let report = tokio::task::spawn_blocking(move || {
            sweep_dir(&sweep_root, SystemTime::now(), max_age, &cancel)
        })
        .await
        .map_err(|e| CacheError::io(&root, io::Error::other(e)))?
        .map_err(|e| CacheError::io(&root, e))?;

        info!(
            files_removed = report.files_removed,
            dirs_removed = report.dirs_removed,
            errors = report.errors.len(),
            cancelled = report.cancelled,
            root_empty = report.root_empty,
            "Cache sweep complete"
        );
        Ok(report)
    }

    /// Write an entry atomically (temp file + rename in the same directory)
    async fn store(&self, path: &Path, bytes: Bytes) -> Result<(), CacheError> {
        let _shared = self.gate.read().await;
        let target = path.to_path_buf();
        let size = bytes.len();

        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| CacheError::io(path, io::Error::other(e)))??;

        debug!(path = %path.display(), size, "Stored image in cache");
        Ok(())
    }

    /// Existence check that never overlaps a running sweep
    async fn is_cached(&self, path: &Path) -> bool {
        let _shared = self.gate.read().await;
        is_file(path).await
    }

    fn key_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self.inflight.lock();
        Arc::clone(inflight.entry(path.to_path_buf()).or_default())
    }

    fn release_key_lock(&self, path: &Path, key_lock: Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock();
        // Only the map and this caller still hold it
        if Arc::strong_count(&key_lock) == 2 {
            inflight.remove(path);
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let parent = path
        .parent()
        .ok_or_else(|| CacheError::io(path, io::Error::other("cache entry has no parent")))?;
    std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| CacheError::io(parent, e))?;
    tmp.write_all(data).map_err(|e| CacheError::io(path, e))?;
    tmp.persist(path).map_err(|e| CacheError::io(path, e.error))?;
    Ok(())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Clean up temp files left in folder directories by interrupted writes
async fn remove_stale_temp_files(root: &Path) -> usize {
    let mut removed = 0;
    let Ok(mut folders) = tokio::fs::read_dir(root).await else {
        return 0;
    };
    while let Ok(Some(folder)) = folders.next_entry().await {
        let Ok(mut entries) = tokio::fs::read_dir(folder.path()).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX));
            if is_temp && tokio::fs::remove_file(&path).await.is_ok() {
                debug!(path = %path.display(), "Removed stale temp file");
                removed += 1;
            }
        }
    }
    removed
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::fetch::FetchError;
    use crate::cache::sweep::tests::write_file;
    use crate::gallery::image::PreviewNameFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed bytes (or a status) and counts calls
    pub(crate) struct StubFetcher {
        pub body: Option<Bytes>,
        pub calls: AtomicUsize,
        pub urls: Mutex<Vec<String>>,
        pub delay: Duration,
    }

    impl StubFetcher {
        pub(crate) fn ok(body: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                body: Some(Bytes::from_static(body)),
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn not_found() -> Arc<Self> {
            Arc::new(Self {
                body: None,
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl SourceFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().push(url.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.body.clone().ok_or(FetchError::Status(404))
        }
    }

    pub(crate) fn urls() -> PublicUrls {
        PublicUrls::new(
            "https://assets.example.cc",
            "images/",
            PreviewNameFormat::parse("%s-240").unwrap(),
        )
    }

    fn beach() -> (Folder, ImageInfo) {
        (
            Folder::parse("trip").unwrap(),
            ImageInfo {
                filename: "beach.800x600.webp".to_string(),
                name: "beach".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_uninitialized_cache_fails() {
        let cache = LocalCacheStore::new(StubFetcher::ok(b"x"), urls());
        let (folder, image) = beach();
        assert!(matches!(
            cache.get_cached_path(&folder, &image).await,
            Err(CacheError::Uninitialized)
        ));
        assert!(matches!(
            cache.write_through(&folder, &image, Bytes::new()).await,
            Err(CacheError::Uninitialized)
        ));
        assert!(matches!(
            cache.sweep(&CancellationToken::new()).await,
            Err(CacheError::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn test_read_through_fetches_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::ok(b"webp-bytes");
        let cache = LocalCacheStore::new(fetcher.clone(), urls());
        cache.initialize(dir.path().to_path_buf()).await.unwrap();
        let (folder, image) = beach();

        let first = cache.get_cached_path(&folder, &image).await.unwrap();
        assert_eq!(first, dir.path().join("trip").join("beach.webp"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fetcher.urls.lock()[0],
            "https://assets.example.cc/images/trip/beach.800x600.webp"
        );

        let second = cache.get_cached_path(&folder, &image).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&second).unwrap(), b"webp-bytes");
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCacheStore::new(StubFetcher::not_found(), urls());
        cache.initialize(dir.path().to_path_buf()).await.unwrap();
        let (folder, image) = beach();

        let err = cache.get_cached_path(&folder, &image).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
        assert!(!dir.path().join("trip/beach.webp").exists());
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher {
            body: Some(Bytes::from_static(b"slow")),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            delay: Duration::from_millis(50),
        });
        let cache = LocalCacheStore::new(fetcher.clone(), urls());
        cache.initialize(dir.path().to_path_buf()).await.unwrap();
        let (folder, image) = beach();

        let (a, b) = tokio::join!(
            cache.get_cached_path(&folder, &image),
            cache.get_cached_path(&folder, &image)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_write_through_seeds_and_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::ok(b"from-network");
        let cache = LocalCacheStore::new(fetcher.clone(), urls());
        cache.initialize(dir.path().to_path_buf()).await.unwrap();
        let stale = dir.path().join("old/stale.webp");
        write_file(&stale, DEFAULT_MAX_AGE + Duration::from_secs(3600));

        let (folder, image) = beach();
        let path = cache
            .write_through(&folder, &image, Bytes::from_static(b"uploaded"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"uploaded");
        assert!(!stale.exists());
        assert!(!dir.path().join("old").exists());

        let served = cache.get_cached_path(&folder, &image).await.unwrap();
        assert_eq!(served, path);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_through_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCacheStore::new(StubFetcher::ok(b""), urls());
        cache.initialize(dir.path().to_path_buf()).await.unwrap();
        let (folder, image) = beach();

        cache.write_through(&folder, &image, Bytes::from_static(b"v1")).await.unwrap();
        let path = cache.write_through(&folder, &image, Bytes::from_static(b"v2")).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_read_miss_does_not_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCacheStore::new(StubFetcher::ok(b"x"), urls());
        cache.initialize(dir.path().to_path_buf()).await.unwrap();
        let stale = dir.path().join("old/stale.webp");
        write_file(&stale, DEFAULT_MAX_AGE * 2);

        let (folder, image) = beach();
        cache.get_cached_path(&folder, &image).await.unwrap();
        assert!(stale.exists());
    }

    #[tokio::test]
    async fn test_hit_waits_for_running_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::ok(b"x");
        let cache = Arc::new(LocalCacheStore::new(fetcher.clone(), urls()));
        cache.initialize(dir.path().to_path_buf()).await.unwrap();
        let (folder, image) = beach();
        write_file(&dir.path().join("trip/beach.webp"), Duration::ZERO);

        // Hold the gate the way a sweep does
        let sweeping = cache.gate.write().await;
        let reader = {
            let cache = Arc::clone(&cache);
            let (folder, image) = (folder.clone(), image.clone());
            tokio::spawn(async move { cache.get_cached_path(&folder, &image).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        drop(sweeping);
        let path = reader.await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("trip/beach.webp"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initialize_removes_temp_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir.path().join("trip/.abc123.tmp");
        write_file(&leftover, Duration::ZERO);
        let kept = dir.path().join("trip/beach.webp");
        write_file(&kept, Duration::ZERO);

        let cache = LocalCacheStore::new(StubFetcher::ok(b"x"), urls());
        cache.initialize(dir.path().to_path_buf()).await.unwrap();

        assert!(!leftover.exists());
        assert!(kept.exists());
    }
}
