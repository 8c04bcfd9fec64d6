//! Gallery Service - ties the object store, transcoder and caches together
//!
//! Lists folders and images, uploads batches of images (original + preview),
//! and resolves public and cached locations for existing images.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::embed::parse_image_embed;
use super::image::{parse_image_info, Folder, ImageError, ImageInfo, PreviewNameFormat};
use super::transcode::{ImageTranscoder, TranscodeError, TranscodeOptions, WEBP_CONTENT_TYPE};
use super::urls::{PublicUrls, PREVIEW_EXTENSION};
use crate::cache::{CacheError, ListingCache, LocalCacheStore, SourceFetcher, SweepReport};
use crate::config::Settings;
use crate::s3::{ObjectStoreClient, StoreError, TransportFactory};

/// Upper bound on keys (originals and previews together) listed per folder
pub const MAX_KEYS_PER_FOLDER: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl GalleryError {
    pub fn user_message(&self) -> String {
        match self {
            GalleryError::Store(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// One file handed to `upload_images`
#[derive(Debug, Clone)]
pub struct UploadSource {
    /// Name of the source file; its base becomes the image name
    pub filename: String,
    pub bytes: Bytes,
}

/// Per-item result of a batch upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { filename: String, image: ImageInfo },
    Failed { filename: String, message: String },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }
}

/// Settings-derived state, swapped as a whole on reconfiguration
#[derive(Debug, Clone)]
struct ServiceState {
    bucket: String,
    images_prefix: String,
    urls: PublicUrls,
    transcode: TranscodeOptions,
}

impl ServiceState {
    fn from_settings(settings: &Settings) -> Result<Self, GalleryError> {
        let format = PreviewNameFormat::parse(&settings.preview_name_format)?;
        Ok(Self {
            bucket: settings.bucket.clone(),
            images_prefix: settings.images_prefix.clone(),
            urls: PublicUrls::new(&settings.public_url_base, &settings.images_prefix, format),
            transcode: settings.transcode_options(),
        })
    }
}

pub struct GalleryService {
    store: ObjectStoreClient,
    cache: LocalCacheStore,
    listings: ListingCache,
    transcoder: Arc<dyn ImageTranscoder>,
    state: RwLock<ServiceState>,
    cache_root: PathBuf,
}

impl GalleryService {
    /// Build the service from settings
    ///
    /// # Arguments
    /// * `settings` - Validated settings
    /// * `factory` - Builds the object store transport
    /// * `fetcher` - Downloads originals on cache misses
    /// * `transcoder` - Produces the WebP original and preview
    ///
    /// The cache root is not created until [`GalleryService::initialize`].
    pub fn new(
        settings: &Settings,
        factory: Arc<dyn TransportFactory>,
        fetcher: Arc<dyn SourceFetcher>,
        transcoder: Arc<dyn ImageTranscoder>,
    ) -> Result<Self, GalleryError> {
        let state = ServiceState::from_settings(settings)?;
        let cache = LocalCacheStore::new(fetcher, state.urls.clone())
            .with_max_age(settings.cache_max_age());
        let cache_root = settings
            .cache
            .root
            .clone()
            .unwrap_or_else(|| LocalCacheStore::default_root(&settings.bucket));

        Ok(Self {
            store: ObjectStoreClient::new(settings.store_settings(), factory),
            cache,
            listings: ListingCache::new(),
            transcoder,
            state: RwLock::new(state),
            cache_root,
        })
    }

    /// Create the on-disk cache root; call once at startup
    pub async fn initialize(&self) -> Result<(), GalleryError> {
        self.cache.initialize(self.cache_root.clone()).await?;
        Ok(())
    }

    fn state(&self) -> ServiceState {
        self.state.read().clone()
    }

    /// Swap in new settings; rebuilds the transport only if the connection changed
    pub fn apply_settings(&self, settings: &Settings) -> Result<(), GalleryError> {
        let state = ServiceState::from_settings(settings)?;
        self.store.update_settings(settings.store_settings());
        self.cache.set_public_urls(state.urls.clone());
        *self.state.write() = state;

        let (hits, misses, hit_rate) = self.listings.stats();
        self.listings.clear();
        info!(
            bucket = %settings.bucket,
            listing_hits = hits,
            listing_misses = misses,
            listing_hit_rate = hit_rate,
            "Gallery settings applied"
        );
        Ok(())
    }

    pub async fn test_connection(&self) -> Result<(), StoreError> {
        self.store.test_connection().await
    }

    /// Folders under the images prefix; names that fail validation are skipped
    pub async fn list_folders(&self, cancel: &CancellationToken) -> Result<Vec<Folder>, GalleryError> {
        if let Some(folders) = self.listings.get_folders() {
            return Ok(folders);
        }

        let state = self.state();
        let prefixes = self
            .store
            .list_directories(&state.bucket, &state.images_prefix, cancel)
            .await?;

        let folders: Vec<Folder> = prefixes
            .iter()
            .filter_map(|p| p.strip_prefix(state.images_prefix.as_str()))
            .map(|p| p.trim_end_matches('/'))
            .filter_map(|name| match Folder::parse(name) {
                Ok(folder) => Some(folder),
                Err(e) => {
                    debug!(error = %e, "Skipping folder");
                    None
                }
            })
            .collect();

        self.listings.insert_folders(folders.clone());
        Ok(folders)
    }

    /// Originals in a folder; previews and unparseable keys are skipped
    pub async fn list_images(
        &self,
        folder: &Folder,
        cancel: &CancellationToken,
    ) -> Result<Vec<ImageInfo>, GalleryError> {
        if let Some(images) = self.listings.get_images(folder) {
            return Ok(images);
        }

        let state = self.state();
        let prefix = state.urls.folder_prefix(folder);
        let keys = self
            .store
            .list_keys(&state.bucket, &prefix, MAX_KEYS_PER_FOLDER, cancel)
            .await?;

        let format = state.urls.preview_format();
        let images: Vec<ImageInfo> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .filter(|basename| !format.is_preview_filename(basename))
            .filter_map(parse_image_info)
            .collect();

        self.listings.insert_images(folder.clone(), images.clone());
        Ok(images)
    }

    /// Upload a batch, strictly in order. A failed item never aborts the batch.
    pub async fn upload_images(&self, folder: &Folder, sources: Vec<UploadSource>) -> Vec<UploadOutcome> {
        let mut outcomes = Vec::with_capacity(sources.len());

        for source in sources {
            let outcome = match self.upload_one(folder, &source).await {
                Ok(image) => UploadOutcome::Uploaded {
                    filename: source.filename,
                    image,
                },
                Err(e) => {
                    warn!(folder = %folder, source = %source.filename, error = %e, "Upload failed");
                    UploadOutcome::Failed {
                        filename: source.filename,
                        message: e.user_message(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        self.listings.invalidate_folder(folder);
        let uploaded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(folder = %folder, uploaded, failed = outcomes.len() - uploaded, "Upload batch complete");
        outcomes
    }

    async fn upload_one(&self, folder: &Folder, source: &UploadSource) -> Result<ImageInfo, GalleryError> {
        // Name comes from the source filename without its extension
        let name = parse_image_info(&source.filename)
            .ok_or_else(|| ImageError::InvalidFilename(source.filename.clone()))?
            .name;
        let state = self.state();

        let transcoder = Arc::clone(&self.transcoder);
        let input = source.bytes.clone();
        let options = state.transcode;
        let transcoded = tokio::task::spawn_blocking(move || transcoder.transcode(&input, options))
            .await
            .map_err(|e| GalleryError::Task(e.to_string()))??;

        let image = ImageInfo::with_size(&name, transcoded.width, transcoded.height, PREVIEW_EXTENSION);
        let metadata = upload_metadata(source, &transcoded.original, transcoded.width, transcoded.height);

        self.store
            .write_object(
                &state.bucket,
                &state.urls.original_key(folder, &image),
                transcoded.original.clone(),
                WEBP_CONTENT_TYPE,
                metadata.clone(),
            )
            .await?;
        self.store
            .write_object(
                &state.bucket,
                &state.urls.preview_key(folder, &image),
                transcoded.preview,
                WEBP_CONTENT_TYPE,
                metadata,
            )
            .await?;

        // The upload already succeeded; a cache failure only costs a later fetch
        if let Err(e) = self.cache.write_through(folder, &image, transcoded.original).await {
            warn!(folder = %folder, image = %image.name, error = %e, "Cache write-through failed");
        }

        info!(folder = %folder, file = %image.filename, "Image uploaded");
        Ok(image)
    }

    pub fn original_url(&self, folder: &Folder, image: &ImageInfo) -> String {
        self.state.read().urls.original_url(folder, image)
    }

    pub fn preview_url(&self, folder: &Folder, image: &ImageInfo) -> String {
        self.state.read().urls.preview_url(folder, image)
    }

    /// Preview URL for the first `{% image "URL" %}` embed in `text`
    pub fn preview_url_for_embed(&self, text: &str) -> Option<String> {
        let embed = parse_image_embed(text)?;
        Some(self.preview_url(&embed.folder, &embed.image))
    }

    /// Local path of the full image, downloading it on first use
    pub async fn cached_image(&self, folder: &Folder, image: &ImageInfo) -> Result<PathBuf, GalleryError> {
        Ok(self.cache.get_cached_path(folder, image).await?)
    }

    pub async fn sweep_cache(&self, cancel: &CancellationToken) -> Result<SweepReport, GalleryError> {
        Ok(self.cache.sweep(cancel).await?)
    }
}

/// User metadata stored with both renditions
fn upload_metadata(source: &UploadSource, original: &[u8], width: u32, height: u32) -> HashMap<String, String> {
    let mut hasher = Sha1::new();
    hasher.update(original);
    let hash = format!("{:x}", hasher.finalize());

    HashMap::from([
        ("width".to_string(), width.to_string()),
        ("height".to_string(), height.to_string()),
        ("sha1".to_string(), hash),
        (
            "source-filename".to_string(),
            urlencoding::encode(&source.filename).into_owned(),
        ),
    ])
}
