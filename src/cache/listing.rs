//! Listing Cache Implementation
//!
//! Short-lived cache for folder and image listings using Moka, so browsing a
//! folder repeatedly does not page through the bucket every time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::gallery::image::{Folder, ImageInfo};

/// Default TTL for both listings
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(300);

/// Listing cache with TTL support
///
/// Provides separate caches for:
/// - The folder list (single entry)
/// - Image listings by folder
pub struct ListingCache {
    folders: Cache<(), Vec<Folder>>,
    images: Cache<Folder, Vec<ImageInfo>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_LISTING_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let folders = Cache::builder()
            .time_to_live(ttl)
            .name("folder_listing_cache")
            .build();

        let images = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(1024)
            .name("image_listing_cache")
            .build();

        Self {
            folders,
            images,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn record<T>(&self, found: Option<T>, what: &str) -> Option<T> {
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(what, "Listing cache HIT");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(what, "Listing cache MISS");
        }
        found
    }

    pub fn get_folders(&self) -> Option<Vec<Folder>> {
        self.record(self.folders.get(&()), "folders")
    }

    pub fn insert_folders(&self, folders: Vec<Folder>) {
        debug!(count = folders.len(), "Cached folder listing");
        self.folders.insert((), folders);
    }

    pub fn get_images(&self, folder: &Folder) -> Option<Vec<ImageInfo>> {
        self.record(self.images.get(folder), folder.as_str())
    }

    pub fn insert_images(&self, folder: Folder, images: Vec<ImageInfo>) {
        debug!(folder = %folder, count = images.len(), "Cached image listing");
        self.images.insert(folder, images);
    }

    /// Drop a folder's image listing, and the folder list (it may be new)
    pub fn invalidate_folder(&self, folder: &Folder) {
        self.images.invalidate(folder);
        self.folders.invalidate(&());
        debug!(folder = %folder, "Invalidated listing cache for folder");
    }

    /// Clear all listings
    pub fn clear(&self) {
        self.folders.invalidate_all();
        self.images.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Cleared listing cache");
    }

    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }
}

impl Default for ListingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> ImageInfo {
        ImageInfo {
            filename: format!("{name}.webp"),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_hit_miss_counters() {
        let cache = ListingCache::new();
        let trip = Folder::parse("trip").unwrap();

        assert!(cache.get_images(&trip).is_none());
        cache.insert_images(trip.clone(), vec![image("beach")]);
        assert_eq!(cache.get_images(&trip).unwrap().len(), 1);

        let (hits, misses, hit_rate) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(hit_rate > 49.0 && hit_rate < 51.0);
    }

    #[test]
    fn test_invalidate_folder_drops_folder_list() {
        let cache = ListingCache::new();
        let trip = Folder::parse("trip").unwrap();
        cache.insert_folders(vec![trip.clone()]);
        cache.insert_images(trip.clone(), vec![image("beach")]);

        cache.invalidate_folder(&trip);
        assert!(cache.get_folders().is_none());
        assert!(cache.get_images(&trip).is_none());
    }

    #[test]
    fn test_clear() {
        let cache = ListingCache::new();
        let trip = Folder::parse("trip").unwrap();
        cache.insert_folders(vec![trip.clone()]);
        cache.get_folders();

        cache.clear();
        assert!(cache.get_folders().is_none());
        let (hits, misses, _) = cache.stats();
        assert_eq!((hits, misses), (0, 1));
    }
}
