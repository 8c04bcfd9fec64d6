//! Local caching layer
//!
//! - `file_cache`: image bytes on disk, read-through and write-through
//! - `sweep`: age-based eviction of the disk cache
//! - `listing`: short-TTL in-memory folder/image listings

pub mod fetch;
pub mod file_cache;
pub mod listing;
pub mod sweep;

pub use fetch::{FetchError, HttpFetcher, SourceFetcher};
pub use file_cache::{CacheError, LocalCacheStore};
pub use listing::ListingCache;
pub use sweep::{SweepReport, DEFAULT_MAX_AGE};
