//! s3img - folder-organized image library on S3-compatible storage
//!
//! Uploads originals and previews to a bucket, lists folders and images,
//! and keeps full-size images in a local disk cache.

pub mod cache;
pub mod config;
pub mod gallery;
pub mod s3;
