//! Configuration loading
//!
//! Settings come from a TOML file; credentials and the endpoint can be
//! overridden from the environment so they need not live on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::gallery::image::PreviewNameFormat;
use crate::gallery::transcode::TranscodeOptions;
use crate::s3::types::{ConnectionConfig, StoreSettings};

pub const ENV_ACCESS_KEY_ID: &str = "S3IMG_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "S3IMG_SECRET_ACCESS_KEY";
pub const ENV_ENDPOINT: &str = "S3IMG_ENDPOINT";

/// Top-level settings file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub connection: ConnectionConfig,
    pub bucket: String,
    /// Key prefix in front of every folder (e.g. "images/")
    #[serde(default = "default_images_prefix")]
    pub images_prefix: String,
    /// Base URL the bucket is publicly served from
    pub public_url_base: String,
    /// Longest edge of stored originals
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    /// Preview basename pattern with exactly one `%s`
    #[serde(default = "default_preview_name_format")]
    pub preview_name_format: String,
    #[serde(default = "default_preview_height")]
    pub preview_height: u32,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    /// Override for the cache root (default: platform cache dir)
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            root: None,
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_images_prefix() -> String {
    "images/".to_string()
}

fn default_max_image_dimension() -> u32 {
    2048
}

fn default_preview_name_format() -> String {
    "%s-240".to_string()
}

fn default_preview_height() -> u32 {
    240
}

fn default_max_age_days() -> u64 {
    30
}

impl Settings {
    /// Default settings file location (`<config dir>/s3img/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("s3img").join("config.toml"))
    }

    /// Load from `path` (or the default location), apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()
                .ok_or_else(|| anyhow!("No config directory on this platform; pass --config"))?,
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut settings = Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse settings")
    }

    /// Override credentials and endpoint from environment-like lookups
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key_id) = lookup(ENV_ACCESS_KEY_ID) {
            self.connection.access_key_id = key_id;
        }
        if let Some(secret) = lookup(ENV_SECRET_ACCESS_KEY) {
            self.connection.secret_access_key = secret;
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.connection.endpoint = Some(endpoint);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            bail!("bucket must not be empty");
        }
        let base = self.public_url_base.to_ascii_lowercase();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            bail!("public_url_base must be an http(s) URL: '{}'", self.public_url_base);
        }
        if !self.images_prefix.is_empty() && !self.images_prefix.ends_with('/') {
            bail!("images_prefix must be empty or end with '/': '{}'", self.images_prefix);
        }
        if self.max_image_dimension == 0 || self.preview_height == 0 {
            bail!("max_image_dimension and preview_height must be positive");
        }
        PreviewNameFormat::parse(&self.preview_name_format)?;
        Ok(())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            connection: self.connection.clone(),
            bucket: self.bucket.clone(),
            key_prefix: self.images_prefix.clone(),
        }
    }

    pub fn transcode_options(&self) -> TranscodeOptions {
        TranscodeOptions {
            max_dimension: self.max_image_dimension,
            preview_height: self.preview_height,
        }
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.max_age_days.saturating_mul(24 * 60 * 60))
    }
}
