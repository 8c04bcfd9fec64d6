//! S3 request/response types shared by the client and its transports

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::Deserialize;

/// Everything that determines how the transport connects.
///
/// A change in any field invalidates the cached transport. Compared by value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    /// Custom endpoint for S3-compatible providers (None = AWS default)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    /// Path-style addressing (`endpoint/bucket/key`)
    #[serde(default = "default_path_style")]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_path_style() -> bool {
    true
}

impl ConnectionConfig {
    /// Endpoint as shown in diagnostics
    pub fn display_endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("s3.{}.amazonaws.com", self.region),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

/// Bucket-level settings cached alongside the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub connection: ConnectionConfig,
    pub bucket: String,
    /// Key prefix under which folders live (e.g. "images/")
    pub key_prefix: String,
}

/// One ListObjectsV2 request (delimiter is always "/")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPageRequest {
    pub bucket: String,
    pub prefix: String,
    pub max_keys: i32,
    pub continuation_token: Option<String>,
}

/// One ListObjectsV2 response page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys from `Contents`
    pub keys: Vec<String>,
    /// Prefixes from `CommonPrefixes`
    pub common_prefixes: Vec<String>,
    /// Continuation token for the next page (None when exhausted)
    pub next_token: Option<String>,
}

/// A single PutObject call
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}
