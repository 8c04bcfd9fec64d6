//! Object Store Client
//!
//! Lists and writes objects in one bucket. Every network call goes through
//! [`with_retry`]. The transport is built lazily and cached together with the
//! connection configuration it was built from; it is rebuilt whenever that
//! configuration changes (compared by value).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::StoreError;
use super::retry::{with_retry, RetryPolicy};
use super::transport::{ObjectTransport, TransportFactory};
use super::types::{ConnectionConfig, ListPageRequest, PutObjectRequest, StoreSettings};

/// Largest page ListObjectsV2 will return
pub const MAX_PAGE_SIZE: usize = 1000;

/// Upper bound on common prefixes collected by `list_directories`
pub const MAX_DIRECTORIES: usize = 10_000;

/// Number of keys requested by `test_connection`
const CONNECTION_TEST_KEYS: usize = 10;

/// Transport cached with the configuration it was built from
struct CachedTransport {
    config: ConnectionConfig,
    transport: Arc<dyn ObjectTransport>,
}

/// Which half of a list page to collect
#[derive(Debug, Clone, Copy)]
enum ListTarget {
    Contents,
    CommonPrefixes,
}

/// S3 client service owning the cached transport and settings
pub struct ObjectStoreClient {
    factory: Arc<dyn TransportFactory>,
    settings: Mutex<StoreSettings>,
    transport: Mutex<Option<CachedTransport>>,
    retry: RetryPolicy,
}

impl ObjectStoreClient {
    /// Create a client with the default retry policy (3 retries, 1s base delay)
    ///
    /// No connection is made until the first request.
    pub fn new(settings: StoreSettings, factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_retry_policy(settings, factory, RetryPolicy::default())
    }

    /// Create a client with an explicit retry policy
    ///
    /// # Arguments
    /// * `settings` - Connection, bucket and key prefix
    /// * `factory` - Builds the transport on first use and after config changes
    /// * `retry` - Policy applied to every list page and put
    pub fn with_retry_policy(
        settings: StoreSettings,
        factory: Arc<dyn TransportFactory>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            factory,
            settings: Mutex::new(settings),
            transport: Mutex::new(None),
            retry,
        }
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> StoreSettings {
        self.settings.lock().clone()
    }

    /// Replace the settings; drops the cached transport if the connection changed
    pub fn update_settings(&self, settings: StoreSettings) {
        let connection_changed = {
            let mut current = self.settings.lock();
            let changed = current.connection != settings.connection;
            *current = settings;
            changed
        };
        if connection_changed {
            self.invalidate();
        }
    }

    /// Drop the cached transport so the next call rebuilds it
    pub fn invalidate(&self) {
        if self.transport.lock().take().is_some() {
            info!("S3 transport invalidated");
        }
    }

    /// Get the cached transport, rebuilding it if the connection config changed
    fn transport(&self) -> Result<Arc<dyn ObjectTransport>, StoreError> {
        let config = self.settings.lock().connection.clone();
        let mut cached = self.transport.lock();

        if let Some(existing) = cached.as_ref() {
            if existing.config == config {
                return Ok(Arc::clone(&existing.transport));
            }
        }

        // Release the previous transport before building its replacement
        if cached.take().is_some() {
            debug!("Connection config changed, rebuilding S3 transport");
        }

        let transport = self.factory.build(&config)?;
        *cached = Some(CachedTransport {
            config,
            transport: Arc::clone(&transport),
        });
        Ok(transport)
    }

    /// List object keys directly under `prefix`, up to `max_keys`
    ///
    /// # Arguments
    /// * `bucket` - Bucket to list
    /// * `prefix` - Key prefix, usually ending in "/"
    /// * `max_keys` - Upper bound on returned keys
    /// * `cancel` - Checked before each page request
    ///
    /// # Returns
    /// Only `Contents` keys, in store order, truncated to exactly `max_keys`.
    pub async fn list_keys(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StoreError> {
        self.paginate(bucket, prefix, max_keys, ListTarget::Contents, cancel)
            .await
    }

    /// List "directories" (common prefixes) directly under `prefix`
    ///
    /// Collects at most [`MAX_DIRECTORIES`] entries.
    pub async fn list_directories(
        &self,
        bucket: &str,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StoreError> {
        let configured = self.settings.lock().key_prefix.clone();
        if configured != prefix {
            debug!(
                requested = prefix,
                configured = %configured,
                "Listing directories under a prefix other than the configured one"
            );
        }
        self.paginate(
            bucket,
            prefix,
            MAX_DIRECTORIES,
            ListTarget::CommonPrefixes,
            cancel,
        )
        .await
    }

    async fn paginate(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
        target: ListTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StoreError> {
        let mut collected: Vec<String> = Vec::new();
        let mut continuation_token: Option<String> = None;

        while collected.len() < limit {
            // Stop between pages, never mid-request
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            let transport = self.transport()?;
            let request = ListPageRequest {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                max_keys: (limit - collected.len()).min(MAX_PAGE_SIZE) as i32,
                continuation_token: continuation_token.take(),
            };

            let page = with_retry(self.retry, "list_objects", || {
                let transport = Arc::clone(&transport);
                let request = request.clone();
                async move { transport.list_page(request).await }
            })
            .await?;

            match target {
                ListTarget::Contents => collected.extend(page.keys),
                ListTarget::CommonPrefixes => collected.extend(page.common_prefixes),
            }

            match page.next_token {
                Some(next) => continuation_token = Some(next),
                None => break,
            }
        }

        collected.truncate(limit);
        debug!(bucket, prefix, count = collected.len(), ?target, "Listed from S3");
        Ok(collected)
    }

    /// Put a single object
    pub async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let transport = self.transport()?;
        let request = PutObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
            content_type: content_type.to_string(),
            metadata,
        };

        with_retry(self.retry, "put_object", || {
            let transport = Arc::clone(&transport);
            let request = request.clone();
            async move { transport.put_object(request).await }
        })
        .await?;

        info!(bucket, key, size = request.body.len(), "Object written");
        Ok(())
    }

    /// Check reachability and credentials with a small listing
    pub async fn test_connection(&self) -> Result<(), StoreError> {
        let settings = self.settings();
        let cancel = CancellationToken::new();
        match self
            .list_keys(
                &settings.bucket,
                &settings.key_prefix,
                CONNECTION_TEST_KEYS,
                &cancel,
            )
            .await
        {
            Ok(_) => {
                info!(bucket = %settings.bucket, "Connection test succeeded");
                Ok(())
            }
            Err(e) => {
                warn!(
                    bucket = %settings.bucket,
                    endpoint = %settings.connection.display_endpoint(),
                    error = %e,
                    "Connection test failed"
                );
                Err(e)
            }
        }
    }
}
