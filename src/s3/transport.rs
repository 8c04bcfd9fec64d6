//! S3 transport seam
//!
//! [`ObjectTransport`] is the narrow surface the client needs: one list page, one
//! put. The production implementation wraps `aws-sdk-s3`; tests swap in an
//! in-memory store through [`TransportFactory`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::errors::StoreError;
use super::types::{ConnectionConfig, ListPage, ListPageRequest, PutObjectRequest};

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout; a timed-out request counts as one failed attempt
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delimiter used for folder-style listings
pub const DELIMITER: &str = "/";

/// Raw object store operations, one network call each
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Issue a single delimiter-based ListObjectsV2 call
    async fn list_page(&self, request: ListPageRequest) -> Result<ListPage, StoreError>;

    /// Issue a single PutObject call
    async fn put_object(&self, request: PutObjectRequest) -> Result<(), StoreError>;
}

/// Builds a transport for a given connection configuration
pub trait TransportFactory: Send + Sync {
    fn build(&self, config: &ConnectionConfig) -> Result<Arc<dyn ObjectTransport>, StoreError>;
}

/// Factory for the AWS SDK transport
#[derive(Debug, Default, Clone, Copy)]
pub struct AwsTransportFactory;

impl TransportFactory for AwsTransportFactory {
    fn build(&self, config: &ConnectionConfig) -> Result<Arc<dyn ObjectTransport>, StoreError> {
        Ok(Arc::new(AwsTransport::new(config)?))
    }
}

/// S3-compatible transport using the AWS SDK
pub struct AwsTransport {
    client: Client,
    /// Endpoint echoed back in connectivity errors
    endpoint: String,
}

impl AwsTransport {
    pub fn new(config: &ConnectionConfig) -> Result<Self, StoreError> {
        if config.access_key_id.is_empty() || config.secret_access_key.is_empty() {
            return Err(StoreError::Config(
                "both access_key_id and secret_access_key are required".to_string(),
            ));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None, // session token
            None, // expiration
            "s3img-config",
        );

        let timeouts = TimeoutConfig::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .operation_timeout(REQUEST_TIMEOUT)
            .build();

        // Retries belong to with_retry; the SDK must make exactly one attempt
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(timeouts)
            .retry_config(RetryConfig::disabled())
            .force_path_style(config.force_path_style);

        let endpoint = config.endpoint.as_deref().map(normalize_endpoint);
        if let Some(endpoint_url) = &endpoint {
            builder = builder.endpoint_url(endpoint_url);
        }

        let client = Client::from_conf(builder.build());
        let endpoint = endpoint.unwrap_or_else(|| config.display_endpoint());

        info!(
            endpoint = %endpoint,
            region = %config.region,
            path_style = config.force_path_style,
            "S3 transport created"
        );

        Ok(Self { client, endpoint })
    }

    /// Translate an SDK failure into the store taxonomy
    fn map_sdk_error<E>(&self, err: SdkError<E>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        match &err {
            SdkError::TimeoutError(_) => StoreError::Retryable {
                code: None,
                status: None,
                message: "request timed out".to_string(),
            },
            SdkError::DispatchFailure(failure) if failure.is_timeout() => StoreError::Retryable {
                code: None,
                status: None,
                message: format!("{}", DisplayErrorContext(&err)),
            },
            SdkError::DispatchFailure(_) => StoreError::NetworkUnreachable {
                endpoint: self.endpoint.clone(),
                message: format!("{}", DisplayErrorContext(&err)),
            },
            SdkError::ServiceError(_) | SdkError::ResponseError(_) => {
                let status = err.raw_response().map(|raw| raw.status().as_u16());
                let message = err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}", DisplayErrorContext(&err)));
                StoreError::from_response(status, err.code(), &message)
            }
            _ => StoreError::Fatal {
                code: None,
                status: None,
                message: format!("{}", DisplayErrorContext(&err)),
            },
        }
    }
}

/// Handle bare host:port endpoints (e.g. "minio:9000") by prepending http://
fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ObjectTransport for AwsTransport {
    async fn list_page(&self, request: ListPageRequest) -> Result<ListPage, StoreError> {
        debug!(
            bucket = %request.bucket,
            prefix = %request.prefix,
            max_keys = request.max_keys,
            token = ?request.continuation_token,
            "Listing objects"
        );

        let mut call = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .prefix(&request.prefix)
            .delimiter(DELIMITER)
            .max_keys(request.max_keys);

        if let Some(token) = request.continuation_token {
            call = call.continuation_token(token);
        }

        let output = call.send().await.map_err(|e| self.map_sdk_error(e))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let next_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            keys,
            common_prefixes,
            next_token,
        })
    }

    async fn put_object(&self, request: PutObjectRequest) -> Result<(), StoreError> {
        debug!(
            bucket = %request.bucket,
            key = %request.key,
            size = request.body.len(),
            content_type = %request.content_type,
            "Putting object"
        );

        self.client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .set_metadata(Some(request.metadata))
            .body(ByteStream::from(request.body))
            .send()
            .await
            .map_err(|e| self.map_sdk_error(e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            endpoint: Some("minio:9000".to_string()),
            region: "us-east-1".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            force_path_style: true,
        }
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("minio:9000"), "http://minio:9000");
        assert_eq!(
            normalize_endpoint("https://s3.example.test/"),
            "https://s3.example.test"
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let mut cfg = config();
        cfg.secret_access_key.clear();
        assert!(matches!(AwsTransport::new(&cfg), Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_transport_keeps_normalized_endpoint() {
        let transport = AwsTransport::new(&config()).unwrap();
        assert_eq!(transport.endpoint, "http://minio:9000");
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let mut cfg = config();
        cfg.endpoint = Some("http://127.0.0.1:1".to_string());
        let transport = AwsTransport::new(&cfg).unwrap();

        let err = transport
            .list_page(ListPageRequest {
                bucket: "assets".to_string(),
                prefix: "images/".to_string(),
                max_keys: 10,
                continuation_token: None,
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        match err {
            StoreError::NetworkUnreachable { endpoint, .. } => {
                assert_eq!(endpoint, "http://127.0.0.1:1");
            }
            other => panic!("expected NetworkUnreachable, got {other:?}"),
        }
    }
}
