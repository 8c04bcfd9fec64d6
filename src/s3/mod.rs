//! S3-compatible object store access layer

pub mod client;
pub mod errors;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::ObjectStoreClient;
pub use errors::{Classify, ErrorClass, StoreError};
pub use retry::{with_retry, RetryPolicy};
pub use transport::{AwsTransportFactory, ObjectTransport, TransportFactory};
pub use types::*;
