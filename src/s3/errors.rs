//! Object Store Error Types
//!
//! Closed error taxonomy for S3 operations. Errors are classified once, at the
//! transport boundary, so retry and user-facing decisions never inspect strings.

use std::fmt;

/// How the retry executor should treat a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials rejected; never retried
    Auth,
    /// Transient failure (429, 5xx, timeouts, unreachable endpoint)
    Retryable,
    /// Anything else; single attempt
    Fatal,
}

/// Implemented by errors that can drive [`super::retry::with_retry`]
pub trait Classify {
    fn classification(&self) -> ErrorClass;
}

/// Object store error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Authentication failed{}: {message}", fmt_code(.code, .status))]
    Auth {
        code: Option<String>,
        status: Option<u16>,
        message: String,
    },

    #[error("Transient store error{}: {message}", fmt_code(.code, .status))]
    Retryable {
        code: Option<String>,
        status: Option<u16>,
        message: String,
    },

    #[error("Endpoint unreachable ({endpoint}): {message}")]
    NetworkUnreachable { endpoint: String, message: String },

    #[error("Store error{}: {message}", fmt_code(.code, .status))]
    Fatal {
        code: Option<String>,
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid connection configuration: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

fn fmt_code(code: &Option<String>, status: &Option<u16>) -> String {
    match (code, status) {
        (Some(code), Some(status)) => format!(" ({code}, HTTP {status})"),
        (Some(code), None) => format!(" ({code})"),
        (None, Some(status)) => format!(" (HTTP {status})"),
        (None, None) => String::new(),
    }
}

/// Error codes that always mean the credentials were rejected
const AUTH_CODES: &[&str] = &[
    "Forbidden",
    "Unauthorized",
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
];

/// Error codes that mean "slow down and try again"
const THROTTLE_CODES: &[&str] = &["TooManyRequests", "SlowDown"];

impl StoreError {
    /// Classify a store response from its HTTP status and error code
    pub fn from_response(status: Option<u16>, code: Option<&str>, message: &str) -> Self {
        let code_owned = code.map(str::to_string);
        let message = message.to_string();

        let is_auth = matches!(status, Some(401 | 403))
            || code.is_some_and(|c| AUTH_CODES.contains(&c));
        if is_auth {
            return StoreError::Auth {
                code: code_owned,
                status,
                message,
            };
        }

        let is_transient = matches!(status, Some(429 | 500..=599))
            || code.is_some_and(|c| THROTTLE_CODES.contains(&c));
        if is_transient {
            return StoreError::Retryable {
                code: code_owned,
                status,
                message,
            };
        }

        StoreError::Fatal {
            code: code_owned,
            status,
            message,
        }
    }

    /// Whether a caller-level policy may try this operation again later
    pub fn is_retryable(&self) -> bool {
        self.classification() == ErrorClass::Retryable
    }

    /// Provider error code, if the store sent one
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Auth { code, .. }
            | StoreError::Retryable { code, .. }
            | StoreError::Fatal { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status, if the failure came with a response
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Auth { status, .. }
            | StoreError::Retryable { status, .. }
            | StoreError::Fatal { status, .. } => *status,
            _ => None,
        }
    }

    /// Message suitable for showing to the person who configured the store
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Auth { .. } => {
                "Authentication failed. Verify the access key ID and secret access key.".to_string()
            }
            StoreError::NetworkUnreachable { endpoint, .. } => format!(
                "Could not connect to {endpoint}. Check the endpoint URL and your network connection."
            ),
            StoreError::Config(reason) => format!("Invalid configuration: {reason}"),
            StoreError::Cancelled => "Operation cancelled.".to_string(),
            other => {
                let label = other
                    .code()
                    .map(str::to_string)
                    .or_else(|| other.status().map(|s| format!("HTTP {s}")))
                    .unwrap_or_else(|| "unknown".to_string());
                format!("Request failed ({label}): {other}")
            }
        }
    }
}

impl Classify for StoreError {
    fn classification(&self) -> ErrorClass {
        match self {
            StoreError::Auth { .. } => ErrorClass::Auth,
            StoreError::Retryable { .. } | StoreError::NetworkUnreachable { .. } => {
                ErrorClass::Retryable
            }
            StoreError::Fatal { .. } | StoreError::Config(_) | StoreError::Cancelled => {
                ErrorClass::Fatal
            }
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Auth => "auth",
            ErrorClass::Retryable => "retryable",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_and_codes() {
        for status in [401, 403] {
            let err = StoreError::from_response(Some(status), None, "denied");
            assert_eq!(err.classification(), ErrorClass::Auth);
        }
        let err = StoreError::from_response(Some(400), Some("InvalidAccessKeyId"), "bad key");
        assert_eq!(err.classification(), ErrorClass::Auth);
        assert_eq!(err.code(), Some("InvalidAccessKeyId"));
    }

    #[test]
    fn test_transient_statuses() {
        for status in [429, 500, 502, 503, 599] {
            let err = StoreError::from_response(Some(status), None, "busy");
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
        let err = StoreError::from_response(None, Some("TooManyRequests"), "slow");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_everything_else_is_fatal() {
        let err = StoreError::from_response(Some(404), Some("NoSuchBucket"), "missing");
        assert_eq!(err.classification(), ErrorClass::Fatal);
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("NoSuchBucket"));
    }

    #[test]
    fn test_request_timeout_code_on_400_is_fatal() {
        let err = StoreError::from_response(Some(400), Some("RequestTimeout"), "idle socket");
        assert_eq!(err.classification(), ErrorClass::Fatal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unreachable_is_retryable_and_names_endpoint() {
        let err = StoreError::NetworkUnreachable {
            endpoint: "https://s3.example.test".to_string(),
            message: "dns error".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.user_message().contains("https://s3.example.test"));
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let auth = StoreError::from_response(Some(403), None, "no").user_message();
        let fatal = StoreError::from_response(Some(400), Some("InvalidBucketName"), "no").user_message();
        assert!(auth.contains("access key"));
        assert!(fatal.contains("InvalidBucketName"));
        assert_ne!(auth, fatal);
    }
}
