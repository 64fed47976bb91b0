//! Error handling for Tubeloader

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for Tubeloader
#[derive(Debug, Error)]
pub enum TubeloaderError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Signature cipher unsupported: {0}")]
    CipherUnsupported(String),

    #[error("No matching format: {0}")]
    NoMatchingFormat(String),

    #[error("Source URL expired or unauthorized (HTTP {status})")]
    SourceExpired { status: u16 },

    #[error("Transfer integrity error: expected {expected} bytes, received {received}")]
    TransferIntegrity { expected: u64, received: u64 },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to extract metadata: {0}")]
    Extraction(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of a [`TubeloaderError`], stable enough to report and match on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    RateLimited,
    TransientNetwork,
    CipherUnsupported,
    NoMatchingFormat,
    SourceExpired,
    TransferIntegrity,
    Disk,
    Configuration,
    Extraction,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Kinds that are retried locally with backoff before surfacing
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::TransientNetwork)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::TransientNetwork => "TransientNetwork",
            ErrorKind::CipherUnsupported => "CipherUnsupported",
            ErrorKind::NoMatchingFormat => "NoMatchingFormat",
            ErrorKind::SourceExpired => "SourceExpired",
            ErrorKind::TransferIntegrity => "TransferIntegrityError",
            ErrorKind::Disk => "DiskError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Extraction => "ExtractionError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TubeloaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TubeloaderError::NotFound(_) => ErrorKind::NotFound,
            TubeloaderError::Unavailable(_) => ErrorKind::Unavailable,
            TubeloaderError::RateLimited(_) => ErrorKind::RateLimited,
            TubeloaderError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            TubeloaderError::CipherUnsupported(_) => ErrorKind::CipherUnsupported,
            TubeloaderError::NoMatchingFormat(_) => ErrorKind::NoMatchingFormat,
            TubeloaderError::SourceExpired { .. } => ErrorKind::SourceExpired,
            TubeloaderError::TransferIntegrity { .. } => ErrorKind::TransferIntegrity,
            TubeloaderError::Disk(_) => ErrorKind::Disk,
            TubeloaderError::Configuration(_) => ErrorKind::Configuration,
            TubeloaderError::Extraction(_) => ErrorKind::Extraction,
            TubeloaderError::Cancelled => ErrorKind::Cancelled,
            TubeloaderError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Map an HTTP status returned while resolving metadata
    pub fn from_resolver_status(status: reqwest::StatusCode, context: &str) -> Self {
        match status.as_u16() {
            404 | 410 => TubeloaderError::NotFound(format!("{} (HTTP {})", context, status)),
            401 | 403 | 451 => {
                TubeloaderError::Unavailable(format!("{} (HTTP {})", context, status))
            }
            429 => TubeloaderError::RateLimited(format!("{} (HTTP {})", context, status)),
            s if s >= 500 => {
                TubeloaderError::TransientNetwork(format!("{} (HTTP {})", context, status))
            }
            _ => TubeloaderError::Extraction(format!("{} (HTTP {})", context, status)),
        }
    }

    /// Map an HTTP status returned while transferring stream bytes
    pub fn from_transfer_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 | 410 => TubeloaderError::SourceExpired {
                status: status.as_u16(),
            },
            404 => TubeloaderError::NotFound(format!("stream source returned HTTP {}", status)),
            429 => TubeloaderError::RateLimited(format!("stream source returned HTTP {}", status)),
            s if s >= 500 => TubeloaderError::TransientNetwork(format!(
                "stream source returned HTTP {}",
                status
            )),
            _ => TubeloaderError::Unavailable(format!("stream source returned HTTP {}", status)),
        }
    }
}

impl From<reqwest::Error> for TubeloaderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return TubeloaderError::from_resolver_status(status, "request failed");
        }
        if err.is_decode() {
            return TubeloaderError::Extraction(err.to_string());
        }
        if err.is_builder() {
            return TubeloaderError::Configuration(err.to_string());
        }
        // connect, timeout, body and redirect failures
        TubeloaderError::TransientNetwork(err.to_string())
    }
}

impl From<serde_json::Error> for TubeloaderError {
    fn from(err: serde_json::Error) -> Self {
        TubeloaderError::Extraction(err.to_string())
    }
}

/// Result alias used throughout the library
pub type Result<T, E = TubeloaderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_only_rate_limit_and_network_are_retryable() {
        let retryable: Vec<ErrorKind> = [
            TubeloaderError::RateLimited("x".into()),
            TubeloaderError::TransientNetwork("x".into()),
        ]
        .iter()
        .map(|e| e.kind())
        .collect();
        assert!(retryable.iter().all(|k| k.is_retryable()));

        for err in [
            TubeloaderError::NotFound("x".into()),
            TubeloaderError::Unavailable("x".into()),
            TubeloaderError::CipherUnsupported("x".into()),
            TubeloaderError::NoMatchingFormat("x".into()),
            TubeloaderError::SourceExpired { status: 403 },
            TubeloaderError::TransferIntegrity {
                expected: 10,
                received: 11,
            },
            TubeloaderError::Configuration("x".into()),
            TubeloaderError::Cancelled,
        ] {
            assert!(!err.is_retryable(), "{:?} should not be retryable", err);
        }
    }

    #[test]
    fn test_resolver_status_mapping() {
        assert_eq!(
            TubeloaderError::from_resolver_status(StatusCode::NOT_FOUND, "watch").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            TubeloaderError::from_resolver_status(StatusCode::TOO_MANY_REQUESTS, "watch").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            TubeloaderError::from_resolver_status(StatusCode::BAD_GATEWAY, "watch").kind(),
            ErrorKind::TransientNetwork
        );
        assert_eq!(
            TubeloaderError::from_resolver_status(StatusCode::FORBIDDEN, "watch").kind(),
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_transfer_status_mapping() {
        assert_eq!(
            TubeloaderError::from_transfer_status(StatusCode::FORBIDDEN).kind(),
            ErrorKind::SourceExpired
        );
        assert_eq!(
            TubeloaderError::from_transfer_status(StatusCode::GONE).kind(),
            ErrorKind::SourceExpired
        );
        assert_eq!(
            TubeloaderError::from_transfer_status(StatusCode::SERVICE_UNAVAILABLE).kind(),
            ErrorKind::TransientNetwork
        );
    }

    #[test]
    fn test_kind_display_matches_reported_names() {
        assert_eq!(ErrorKind::Configuration.to_string(), "ConfigurationError");
        assert_eq!(ErrorKind::TransferIntegrity.to_string(), "TransferIntegrityError");
        assert_eq!(ErrorKind::NotFound.to_string(), "NotFound");
    }
}
