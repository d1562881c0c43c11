use std::sync::Arc;

use reqwest::StatusCode;

/// Coarse classification of a failed request.
///
/// Every caller joined on the same locator receives the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidRequest,
    Resolution,
    Fetch,
    Io,
    Decryption,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum MediaCacheError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Cannot resolve locator {0} to a fetchable address")]
    ResolutionFailure(String),
    #[error("Fetch error: {0}")]
    FetchFailure(String),
    #[error("Server returned status code {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },
    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("I/O error: {source}")]
    IoFailure {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("Decryption error: {0}")]
    DecryptionFailure(String),
}

impl MediaCacheError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MediaCacheError::InvalidRequest(_) => FailureKind::InvalidRequest,
            MediaCacheError::ResolutionFailure(_) => FailureKind::Resolution,
            MediaCacheError::FetchFailure(_)
            | MediaCacheError::HttpStatus { .. }
            | MediaCacheError::Network { .. } => FailureKind::Fetch,
            MediaCacheError::IoFailure { .. } => FailureKind::Io,
            MediaCacheError::DecryptionFailure(_) => FailureKind::Decryption,
        }
    }
}

// Manual implementation of From<reqwest::Error> for MediaCacheError
// because of the Arc wrapping.
impl From<reqwest::Error> for MediaCacheError {
    fn from(err: reqwest::Error) -> Self {
        MediaCacheError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for MediaCacheError {
    fn from(err: std::io::Error) -> Self {
        MediaCacheError::IoFailure {
            source: Arc::new(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_collapses_fetch_variants() {
        let status = MediaCacheError::HttpStatus {
            status: StatusCode::NOT_FOUND,
            url: "https://example.org/a".to_string(),
        };
        assert_eq!(status.kind(), FailureKind::Fetch);
        assert_eq!(
            MediaCacheError::FetchFailure("reset".into()).kind(),
            FailureKind::Fetch
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err: MediaCacheError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), FailureKind::Io);
        assert!(err.to_string().contains("disk full"));

        // Clones share the same source
        let cloned = err.clone();
        assert_eq!(cloned.to_string(), err.to_string());
    }
}
