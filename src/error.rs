//! Error types for store operations.

use thiserror::Error;

/// Errors raised by operators and record stores.
///
/// Only [`Error::LockContention`] is recoverable: the retry layer waits and
/// repeats the call. Every other variant aborts the call at the layer that
/// observes it.
#[derive(Debug, Error)]
pub enum Error {
    /// The record store is momentarily locked by another writer.
    #[error("record store is locked: {0}")]
    LockContention(String),

    /// A call needed a record key but no key function was configured.
    #[error("no key extraction function configured")]
    KeyExtractionMissing,

    /// Any other record store failure.
    #[error("record store failure: {0}")]
    Other(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether the failure is transient and the call may be repeated as is.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::LockContention(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lock_contention_is_recoverable() {
        assert!(Error::LockContention("table busy".to_string()).is_recoverable());
        assert!(!Error::KeyExtractionMissing.is_recoverable());
        assert!(!Error::Other("disk full".to_string()).is_recoverable());
        assert!(!Error::ConfigError("bad".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::LockContention("users".to_string());
        assert_eq!(err.to_string(), "record store is locked: users");
        assert_eq!(
            Error::KeyExtractionMissing.to_string(),
            "no key extraction function configured"
        );
    }
}
