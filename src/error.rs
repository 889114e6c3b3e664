//! Error types for kpmon.
//!
//! All errors are strongly typed using thiserror. The taxonomy mirrors how
//! failures are handled: store lookups return `NotFound` to the caller,
//! stream overload surfaces as `Unavailable`, decode and correlation failures
//! are logged and skipped by the pipeline, and transport failures are retried
//! with backoff by the subscription manager.

use thiserror::Error;

/// Errors returned by the keyed stores (actions, measurements).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry not found: {key}")]
    NotFound { key: String },

    #[error("no entries stored")]
    NoEntries,
}

/// Errors returned by the stream broker.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream not found: {id}")]
    NotFound { id: String },

    #[error("cannot append indication to stream: maximum buffer size ({capacity}) has been reached")]
    Unavailable { capacity: usize },

    /// End-of-stream: the stream was closed and its buffer fully drained.
    #[error("stream closed")]
    Closed,

    #[error("operation canceled")]
    Canceled,
}

/// Errors produced while decoding indication headers and payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed indication header: {reason}")]
    Header { reason: String },

    #[error("malformed indication message: {reason}")]
    Message { reason: String },

    #[error("indication message carries neither cell object id nor subscription id")]
    MissingCellReference,
}

/// Errors reported by the southbound transport client.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("subscription failed for node {node_id}: {message}")]
    SubscribeFailed { node_id: String, message: String },

    #[error("unsubscribe failed for subscription '{name}': {message}")]
    UnsubscribeFailed { name: String, message: String },
}

/// Errors from the application configuration client.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration key not set: {key}")]
    MissingKey { key: String },
}

/// Top-level error type for kpmon.
#[derive(Debug, Error)]
pub enum KpmError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl KpmError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error represents a missing key or stream.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::NotFound { .. }) | Self::Stream(StreamError::NotFound { .. })
        )
    }

    /// Returns true if this error is cancellation, a normal termination path
    /// for watch loops and monitors.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Stream(StreamError::Canceled))
    }

    /// Returns true if this error signals end-of-stream.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Stream(StreamError::Closed))
    }
}

/// Result type alias for kpmon operations.
pub type KpmResult<T> = Result<T, KpmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_reports_capacity() {
        let err = StreamError::Unavailable { capacity: 10_000 };
        let msg = format!("{err}");
        assert!(msg.contains("10000"));
        assert!(msg.contains("maximum buffer size"));
    }

    #[test]
    fn not_found_classification() {
        let err: KpmError = StoreError::NotFound {
            key: "sub-42".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(!err.is_canceled());

        let err: KpmError = StreamError::NotFound {
            id: "7".to_string(),
        }
        .into();
        assert!(err.is_not_found());
    }

    #[test]
    fn canceled_and_closed_classification() {
        let canceled: KpmError = StreamError::Canceled.into();
        assert!(canceled.is_canceled());
        assert!(!canceled.is_closed());

        let closed: KpmError = StreamError::Closed.into();
        assert!(closed.is_closed());
        assert!(!closed.is_canceled());
    }

    #[test]
    fn transport_error_message() {
        let err = TransportError::SubscribeFailed {
            node_id: "gnb-1".to_string(),
            message: "connection refused".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("gnb-1"));
        assert!(msg.contains("connection refused"));
    }
}
