//! Error types for the change stream consumer.

use thiserror::Error;

/// Result type alias for offset store operations.
pub type OffsetResult<T> = Result<T, OffsetStoreError>;

/// Result type alias for upstream feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Result type alias for consumer operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors raised by checkpoint persistence backends.
///
/// Stores surface these immediately; retrying is the consumer's job.
#[derive(Error, Debug)]
pub enum OffsetStoreError {
    /// The backend could not be reached or rejected the command
    #[error("Offset store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    /// The store was built with an invalid configuration
    #[error("Offset store misconfigured: {0}")]
    Configuration(String),

    /// Failure reported by a custom backend or injected by the in-memory store
    #[error("Offset store backend error: {0}")]
    Backend(String),
}

/// Errors reported by the upstream change feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The requested resume point has been discarded upstream
    /// (for example it fell out of the retention window)
    #[error("Resume point no longer valid: {0}")]
    ResumePointInvalid(String),

    /// Network or server failure
    #[error("Feed transport error: {0}")]
    Transport(String),

    /// An event could not be decoded into the envelope type
    #[error("Failed to decode change event: {0}")]
    Decode(String),

    /// The cursor was closed or invalidated upstream
    #[error("Change feed closed: {0}")]
    Closed(String),
}

impl FeedError {
    /// Whether the feed rejected the requested resume position.
    ///
    /// This is the only feed error the acquirer recovers from.
    pub fn is_resume_invalid(&self) -> bool {
        matches!(self, FeedError::ResumePointInvalid(_))
    }
}

/// Errors raised while turning an envelope into an outbox payload.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Compression or decompression failed
    #[error("Encoder I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that escape the consumption loop.
///
/// With the default policy handler failures never show up here: they are
/// retried until they succeed or the consumer is shut down.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Checkpoint could not be read or cleared while positioning the cursor
    #[error("Offset store error: {0}")]
    OffsetStore(#[source] OffsetStoreError),

    /// The feed refused to open a cursor
    #[error("Failed to open change stream: {0}")]
    Feed(#[source] FeedError),

    /// The feed kept rejecting the checkpoint after it was cleared
    #[error(
        "Change stream rejected the resume point after {attempts} resynchronization(s): {source}"
    )]
    ResyncExhausted {
        attempts: u32,
        #[source]
        source: FeedError,
    },

    /// Terminal error reported by an open cursor
    #[error("Change stream cursor failed: {0}")]
    Cursor(#[source] FeedError),

    /// Checkpoint could not be advanced within the commit retry budget
    #[error("Failed to commit offset after {attempts} attempt(s): {source}")]
    CommitFailed {
        attempts: u32,
        #[source]
        source: OffsetStoreError,
    },

    /// Handler kept failing under a bounded handler retry policy
    #[error("Handler failed after {attempts} attempt(s): {message}")]
    HandlerFailed { attempts: u32, message: String },

    /// Envelope could not be serialized or encoded for fan-out
    #[error("Failed to encode change event: {0}")]
    Encode(#[from] EncodeError),
}

impl StreamError {
    /// Whether the error means the checkpoint could not be advanced.
    pub fn is_commit_failure(&self) -> bool {
        matches!(self, StreamError::CommitFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_invalid_classification() {
        assert!(FeedError::ResumePointInvalid("gone".into()).is_resume_invalid());
        assert!(!FeedError::Transport("reset".into()).is_resume_invalid());
        assert!(!FeedError::Closed("invalidate".into()).is_resume_invalid());
    }

    #[test]
    fn test_error_display() {
        let err = StreamError::CommitFailed {
            attempts: 3,
            source: OffsetStoreError::Backend("boom".into()),
        };
        assert_eq!(
            err.to_string(),
            "Failed to commit offset after 3 attempt(s): Offset store backend error: boom"
        );
        assert!(err.is_commit_failure());

        let err = StreamError::ResyncExhausted {
            attempts: 1,
            source: FeedError::ResumePointInvalid("gone".into()),
        };
        assert_eq!(
            err.to_string(),
            "Change stream rejected the resume point after 1 resynchronization(s): \
             Resume point no longer valid: gone"
        );
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_commit_failure());
    }

    #[test]
    fn test_error_from_serde() {
        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let err: StreamError = EncodeError::from(json_err).into();
        assert!(matches!(err, StreamError::Encode(EncodeError::Serialization(_))));
    }
}
