//! Error types
//!
//! Every failure the hub reports carries a machine-readable [`ErrorKind`]
//! plus a human-readable message via `Display`.

use std::time::Duration;

use crate::buffer::Cursor;
use crate::session::{ClientId, SessionId};

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hub operations
#[derive(Debug)]
pub enum Error {
    /// A single write is larger than the ring can hold
    ChunkTooLarge { len: usize, capacity: usize },
    /// The ring has overwritten the range a cursor points at
    CursorExpired { cursor: Cursor, current: Cursor },
    /// The session write lock could not be acquired in time
    LockTimeout(Duration),
    /// The session table is full
    CapacityExceeded { max: usize },
    /// A subscriber's transport is gone
    SubscriberWriteFailure(ClientId),
    /// Session id is not 4-16 alphanumeric characters
    InvalidSessionId(String),
    /// The session was deleted and can no longer be used
    SessionDeleted(SessionId),
    /// File I/O error
    Io(std::io::Error),
    /// JSON encoding error
    Json(serde_json::Error),
}

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ChunkTooLarge,
    CursorExpired,
    LockTimeout,
    CapacityExceeded,
    SubscriberWriteFailure,
    InvalidSessionId,
    SessionDeleted,
    Io,
    Json,
}

impl ErrorKind {
    /// Stable snake_case tag for this kind
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ChunkTooLarge => "chunk_too_large",
            ErrorKind::CursorExpired => "cursor_expired",
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::SubscriberWriteFailure => "subscriber_write_failure",
            ErrorKind::InvalidSessionId => "invalid_session_id",
            ErrorKind::SessionDeleted => "session_deleted",
            ErrorKind::Io => "io",
            ErrorKind::Json => "json",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Get the machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ChunkTooLarge { .. } => ErrorKind::ChunkTooLarge,
            Error::CursorExpired { .. } => ErrorKind::CursorExpired,
            Error::LockTimeout(_) => ErrorKind::LockTimeout,
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::SubscriberWriteFailure(_) => ErrorKind::SubscriberWriteFailure,
            Error::InvalidSessionId(_) => ErrorKind::InvalidSessionId,
            Error::SessionDeleted(_) => ErrorKind::SessionDeleted,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::LockTimeout(_) | Error::Io(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ChunkTooLarge { len, capacity } => {
                write!(f, "Chunk of {} bytes exceeds ring capacity of {} bytes", len, capacity)
            }
            Error::CursorExpired { cursor, current } => {
                write!(f, "Cursor {} expired, ring is at {}", cursor, current)
            }
            Error::LockTimeout(timeout) => {
                write!(f, "Timed out after {:?} waiting for session write lock", timeout)
            }
            Error::CapacityExceeded { max } => {
                write!(f, "Session table is full ({} sessions)", max)
            }
            Error::SubscriberWriteFailure(id) => write!(f, "Subscriber {} is gone", id),
            Error::InvalidSessionId(id) => write!(f, "Invalid session id: {:?}", id),
            Error::SessionDeleted(id) => write!(f, "Session deleted: {}", id),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let err = Error::CapacityExceeded { max: 4 };
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(err.kind().as_str(), "capacity_exceeded");
        assert_eq!(err.to_string(), "Session table is full (4 sessions)");
    }

    #[test]
    fn test_transient() {
        assert!(Error::LockTimeout(Duration::from_secs(10)).is_transient());
        assert!(!Error::ChunkTooLarge { len: 20, capacity: 16 }.is_transient());
    }

    #[test]
    fn test_io_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
