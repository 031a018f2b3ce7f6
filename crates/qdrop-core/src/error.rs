//! Error types for qdrop-core.

use thiserror::Error;

/// Main error type for qdrop operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation or malformed message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Codec error during encoding/decoding.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// No active session exists for the given share code.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session has reached its participant capacity.
    #[error("session full: {0}")]
    SessionFull(String),

    /// Role join violation (e.g. claiming creator without being one).
    #[error("not authorized to join as requested role")]
    NotAuthorized,

    /// A chunk slot was still empty when END arrived.
    #[error("transfer truncated: {missing} of {total} chunks missing for {file_name}")]
    TransferTruncated {
        file_name: String,
        missing: usize,
        total: usize,
    },

    /// The underlying channel closed while a transfer was in flight.
    #[error("channel closed mid-transfer")]
    ChannelClosedMidTransfer,

    /// Connection or in-process channel was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A transfer slot is already occupied for this direction.
    #[error("transfer already in progress: {0}")]
    TransferBusy(String),

    /// No file with the given id is registered in the session.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Storage backend failure; fails only the affected upload/download.
    #[error("storage unavailable: {message}")]
    Storage { message: String },
}

impl Error {
    /// Returns true if this error is a per-request rejection that must be
    /// reported to the requesting endpoint but leaves the session intact.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound(_)
                | Error::SessionFull(_)
                | Error::NotAuthorized
                | Error::TransferBusy(_)
        )
    }
}

/// Convenience result type for qdrop operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_session_not_found() {
        let err = Error::SessionNotFound("AB12CD".into());
        assert_eq!(err.to_string(), "session not found: AB12CD");
    }

    #[test]
    fn error_display_truncated() {
        let err = Error::TransferTruncated {
            file_name: "photo.jpg".into(),
            missing: 3,
            total: 61,
        };
        assert_eq!(
            err.to_string(),
            "transfer truncated: 3 of 61 chunks missing for photo.jpg"
        );
    }

    #[test]
    fn rejections_are_classified() {
        assert!(Error::SessionFull("X".into()).is_rejection());
        assert!(Error::NotAuthorized.is_rejection());
        assert!(Error::TransferBusy("a.bin".into()).is_rejection());
        assert!(!Error::ConnectionClosed.is_rejection());
        assert!(!Error::ChannelClosedMidTransfer.is_rejection());
    }
}
