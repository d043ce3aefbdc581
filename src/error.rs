//! Centralized error types for mailstrip.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailstrip library.
///
/// Every variant is scoped to a single message: the pipeline records it in
/// the batch report and moves on to the next id.
#[derive(Error, Debug)]
pub enum StripError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The raw message could not be parsed into a MIME tree.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Removing the attachments would leave nothing to upload.
    #[error("Message cannot be rebuilt: {0}")]
    UnrebuildableMessage(String),

    /// The mailbox has no message with this id (invalid or already deleted).
    #[error("Message not found: {0}")]
    NotFound(String),

    /// The mailbox refused the upload because it is full.
    #[error("Mailbox quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    /// Any other failure talking to the mailbox.
    #[error("Mailbox transport error: {0}")]
    Transport(String),

    /// A transfer-encoded body could not be decoded.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The configuration holds an unusable value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, StripError>`.
pub type Result<T> = std::result::Result<T, StripError>;

impl StripError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable tag used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::MalformedMessage(_) => "malformed-message",
            Self::UnrebuildableMessage(_) => "unrebuildable-message",
            Self::NotFound(_) => "not-found",
            Self::QuotaExceeded { .. } => "quota-exceeded",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::InvalidPath(_) => "invalid-path",
            Self::Config(_) => "config",
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `StripError`
/// when no path context is available (rare, prefer `StripError::io`).
impl From<std::io::Error> for StripError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
