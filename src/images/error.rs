//! Per-stage errors of the image pipeline.
//!
//! Every variant here is recoverable at the granularity of a single URL: the
//! postprocess pass logs it, counts the URL as skipped, and moves on.

use thiserror::Error;

/// Failure to download a remote image.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL is not `http`/`https`, or does not parse at all.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The server answered with a non-2xx status.
    #[error("unexpected HTTP status {0}")]
    BadStatus(u16),

    /// The declared `Content-Type` is not in the allowed list.
    #[error("rejected content type: {0}")]
    RejectedType(String),

    /// The body is, or declares itself to be, larger than the ceiling.
    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    /// Connection, timeout, or body read failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FetchError {
    pub(crate) fn transport(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        FetchError::Transport(e.into())
    }
}

/// Failure to decode downloaded bytes as a safe image.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Decoding would exceed the configured pixel or allocation limits.
    #[error("decompression bomb rejected: {0}")]
    DecompressionBomb(String),

    /// Unknown format, truncated data, or any other decode failure.
    #[error("corrupt image: {0}")]
    Corrupt(String),
}

/// Failure to persist a validated image.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer cached the same source URL first.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[source] agora_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<agora_core::Error> for StoreError {
    fn from(e: agora_core::Error) -> Self {
        match e {
            agora_core::Error::Conflict(msg) => StoreError::Conflict(msg),
            agora_core::Error::Io { source } => StoreError::Io(source),
            other => StoreError::Database(other),
        }
    }
}
