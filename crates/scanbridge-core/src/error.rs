// SPDX-License-Identifier: MIT
//
// Unified error types for Scanbridge.

use thiserror::Error;

use crate::types::SessionId;

/// Top-level error type for all Scanbridge operations.
#[derive(Debug, Error)]
pub enum ScanbridgeError {
    // -- Session errors --
    #[error("scan session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("image index {index} out of range (session has {len} images)")]
    ImageIndexOutOfRange { index: usize, len: usize },

    #[error("image payload is empty")]
    EmptyImagePayload,

    #[error("session limit reached ({0} live sessions)")]
    SessionLimit(usize),

    #[error("image limit reached ({0} images per session)")]
    ImageLimit(usize),

    // -- Document errors --
    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("image processing failed: {0}")]
    ImageError(String),

    // -- Transport errors --
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("scan server error: {0}")]
    Server(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanbridgeError {
    /// Whether this error is the normal, recoverable "session is gone"
    /// condition (expired, completed, or never created).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanbridgeError>;
