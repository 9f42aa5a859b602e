//! Error types shared across Postfully crates.

use std::path::PathBuf;

/// Top-level error type for Postfully operations.
///
/// Each variant maps to one user-visible failure condition of an export
/// run. Messages are complete sentences so callers can show them as-is.
#[derive(Debug, thiserror::Error)]
pub enum PostfullyError {
    #[error("Invalid export configuration: {message}")]
    Configuration { message: String },

    #[error("Background source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("Failed to decode background frame {frame_index}: {message}")]
    FrameDecode { frame_index: u64, message: String },

    #[error("Encoding error: {message}")]
    Encoding { message: String },

    #[error("Overlay capture error: {message}")]
    Overlay { message: String },

    #[error("An export is already running on this driver")]
    Busy,

    #[error("Export was cancelled")]
    Cancelled,

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using PostfullyError.
pub type PostfullyResult<T> = Result<T, PostfullyError>;

impl PostfullyError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
        }
    }

    pub fn frame_decode(frame_index: u64, msg: impl Into<String>) -> Self {
        Self::FrameDecode {
            frame_index,
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding {
            message: msg.into(),
        }
    }

    pub fn overlay(msg: impl Into<String>) -> Self {
        Self::Overlay {
            message: msg.into(),
        }
    }

    /// Whether this error marks a cooperative stop rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
