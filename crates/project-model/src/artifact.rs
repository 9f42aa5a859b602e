//! The deliverable produced by a completed export.

use chrono::{DateTime, Utc};

use crate::export::{BackgroundKind, ExportFormat};

/// A complete encoded video, ready to hand to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    /// Encoded container bytes.
    pub bytes: Vec<u8>,
    /// Suggested download file name.
    pub file_name: String,
    /// MIME type of `bytes`.
    pub mime_type: String,
}

impl ExportArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Suggested file name: `reddit-story-<background>-<unix millis>.<ext>`.
pub fn artifact_file_name(
    background: BackgroundKind,
    format: ExportFormat,
    at: DateTime<Utc>,
) -> String {
    format!(
        "reddit-story-{}-{}.{}",
        background.slug(),
        at.timestamp_millis(),
        format.extension()
    )
}
