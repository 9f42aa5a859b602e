//! Overlay capture: rasterizing the mockup card once per export.

use std::path::PathBuf;

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::frame::Frame;
use postfully_project_model::overlay::OverlayPlacement;

use crate::compositor::OverlaySnapshot;

/// Produces the rasterized preview card.
///
/// Invoked at most once per export run, before the first frame.
#[async_trait::async_trait]
pub trait OverlayCapture: Send + Sync {
    async fn capture_overlay(&self) -> PostfullyResult<Frame>;
}

/// Capture the card and pin it to `placement` for the rest of the run.
pub async fn capture_snapshot(
    capture: &dyn OverlayCapture,
    placement: OverlayPlacement,
) -> PostfullyResult<OverlaySnapshot> {
    let image = capture.capture_overlay().await?;
    if image.width() == 0 || image.height() == 0 {
        return Err(PostfullyError::overlay("captured overlay is empty"));
    }
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        x = placement.x,
        y = placement.y,
        scale = placement.scale,
        "Overlay snapshot captured"
    );
    Ok(OverlaySnapshot::new(image, placement))
}

/// A card already rendered to a PNG file.
#[derive(Debug, Clone)]
pub struct PngOverlay {
    path: PathBuf,
}

impl PngOverlay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl OverlayCapture for PngOverlay {
    async fn capture_overlay(&self) -> PostfullyResult<Frame> {
        if !self.path.exists() {
            return Err(PostfullyError::FileNotFound {
                path: self.path.clone(),
            });
        }
        let bytes = tokio::fs::read(&self.path).await?;
        decode_image(&bytes).map_err(|e| {
            PostfullyError::overlay(format!("failed to decode {}: {e}", self.path.display()))
        })
    }
}

/// An overlay supplied directly as pixels.
#[derive(Debug, Clone)]
pub struct StaticOverlay(pub Frame);

#[async_trait::async_trait]
impl OverlayCapture for StaticOverlay {
    async fn capture_overlay(&self) -> PostfullyResult<Frame> {
        Ok(self.0.clone())
    }
}

/// Decode an encoded image into straight-alpha RGBA.
pub fn decode_image(bytes: &[u8]) -> anyhow::Result<Frame> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Frame::from_rgba(width, height, rgba.into_raw())?)
}
