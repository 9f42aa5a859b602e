//! Single-frame PNG export.

use std::io::Cursor;

use image::{ImageFormat, RgbaImage};

use postfully_common::clock::{wrap_time, FrameClock};
use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::artifact::ExportArtifact;
use postfully_project_model::export::ExportConfig;
use postfully_project_model::frame::Frame;

use crate::background::BackgroundSource;
use crate::compositor::{render_frame, OverlaySnapshot};

/// Default file name for a bare overlay export.
pub const OVERLAY_PNG_FILE_NAME: &str = "phone-preview.png";

/// Encode a frame as PNG, keeping its alpha channel.
pub fn encode_png(frame: &Frame) -> PostfullyResult<Vec<u8>> {
    let image = RgbaImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
        .ok_or_else(|| PostfullyError::encoding("frame buffer does not match its dimensions"))?;
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| PostfullyError::encoding(format!("PNG encoding failed: {e}")))?;
    Ok(out.into_inner())
}

/// Composite the frame at `t` and return it as PNG bytes.
///
/// Uses the same time wrapping and overlay rules as a video export, so the
/// result matches the corresponding video frame before encoding.
pub async fn export_still(
    source: &mut dyn BackgroundSource,
    snapshot: Option<&OverlaySnapshot>,
    t: f64,
    config: &ExportConfig,
) -> PostfullyResult<Vec<u8>> {
    let config = config
        .validated()
        .map_err(|e| PostfullyError::configuration(e.to_string()))?;
    if !t.is_finite() || t < 0.0 {
        return Err(PostfullyError::configuration(format!(
            "still time must be a non-negative number of seconds, got {t}"
        )));
    }

    let frame_index = FrameClock::new(config.frame_rate).secs_to_frame(t);
    let source_t = wrap_time(t, source.native_duration_secs());
    let background = source
        .frame_at(source_t)
        .await
        .map_err(|e| PostfullyError::frame_decode(frame_index, e.to_string()))?;
    if background.width() != config.width || background.height() != config.height {
        return Err(PostfullyError::frame_decode(
            frame_index,
            format!(
                "{} produced {}x{}, canvas is {}x{}",
                source.name(),
                background.width(),
                background.height(),
                config.width,
                config.height
            ),
        ));
    }

    let frame = render_frame(&background, snapshot, t, &config);
    tracing::debug!(t, frame_index, "Still frame rendered");
    encode_png(&frame)
}

/// The overlay card alone, as a downloadable PNG.
pub fn export_overlay_png(snapshot: &OverlaySnapshot) -> PostfullyResult<ExportArtifact> {
    Ok(ExportArtifact {
        bytes: encode_png(snapshot.image())?,
        file_name: OVERLAY_PNG_FILE_NAME.to_string(),
        mime_type: "image/png".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::ProceduralBackground;
    use crate::overlay::decode_image;
    use postfully_project_model::export::BackgroundKind;
    use postfully_project_model::overlay::OverlayPlacement;

    fn small_config() -> ExportConfig {
        ExportConfig {
            width: 20,
            height: 36,
            ..ExportConfig::default()
        }
    }

    #[test]
    fn test_png_signature() {
        let bytes = encode_png(&Frame::solid(2, 2, [1, 2, 3, 4])).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn test_still_matches_compositor_output() {
        let config = small_config();
        let mut source =
            ProceduralBackground::new(BackgroundKind::Minecraft, 20, 36, None, 0).unwrap();
        let snapshot = OverlaySnapshot::new(
            Frame::solid(8, 8, [255, 255, 255, 255]),
            OverlayPlacement::CENTERED,
        );

        let png = export_still(&mut source, Some(&snapshot), 3.0, &config)
            .await
            .unwrap();
        let expected = render_frame(&source.render(3.0), Some(&snapshot), 3.0, &config);
        assert_eq!(decode_image(&png).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_still_rejects_negative_time() {
        let mut source =
            ProceduralBackground::new(BackgroundKind::Minecraft, 20, 36, None, 0).unwrap();
        let err = export_still(&mut source, None, -1.0, &small_config())
            .await
            .unwrap_err();
        assert!(matches!(err, PostfullyError::Configuration { .. }));
    }

    #[test]
    fn test_overlay_png_artifact() {
        let snapshot = OverlaySnapshot::new(
            Frame::solid(3, 3, [9, 9, 9, 255]),
            OverlayPlacement::CENTERED,
        );
        let artifact = export_overlay_png(&snapshot).unwrap();
        assert_eq!(artifact.file_name, "phone-preview.png");
        assert_eq!(artifact.mime_type, "image/png");
        assert!(!artifact.is_empty());
    }
}
