//! Postfully Render Engine
//!
//! Composites the captured mockup card over an animated background and
//! streams the result into an encoder, one frame at a time.
//!
//! # Pipeline Architecture
//!
//! ```text
//! BackgroundProvider ─► BackgroundSource ──┐ frame_at(t mod loop)
//!                                          ├── Frame Compositor (render_frame)
//! OverlayCapture ─► OverlaySnapshot ───────┘         │
//!                                                    ▼
//!                                          SequencedSink ─► EncoderSink
//!                                                    │
//!                                                    ▼
//!                                          EncodedOutput ─► ExportArtifact ─► deliver
//! ```
//!
//! The [`export::ExportDriver`] owns the loop: frames are produced strictly
//! in index order, each fully composited and submitted before the next
//! background fetch starts.

pub mod background;
pub mod compositor;
pub mod encoder;
pub mod export;
pub mod media_tools;
pub mod overlay;
pub mod still;

pub use background::{acquire_background, BackgroundProvider, BackgroundSource};
pub use compositor::{overlay_state, render_frame, OverlaySnapshot, OverlayState};
pub use encoder::{EncodedOutput, EncoderSink, FormatSinkFactory, SequencedSink, SinkFactory};
pub use export::*;
pub use overlay::{OverlayCapture, PngOverlay, StaticOverlay};
pub use still::{encode_png, export_overlay_png, export_still};
