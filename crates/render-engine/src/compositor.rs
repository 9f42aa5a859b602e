//! Frame compositor: draws the overlay card on top of a background frame.
//!
//! `render_frame` is a pure function of its inputs. It never seeks, never
//! caches, and never mutates the background or the snapshot, so calling it
//! twice with the same arguments yields identical pixels.

use std::sync::Arc;

use postfully_project_model::export::{ExitAnimation, ExportConfig};
use postfully_project_model::frame::Frame;
use postfully_project_model::overlay::OverlayPlacement;

/// Length of the entrance fade at the start of the visible window.
pub const ENTRANCE_SECS: f64 = 0.5;

/// Upper bound for the exit animation at the end of the visible window.
pub const MAX_EXIT_SECS: f64 = 1.0;

/// Overlay scale at the first instant of the entrance.
pub const ENTRANCE_START_SCALE: f64 = 0.8;

/// Rasterized preview card captured once per export run.
///
/// Cloning shares the pixels; the image is never modified after capture.
#[derive(Debug, Clone)]
pub struct OverlaySnapshot {
    image: Arc<Frame>,
    placement: OverlayPlacement,
}

impl OverlaySnapshot {
    pub fn new(image: Frame, placement: OverlayPlacement) -> Self {
        Self {
            image: Arc::new(image),
            placement,
        }
    }

    pub fn image(&self) -> &Frame {
        &self.image
    }

    pub fn placement(&self) -> OverlayPlacement {
        self.placement
    }
}

/// How the overlay is drawn at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayState {
    /// Opacity in `(0, 1]`.
    pub opacity: f64,
    /// Horizontal offset from the centred position, in canvas pixels.
    pub offset_x_px: f64,
    /// Entrance scale pulse, multiplied with the placement scale.
    pub scale: f64,
}

/// Whether `t` falls inside the overlay's visible window.
pub fn overlay_visible(t: f64, config: &ExportConfig) -> bool {
    config.show_overlay
        && t >= config.overlay_start_secs
        && (!config.disappear_after_time || t <= config.overlay_end_secs())
}

/// Animation state of the overlay at time `t`, or `None` when nothing is drawn.
pub fn overlay_state(t: f64, config: &ExportConfig, canvas_width: f64) -> Option<OverlayState> {
    if !overlay_visible(t, config) {
        return None;
    }

    let entrance = ((t - config.overlay_start_secs) / ENTRANCE_SECS).clamp(0.0, 1.0);
    let mut opacity = entrance;
    let scale = ENTRANCE_START_SCALE + (1.0 - ENTRANCE_START_SCALE) * entrance;
    let mut offset_x_px = 0.0;

    if config.disappear_after_time && config.exit_animation != ExitAnimation::None {
        let exit_len = MAX_EXIT_SECS.min(config.overlay_visible_secs);
        let remaining = config.overlay_end_secs() - t;
        if exit_len > 0.0 && remaining < exit_len {
            let progress = (1.0 - remaining / exit_len).clamp(0.0, 1.0);
            match config.exit_animation {
                ExitAnimation::Fade => opacity = opacity.min(1.0 - progress),
                ExitAnimation::Slide => offset_x_px = -canvas_width * progress,
                ExitAnimation::None => {}
            }
        }
    }

    if opacity <= 0.0 {
        return None;
    }

    Some(OverlayState {
        opacity,
        offset_x_px,
        scale,
    })
}

/// Composite one output frame.
///
/// The background is copied first, full-frame; the overlay (if visible at
/// `t`) is blended on top, centred on the canvas plus the snapshot's
/// placement offset.
pub fn render_frame(
    background: &Frame,
    overlay: Option<&OverlaySnapshot>,
    t: f64,
    config: &ExportConfig,
) -> Frame {
    let mut out = background.clone();

    let Some(snapshot) = overlay else {
        return out;
    };
    let Some(state) = overlay_state(t, config, background.width() as f64) else {
        return out;
    };

    draw_overlay(&mut out, snapshot, state);
    out
}

fn draw_overlay(canvas: &mut Frame, snapshot: &OverlaySnapshot, state: OverlayState) {
    let image = snapshot.image();
    let placement = snapshot.placement();
    let scale = state.scale * placement.scale;
    if image.width() == 0 || image.height() == 0 || scale <= 0.0 {
        return;
    }

    let canvas_w = canvas.width() as f64;
    let canvas_h = canvas.height() as f64;
    let center_x = canvas_w / 2.0 + state.offset_x_px + placement.x;
    let center_y = canvas_h / 2.0 + placement.y;
    let half_w = image.width() as f64 * scale / 2.0;
    let half_h = image.height() as f64 * scale / 2.0;

    let x0 = (center_x - half_w).floor().clamp(0.0, canvas_w) as u32;
    let x1 = (center_x + half_w).ceil().clamp(0.0, canvas_w) as u32;
    let y0 = (center_y - half_h).floor().clamp(0.0, canvas_h) as u32;
    let y1 = (center_y + half_h).ceil().clamp(0.0, canvas_h) as u32;
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let src_w = image.width() as f64;
    let src_h = image.height() as f64;
    let opacity = state.opacity.clamp(0.0, 1.0);

    for y in y0..y1 {
        let sy = ((y as f64 + 0.5 - center_y) / scale + src_h / 2.0).floor();
        if sy < 0.0 || sy >= src_h {
            continue;
        }
        for x in x0..x1 {
            let sx = ((x as f64 + 0.5 - center_x) / scale + src_w / 2.0).floor();
            if sx < 0.0 || sx >= src_w {
                continue;
            }

            let si = image.offset(sx as u32, sy as u32);
            let src = &image.data()[si..si + 4];
            let alpha = src[3] as f64 / 255.0 * opacity;
            if alpha <= 0.0 {
                continue;
            }

            let di = canvas.offset(x, y);
            blend_over(&mut canvas.data_mut()[di..di + 4], src, alpha);
        }
    }
}

/// Straight-alpha source-over.
fn blend_over(dst: &mut [u8], src: &[u8], src_alpha: f64) {
    let dst_alpha = dst[3] as f64 / 255.0;
    let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
    if out_alpha <= 0.0 {
        dst.copy_from_slice(&[0, 0, 0, 0]);
        return;
    }

    for c in 0..3 {
        let value = (src[c] as f64 * src_alpha + dst[c] as f64 * dst_alpha * (1.0 - src_alpha))
            / out_alpha;
        dst[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}
