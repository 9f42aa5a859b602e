//! Overlay placement for the captured mockup card.

use serde::{Deserialize, Serialize};

/// User pan/zoom applied to the overlay.
///
/// `x`/`y` are pixel offsets added to the centred position; `scale`
/// multiplies the overlay size. Captured once with the snapshot, never
/// recomputed per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayPlacement {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl OverlayPlacement {
    /// Centred, unscaled.
    pub const CENTERED: OverlayPlacement = OverlayPlacement {
        x: 0.0,
        y: 0.0,
        scale: 1.0,
    };

    /// Create a placement, clamping scale to a usable range.
    pub fn new(x: f64, y: f64, scale: f64) -> Self {
        let scale = if scale.is_finite() {
            scale.clamp(0.05, 20.0)
        } else {
            1.0
        };
        Self {
            x: if x.is_finite() { x } else { 0.0 },
            y: if y.is_finite() { y } else { 0.0 },
            scale,
        }
    }
}

impl Default for OverlayPlacement {
    fn default() -> Self {
        Self::CENTERED
    }
}
