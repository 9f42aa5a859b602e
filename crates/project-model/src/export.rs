//! Export configuration for a single render run.
//!
//! An `ExportConfig` is built once from user input when an export starts
//! and is never mutated afterwards. Use [`ExportConfig::validated`] to get
//! a config whose overlay window fits inside the timeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Frame rate used by every export.
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Default canvas size (9:16 portrait, matches the preview card).
pub const DEFAULT_CANVAS_WIDTH: u32 = 540;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 960;

/// Immutable settings of one export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Length of the exported clip.
    pub total_duration_secs: f64,

    /// When the overlay starts to appear.
    pub overlay_start_secs: f64,

    /// How long the overlay stays visible (when `disappear_after_time`).
    pub overlay_visible_secs: f64,

    /// Animation used when the overlay leaves.
    #[serde(default)]
    pub exit_animation: ExitAnimation,

    /// Whether the overlay is drawn at all.
    #[serde(default = "default_true")]
    pub show_overlay: bool,

    /// Whether the overlay disappears after `overlay_visible_secs`.
    #[serde(default = "default_true")]
    pub disappear_after_time: bool,

    /// Output frame rate.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Canvas size in pixels.
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,

    /// Output container.
    #[serde(default)]
    pub format: ExportFormat,
}

/// How the overlay leaves the frame at the end of its visible window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitAnimation {
    /// Disappear instantly.
    None,
    /// Opacity ramps to zero.
    #[default]
    Fade,
    /// Slides off the left edge of the canvas.
    Slide,
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// VP9 in WebM (requires ffmpeg).
    #[default]
    Webm,
    /// H.264 in MP4 (requires ffmpeg).
    Mp4,
    /// Uncompressed YUV4MPEG2, written without external tools.
    Y4m,
}

/// Named background loops offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundKind {
    Minecraft,
    SubwaySurfers,
}

/// Errors raised while validating data contracts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("{total_duration_secs}s at {frame_rate} fps produces no frames")]
    NoFrames {
        total_duration_secs: f64,
        frame_rate: u32,
    },

    #[error("{format} output needs even canvas dimensions, got {width}x{height}")]
    OddDimensions {
        format: &'static str,
        width: u32,
        height: u32,
    },

    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            total_duration_secs: 10.0,
            overlay_start_secs: 2.0,
            overlay_visible_secs: 6.0,
            exit_animation: ExitAnimation::Fade,
            show_overlay: true,
            disappear_after_time: true,
            frame_rate: DEFAULT_FRAME_RATE,
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
            format: ExportFormat::Webm,
        }
    }
}

impl ExportConfig {
    /// Check the config and clamp the overlay window into the timeline.
    ///
    /// Values that cannot describe any timeline (non-finite numbers, a
    /// non-positive duration, zero frame rate or canvas) are rejected, as
    /// are durations too short for a single frame and odd canvas sizes for
    /// formats encoded as 4:2:0. An overlay window that overruns the timeline is clamped instead:
    /// a negative start becomes `0`, a start past the end becomes the end,
    /// and the visible duration is shortened to `total - start`.
    pub fn validated(&self) -> Result<ExportConfig, ModelError> {
        check_finite("total_duration_secs", self.total_duration_secs)?;
        check_finite("overlay_start_secs", self.overlay_start_secs)?;
        check_finite("overlay_visible_secs", self.overlay_visible_secs)?;
        check_positive("total_duration_secs", self.total_duration_secs)?;
        check_positive("overlay_visible_secs", self.overlay_visible_secs)?;
        check_positive("frame_rate", self.frame_rate as f64)?;
        check_positive("width", self.width as f64)?;
        check_positive("height", self.height as f64)?;

        if self.total_frames() == 0 {
            return Err(ModelError::NoFrames {
                total_duration_secs: self.total_duration_secs,
                frame_rate: self.frame_rate,
            });
        }
        if self.format.requires_even_dimensions() && (self.width % 2 != 0 || self.height % 2 != 0)
        {
            return Err(ModelError::OddDimensions {
                format: self.format.extension(),
                width: self.width,
                height: self.height,
            });
        }

        let total = self.total_duration_secs;
        let start = self.overlay_start_secs.clamp(0.0, total);
        let visible = self.overlay_visible_secs.min(total - start);

        Ok(ExportConfig {
            overlay_start_secs: start,
            overlay_visible_secs: visible,
            ..self.clone()
        })
    }

    /// End of the overlay's visible window.
    pub fn overlay_end_secs(&self) -> f64 {
        self.overlay_start_secs + self.overlay_visible_secs
    }

    /// Number of frames in the run: `round(total_duration_secs * frame_rate)`.
    pub fn total_frames(&self) -> u64 {
        (self.total_duration_secs.max(0.0) * self.frame_rate as f64).round() as u64
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ModelError::NotFinite { field, value })
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ModelError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ModelError::NotPositive { field, value })
    }
}

fn default_true() -> bool {
    true
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE
}

fn default_width() -> u32 {
    DEFAULT_CANVAS_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_CANVAS_HEIGHT
}

impl ExportFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Webm => "video/webm",
            ExportFormat::Mp4 => "video/mp4",
            ExportFormat::Y4m => "video/x-yuv4mpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Webm => "webm",
            ExportFormat::Mp4 => "mp4",
            ExportFormat::Y4m => "y4m",
        }
    }

    /// Whether encoding needs the system `ffmpeg` binary.
    pub fn requires_ffmpeg(&self) -> bool {
        !matches!(self, ExportFormat::Y4m)
    }

    /// Whether the codec subsamples chroma 4:2:0, which needs even sides.
    pub fn requires_even_dimensions(&self) -> bool {
        matches!(self, ExportFormat::Webm | ExportFormat::Mp4)
    }
}

impl FromStr for ExportFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webm" => Ok(ExportFormat::Webm),
            "mp4" => Ok(ExportFormat::Mp4),
            "y4m" => Ok(ExportFormat::Y4m),
            other => Err(ModelError::UnknownVariant {
                kind: "export format",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for ExitAnimation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ExitAnimation::None),
            "fade" => Ok(ExitAnimation::Fade),
            "slide" => Ok(ExitAnimation::Slide),
            other => Err(ModelError::UnknownVariant {
                kind: "exit animation",
                value: other.to_string(),
            }),
        }
    }
}

impl BackgroundKind {
    pub const ALL: [BackgroundKind; 2] = [BackgroundKind::Minecraft, BackgroundKind::SubwaySurfers];

    /// Identifier used in file names and on the command line.
    pub fn slug(&self) -> &'static str {
        match self {
            BackgroundKind::Minecraft => "minecraft",
            BackgroundKind::SubwaySurfers => "subway-surfers",
        }
    }

    /// Display name.
    pub fn label(&self) -> &'static str {
        match self {
            BackgroundKind::Minecraft => "Minecraft",
            BackgroundKind::SubwaySurfers => "Subway Surfers",
        }
    }

    /// File name of the matching background clip.
    pub fn clip_file_name(&self) -> String {
        format!("{}-background.mp4", self.slug())
    }
}

impl fmt::Display for BackgroundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for BackgroundKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        BackgroundKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == needle)
            .ok_or(ModelError::UnknownVariant {
                kind: "background",
                value: needle,
            })
    }
}
