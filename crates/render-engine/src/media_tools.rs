//! Thin wrappers around the system `ffmpeg`/`ffprobe` binaries.
//!
//! We shell out instead of linking FFmpeg so the crate builds without
//! native media headers.

use std::path::Path;
use std::process::Stdio;

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::frame::Frame;
use tokio::process::Command;

/// Check whether a binary is on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Used when a stream reports no usable frame rate.
const FALLBACK_FRAME_INTERVAL_SECS: f64 = 1.0 / 30.0;

/// Timing of a clip's first video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoTiming {
    /// Length of the video stream. Often shorter than the container when
    /// an audio track runs past the last picture.
    pub duration_secs: f64,
    /// Spacing between decoded frames.
    pub frame_interval_secs: f64,
}

impl VideoTiming {
    /// Latest seek target that still yields a picture: half a frame before
    /// the last frame's timestamp.
    pub fn last_frame_secs(&self) -> f64 {
        (self.duration_secs - 1.5 * self.frame_interval_secs).max(0.0)
    }
}

/// Read the first video stream's duration and frame rate.
///
/// Falls back to the container duration when the stream carries none
/// (common for WebM/Matroska).
pub async fn read_video_timing(path: &Path) -> PostfullyResult<VideoTiming> {
    let raw = run_ffprobe(
        path,
        &[
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=duration,avg_frame_rate",
            "-of",
            "default=noprint_wrappers=1",
        ],
    )
    .await?;
    let (stream_duration, frame_interval) = parse_stream_timing(&raw);

    let duration_secs = match stream_duration {
        Some(secs) => secs,
        None => read_container_duration_secs(path).await?,
    };
    Ok(VideoTiming {
        duration_secs,
        frame_interval_secs: frame_interval.unwrap_or(FALLBACK_FRAME_INTERVAL_SECS),
    })
}

async fn read_container_duration_secs(path: &Path) -> PostfullyResult<f64> {
    let raw = run_ffprobe(
        path,
        &[
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ],
    )
    .await?;
    raw.lines()
        .next()
        .and_then(|line| parse_positive(line.trim()))
        .ok_or_else(|| {
            PostfullyError::source_unavailable(format!(
                "ffprobe reported no usable duration for {}",
                path.display()
            ))
        })
}

async fn run_ffprobe(path: &Path, args: &[&str]) -> PostfullyResult<String> {
    let output = Command::new("ffprobe")
        .args(["-v", "error"])
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            PostfullyError::source_unavailable(format!(
                "failed to run ffprobe (is it installed and on PATH?): {e}"
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PostfullyError::source_unavailable(format!(
            "ffprobe could not read {}: {}",
            path.display(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `duration=` and `avg_frame_rate=` lines of ffprobe's default writer.
fn parse_stream_timing(raw: &str) -> (Option<f64>, Option<f64>) {
    let mut duration = None;
    let mut interval = None;
    for line in raw.lines() {
        match line.trim().split_once('=') {
            Some(("duration", value)) => duration = parse_positive(value),
            Some(("avg_frame_rate", value)) => interval = parse_rate(value).map(|fps| 1.0 / fps),
            _ => {}
        }
    }
    (duration, interval)
}

/// `30000/1001` style rational; `0/0` means unknown.
fn parse_rate(value: &str) -> Option<f64> {
    let (num, den) = value.split_once('/')?;
    let rate = parse_positive(num)? / parse_positive(den)?;
    rate.is_finite().then_some(rate)
}

fn parse_positive(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Decode a single frame at `t` seconds, scaled to `width`x`height` RGBA.
pub async fn decode_frame_at(path: &Path, t: f64, width: u32, height: u32) -> PostfullyResult<Frame> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-ss"])
        .arg(format!("{:.3}", t.max(0.0)))
        .arg("-i")
        .arg(path)
        .args([
            "-frames:v",
            "1",
            "-an",
            "-vf",
            &format!("scale={width}:{height}"),
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PostfullyError::Other(anyhow::anyhow!("failed to run ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PostfullyError::Other(anyhow::anyhow!(
            "ffmpeg exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Frame::from_rgba(width, height, output.stdout).map_err(|e| {
        PostfullyError::Other(anyhow::anyhow!("ffmpeg returned a partial frame at {t:.3}s: {e}"))
    })
}

/// Detect a Git LFS pointer file checked out in place of real media.
pub fn is_lfs_pointer(head: &[u8]) -> bool {
    head.starts_with(b"version https://git-lfs")
}
