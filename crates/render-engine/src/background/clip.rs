//! Background clips decoded from video files on disk.

use std::path::{Path, PathBuf};

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::export::BackgroundKind;
use postfully_project_model::frame::Frame;

use super::{BackgroundProvider, BackgroundSource};
use crate::media_tools::{
    command_exists, decode_frame_at, is_lfs_pointer, read_video_timing, VideoTiming,
};

/// Opens `<dir>/<slug>-background.mp4` for the requested kind.
#[derive(Debug, Clone)]
pub struct ClipProvider {
    dir: PathBuf,
}

impl ClipProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the clip that would be used for `kind`.
    pub fn clip_path(&self, kind: BackgroundKind) -> PathBuf {
        self.dir.join(kind.clip_file_name())
    }
}

#[async_trait::async_trait]
impl BackgroundProvider for ClipProvider {
    fn name(&self) -> &str {
        "clip"
    }

    async fn open(
        &self,
        kind: BackgroundKind,
        width: u32,
        height: u32,
    ) -> PostfullyResult<Box<dyn BackgroundSource>> {
        let path = self.clip_path(kind);
        if !path.exists() {
            return Err(PostfullyError::FileNotFound { path });
        }
        check_not_lfs_pointer(&path).await?;

        if !command_exists("ffmpeg") || !command_exists("ffprobe") {
            return Err(PostfullyError::source_unavailable(
                "ffmpeg and ffprobe are required to decode background clips, but were not found on PATH",
            ));
        }

        let timing = read_video_timing(&path).await?;
        tracing::debug!(
            path = %path.display(),
            duration_secs = timing.duration_secs,
            frame_interval_secs = timing.frame_interval_secs,
            "Opened background clip"
        );

        Ok(Box::new(ClipBackground {
            name: format!("clip:{}", kind.slug()),
            path,
            width,
            height,
            timing,
            closed: false,
        }))
    }
}

async fn check_not_lfs_pointer(path: &Path) -> PostfullyResult<()> {
    use tokio::io::AsyncReadExt as _;

    let mut file = tokio::fs::File::open(path).await?;
    let mut head = [0u8; 64];
    let n = file.read(&mut head).await?;
    if is_lfs_pointer(&head[..n]) {
        return Err(PostfullyError::source_unavailable(format!(
            "{} is a Git LFS pointer, not a video; run `git lfs pull` to fetch the real file",
            path.display()
        )));
    }
    Ok(())
}

/// A looping video clip; each frame is decoded by seeking.
#[derive(Debug)]
pub struct ClipBackground {
    name: String,
    path: PathBuf,
    width: u32,
    height: u32,
    timing: VideoTiming,
    closed: bool,
}

#[async_trait::async_trait]
impl BackgroundSource for ClipBackground {
    fn name(&self) -> &str {
        &self.name
    }

    fn native_duration_secs(&self) -> Option<f64> {
        Some(self.timing.duration_secs)
    }

    async fn frame_at(&mut self, t: f64) -> PostfullyResult<Frame> {
        if self.closed {
            return Err(PostfullyError::source_unavailable(format!(
                "{} is already closed",
                self.name
            )));
        }
        // Seeks past the last picture decode nothing; hold the final frame instead.
        let t = t.clamp(0.0, self.timing.last_frame_secs());
        decode_frame_at(&self.path, t, self.width, self.height).await
    }

    async fn close(&mut self) -> PostfullyResult<()> {
        self.closed = true;
        Ok(())
    }
}
