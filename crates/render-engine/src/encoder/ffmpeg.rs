//! WebM/MP4 encoding through the system `ffmpeg` binary.
//!
//! Frames are streamed as raw RGB24 on stdin. ffmpeg writes the container
//! to a scratch file (MP4 needs a seekable output for `+faststart`), which
//! is read back into chunks on finalize and then removed.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::export::ExportFormat;
use postfully_project_model::frame::{Frame, FrameRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use super::{flatten_over_black, EncodedOutput, EncoderSink};
use crate::media_tools::command_exists;

/// Chunk size used when reading the finished container back.
const OUTPUT_CHUNK_BYTES: usize = 1 << 20;

/// Target bitrate, matching what browser recorders use for this canvas size.
const VIDEO_BITRATE: &str = "5000k";

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Check that `format` can be produced by ffmpeg at this size.
pub fn validate(format: ExportFormat, width: u32, height: u32, fps: u32) -> PostfullyResult<()> {
    if !format.requires_ffmpeg() {
        return Err(PostfullyError::encoding(format!(
            "{} is not encoded through ffmpeg",
            format.extension()
        )));
    }
    if width == 0 || height == 0 || fps == 0 {
        return Err(PostfullyError::encoding(format!(
            "invalid stream parameters {width}x{height} @ {fps} fps"
        )));
    }
    if format.requires_even_dimensions() && (width % 2 != 0 || height % 2 != 0) {
        return Err(PostfullyError::encoding(format!(
            "{} with yuv420p needs even dimensions, got {width}x{height}",
            format.extension()
        )));
    }
    Ok(())
}

fn codec_args(format: ExportFormat) -> Vec<&'static str> {
    match format {
        ExportFormat::Webm => vec![
            "-c:v",
            "libvpx-vp9",
            "-b:v",
            VIDEO_BITRATE,
            "-deadline",
            "realtime",
            "-pix_fmt",
            "yuv420p",
            "-f",
            "webm",
        ],
        ExportFormat::Mp4 => vec![
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-b:v",
            VIDEO_BITRATE,
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
            "-f",
            "mp4",
        ],
        ExportFormat::Y4m => Vec::new(),
    }
}

/// A running ffmpeg process fed one frame at a time.
pub struct FfmpegSink {
    format: ExportFormat,
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    scratch: PathBuf,
    rgb: Vec<u8>,
}

impl FfmpegSink {
    /// Start ffmpeg for a `width`x`height` stream at `fps`.
    pub async fn spawn(
        format: ExportFormat,
        width: u32,
        height: u32,
        fps: u32,
    ) -> PostfullyResult<Self> {
        validate(format, width, height, fps)?;
        if !command_exists("ffmpeg") {
            return Err(PostfullyError::encoding(
                "ffmpeg is required for WebM/MP4 export, but was not found on PATH",
            ));
        }

        let scratch = std::env::temp_dir().join(format!(
            "postfully-{}-{}.{}",
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed),
            format.extension()
        ));

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(fps.to_string())
            .args(["-i", "pipe:0", "-an"])
            .args(codec_args(format))
            .arg(&scratch)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| PostfullyError::encoding(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            format = format.extension(),
            width,
            height,
            fps,
            "ffmpeg encoder started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PostfullyError::encoding("Failed to capture ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PostfullyError::encoding("Failed to capture ffmpeg stderr"))?;

        // ffmpeg blocks once its stderr pipe fills up, so drain it concurrently.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        Ok(Self {
            format,
            width,
            height,
            child,
            stdin: Some(stdin),
            stderr_task: Some(stderr_task),
            scratch,
            rgb: Vec::with_capacity(width as usize * height as usize * 3),
        })
    }

    async fn collect_stderr(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|_| "<failed to join stderr reader>".to_string()),
            None => String::new(),
        }
    }

    async fn read_scratch(&self) -> PostfullyResult<EncodedOutput> {
        let mut file = tokio::fs::File::open(&self.scratch).await.map_err(|e| {
            PostfullyError::encoding(format!(
                "ffmpeg produced no output at {}: {e}",
                self.scratch.display()
            ))
        })?;
        let mut output = EncodedOutput::new();
        loop {
            let mut chunk = vec![0u8; OUTPUT_CHUNK_BYTES];
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            chunk.truncate(n);
            output.push(chunk);
        }
        Ok(output)
    }

    async fn remove_scratch(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.scratch.display(), error = %e, "Failed to remove encoder scratch file");
            }
        }
    }
}

impl Drop for FfmpegSink {
    // Covers sinks dropped without finalize or abort, e.g. while unwinding.
    fn drop(&mut self) {
        match std::fs::remove_file(&self.scratch) {
            Ok(()) => tracing::debug!(path = %self.scratch.display(), "Removed leftover encoder scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.scratch.display(), error = %e, "Failed to remove encoder scratch file"),
        }
    }
}

fn status_error(status: ExitStatus, stderr: &str) -> PostfullyError {
    PostfullyError::encoding(format!(
        "ffmpeg exited with {status}: {}",
        stderr.trim()
    ))
}

#[async_trait::async_trait]
impl EncoderSink for FfmpegSink {
    fn format(&self) -> ExportFormat {
        self.format
    }

    async fn submit(&mut self, request: FrameRequest, frame: &Frame) -> PostfullyResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PostfullyError::encoding(format!(
                "ffmpeg stream is {}x{}, frame {} is {}x{}",
                self.width, self.height, request.frame_index, frame.width(), frame.height()
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PostfullyError::encoding("ffmpeg stdin is already closed"))?;

        self.rgb.clear();
        for px in frame.data().chunks_exact(4) {
            self.rgb.extend_from_slice(&flatten_over_black(px));
        }
        stdin.write_all(&self.rgb).await.map_err(|e| {
            PostfullyError::encoding(format!(
                "ffmpeg stopped accepting frames at frame {}: {e}",
                request.frame_index
            ))
        })
    }

    async fn finalize(mut self: Box<Self>) -> PostfullyResult<EncodedOutput> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await.ok();
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| PostfullyError::encoding(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr = self.collect_stderr().await;

        if !status.success() {
            self.remove_scratch().await;
            return Err(status_error(status, &stderr));
        }

        let output = self.read_scratch().await;
        self.remove_scratch().await;
        let output = output?;
        tracing::info!(
            bytes = output.byte_len(),
            chunks = output.chunk_count(),
            "ffmpeg encoder finished"
        );
        Ok(output)
    }

    async fn abort(mut self: Box<Self>) {
        self.stdin.take();
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        let _ = self.collect_stderr().await;
        self.remove_scratch().await;
        tracing::info!("ffmpeg encoder aborted");
    }
}
