//! Encoder sinks: ordered frame consumers that produce one artifact.
//!
//! A sink receives frames strictly in timeline order and, on
//! [`EncoderSink::finalize`], yields the encoded container as an
//! append-only list of chunks. [`SequencedSink`] wraps any sink and turns
//! out-of-order or mis-sized submissions into hard errors.

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::export::{ExportConfig, ExportFormat};
use postfully_project_model::frame::{Frame, FrameRequest};

pub mod ffmpeg;
pub mod y4m;

pub use ffmpeg::FfmpegSink;
pub use y4m::Y4mSink;

/// Append-only sequence of encoded chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedOutput {
    chunks: Vec<Vec<u8>>,
}

impl EncodedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Concatenate all chunks into the final artifact bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Composite a straight-alpha RGBA pixel over black.
pub(crate) fn flatten_over_black(px: &[u8]) -> [u8; 3] {
    let a = px[3] as u32;
    if a == 255 {
        return [px[0], px[1], px[2]];
    }
    [
        ((px[0] as u32 * a + 127) / 255) as u8,
        ((px[1] as u32 * a + 127) / 255) as u8,
        ((px[2] as u32 * a + 127) / 255) as u8,
    ]
}

/// A streaming video encoder.
#[async_trait::async_trait]
pub trait EncoderSink: Send {
    /// Container produced by this sink.
    fn format(&self) -> ExportFormat;

    /// Encode one frame.
    async fn submit(&mut self, request: FrameRequest, frame: &Frame) -> PostfullyResult<()>;

    /// Flush and return the complete artifact.
    async fn finalize(self: Box<Self>) -> PostfullyResult<EncodedOutput>;

    /// Discard everything buffered so far.
    async fn abort(self: Box<Self>);
}

/// Opens a sink for a validated export config.
#[async_trait::async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open_sink(&self, config: &ExportConfig) -> PostfullyResult<Box<dyn EncoderSink>>;
}

/// Picks the sink from `config.format`: Y4M in-process, WebM/MP4 via ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct FormatSinkFactory;

#[async_trait::async_trait]
impl SinkFactory for FormatSinkFactory {
    async fn open_sink(&self, config: &ExportConfig) -> PostfullyResult<Box<dyn EncoderSink>> {
        match config.format {
            ExportFormat::Y4m => Ok(Box::new(Y4mSink::new(
                config.width,
                config.height,
                config.frame_rate,
            ))),
            format @ (ExportFormat::Webm | ExportFormat::Mp4) => Ok(Box::new(
                FfmpegSink::spawn(format, config.width, config.height, config.frame_rate).await?,
            )),
        }
    }
}

/// Enforces strictly increasing, correctly sized submissions.
pub struct SequencedSink {
    inner: Box<dyn EncoderSink>,
    width: u32,
    height: u32,
    last: Option<FrameRequest>,
    submitted: u64,
}

impl SequencedSink {
    pub fn new(inner: Box<dyn EncoderSink>, width: u32, height: u32) -> Self {
        Self {
            inner,
            width,
            height,
            last: None,
            submitted: 0,
        }
    }

    pub fn format(&self) -> ExportFormat {
        self.inner.format()
    }

    /// Frames accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub async fn submit(&mut self, request: FrameRequest, frame: &Frame) -> PostfullyResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PostfullyError::encoding(format!(
                "frame {} is {}x{}, sink expects {}x{}",
                request.frame_index, frame.width(), frame.height(), self.width, self.height
            )));
        }

        if let Some(last) = self.last {
            if request.frame_index <= last.frame_index
                || request.timestamp_secs <= last.timestamp_secs
            {
                return Err(PostfullyError::encoding(format!(
                    "out-of-order submission: frame {} ({:.4}s) after frame {} ({:.4}s)",
                    request.frame_index,
                    request.timestamp_secs,
                    last.frame_index,
                    last.timestamp_secs
                )));
            }
        }

        self.inner.submit(request, frame).await?;
        self.last = Some(request);
        self.submitted += 1;
        Ok(())
    }

    pub async fn finalize(self) -> PostfullyResult<EncodedOutput> {
        self.inner.finalize().await
    }

    pub async fn abort(self) {
        self.inner.abort().await
    }
}
