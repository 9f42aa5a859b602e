//! YUV4MPEG2 writer.
//!
//! Uncompressed 4:4:4 planar output with BT.601 studio-range coefficients.
//! Playable by ffmpeg/mpv and useful when no external encoder is installed.

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::export::ExportFormat;
use postfully_project_model::frame::{Frame, FrameRequest};

use super::{flatten_over_black, EncodedOutput, EncoderSink};

/// Encodes frames into an in-memory `.y4m` stream, one chunk per frame.
#[derive(Debug)]
pub struct Y4mSink {
    width: u32,
    height: u32,
    output: EncodedOutput,
}

impl Y4mSink {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let mut output = EncodedOutput::new();
        output.push(stream_header(width, height, fps).into_bytes());
        Self {
            width,
            height,
            output,
        }
    }
}

fn stream_header(width: u32, height: u32, fps: u32) -> String {
    format!("YUV4MPEG2 W{width} H{height} F{}:1 Ip A1:1 C444\n", fps.max(1))
}

#[async_trait::async_trait]
impl EncoderSink for Y4mSink {
    fn format(&self) -> ExportFormat {
        ExportFormat::Y4m
    }

    async fn submit(&mut self, request: FrameRequest, frame: &Frame) -> PostfullyResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PostfullyError::encoding(format!(
                "y4m stream is {}x{}, frame {} is {}x{}",
                self.width, self.height, request.frame_index, frame.width(), frame.height()
            )));
        }
        self.output.push(encode_frame(frame));
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> PostfullyResult<EncodedOutput> {
        Ok(self.output)
    }

    async fn abort(self: Box<Self>) {}
}

/// `FRAME\n` followed by the Y, Cb and Cr planes.
fn encode_frame(frame: &Frame) -> Vec<u8> {
    const TAG: &[u8] = b"FRAME\n";
    let plane = frame.width() as usize * frame.height() as usize;
    let mut out = vec![0u8; TAG.len() + plane * 3];
    out[..TAG.len()].copy_from_slice(TAG);

    let (_, planes) = out.split_at_mut(TAG.len());
    let (y_plane, rest) = planes.split_at_mut(plane);
    let (u_plane, v_plane) = rest.split_at_mut(plane);

    for (i, px) in frame.data().chunks_exact(4).enumerate() {
        let (y, u, v) = rgb_to_yuv(flatten_over_black(px));
        y_plane[i] = y;
        u_plane[i] = u;
        v_plane[i] = v;
    }
    out
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}
