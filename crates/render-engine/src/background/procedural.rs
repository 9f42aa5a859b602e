//! Procedural themed backgrounds.
//!
//! Each frame is a pure function of time: a drifting three-stop gradient
//! that cycles through the theme palette twice a second, plus theme
//! shapes (floating blocks for Minecraft, rails and falling circles for
//! Subway Surfers). Geometry is authored for a 540x960 canvas and scaled
//! to the requested size, then rasterized with `vello_cpu`.

use vello_cpu::kurbo::{Circle, Point, Rect, Shape};
use vello_cpu::peniko::{Color, Gradient};
use vello_cpu::{Pixmap, RenderContext};

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::export::BackgroundKind;
use postfully_project_model::frame::Frame;

use super::{BackgroundProvider, BackgroundSource};

const REFERENCE_WIDTH: f64 = 540.0;
const REFERENCE_HEIGHT: f64 = 960.0;

/// Flattening tolerance for curved shapes, in pixels.
const SHAPE_TOLERANCE: f64 = 0.1;

const MINECRAFT_PALETTE: [[u8; 3]; 4] = [
    [0x8B, 0x45, 0x13],
    [0x22, 0x8B, 0x22],
    [0x41, 0x69, 0xE1],
    [0x32, 0xCD, 0x32],
];

const SUBWAY_PALETTE: [[u8; 3]; 4] = [
    [0xFF, 0x6B, 0x35],
    [0xF7, 0x93, 0x1E],
    [0xFF, 0xD2, 0x3F],
    [0x06, 0xFF, 0xA5],
];

/// Opens [`ProceduralBackground`]s.
#[derive(Debug, Clone, Default)]
pub struct ProceduralProvider {
    /// Loop length reported to the driver; `None` renders an endless animation.
    pub loop_secs: Option<f64>,
    /// Shifts the animation phase; the same seed gives the same frames.
    pub seed: u64,
}

#[async_trait::async_trait]
impl BackgroundProvider for ProceduralProvider {
    fn name(&self) -> &str {
        "procedural"
    }

    async fn open(
        &self,
        kind: BackgroundKind,
        width: u32,
        height: u32,
    ) -> PostfullyResult<Box<dyn BackgroundSource>> {
        Ok(Box::new(ProceduralBackground::new(
            kind,
            width,
            height,
            self.loop_secs,
            self.seed,
        )?))
    }
}

/// Animated themed background, rendered on the CPU.
#[derive(Debug, Clone)]
pub struct ProceduralBackground {
    kind: BackgroundKind,
    name: String,
    width: u16,
    height: u16,
    loop_secs: Option<f64>,
    phase_secs: f64,
}

impl ProceduralBackground {
    /// Fails with `SourceUnavailable` when a side exceeds the rasterizer's
    /// `u16` surface limit.
    pub fn new(
        kind: BackgroundKind,
        width: u32,
        height: u32,
        loop_secs: Option<f64>,
        seed: u64,
    ) -> PostfullyResult<Self> {
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(PostfullyError::source_unavailable(format!(
                "procedural background cannot render {width}x{height}: surface exceeds u16"
            )));
        };
        Ok(Self {
            kind,
            name: format!("procedural:{}", kind.slug()),
            width: w,
            height: h,
            loop_secs: loop_secs.filter(|s| s.is_finite() && *s > 0.0),
            phase_secs: (seed % 3600) as f64,
        })
    }

    /// Render the frame at `t` seconds.
    pub fn render(&self, t: f64) -> Frame {
        let time = t + self.phase_secs;
        let width = f64::from(self.width);
        let height = f64::from(self.height);
        let sx = width / REFERENCE_WIDTH;
        let sy = height / REFERENCE_HEIGHT;

        let mut ctx = RenderContext::new(self.width, self.height);
        let palette = match self.kind {
            BackgroundKind::Minecraft => &MINECRAFT_PALETTE,
            BackgroundKind::SubwaySurfers => &SUBWAY_PALETTE,
        };
        paint_gradient(&mut ctx, palette, time, width, height);

        match self.kind {
            BackgroundKind::Minecraft => draw_blocks(&mut ctx, time, sx, sy),
            BackgroundKind::SubwaySurfers => {
                draw_rails(&mut ctx, sx, height);
                draw_circles(&mut ctx, time, sx, sy);
            }
        }
        ctx.flush();

        let mut pixmap = Pixmap::new(self.width, self.height);
        ctx.render_to_pixmap(&mut pixmap);

        let mut frame = Frame::transparent(u32::from(self.width), u32::from(self.height));
        frame.data_mut().copy_from_slice(pixmap.data_as_u8_slice());
        unpremultiply(frame.data_mut());
        frame
    }
}

#[async_trait::async_trait]
impl BackgroundSource for ProceduralBackground {
    fn name(&self) -> &str {
        &self.name
    }

    fn native_duration_secs(&self) -> Option<f64> {
        self.loop_secs
    }

    async fn frame_at(&mut self, t: f64) -> PostfullyResult<Frame> {
        Ok(self.render(t))
    }

    async fn close(&mut self) -> PostfullyResult<()> {
        Ok(())
    }
}

fn paint_gradient(
    ctx: &mut RenderContext,
    palette: &[[u8; 3]; 4],
    time: f64,
    width: f64,
    height: f64,
) {
    let sy = height / REFERENCE_HEIGHT;
    let color_index = (time * 2.0).floor().rem_euclid(palette.len() as f64) as usize;
    let stop = |k: usize| {
        let [r, g, b] = palette[(color_index + k) % palette.len()];
        Color::from_rgba8(r, g, b, 255)
    };

    let start = Point::new(0.0, ((time * 0.5).sin() * 200.0 + 480.0) * sy);
    let end = Point::new(width, ((time * 0.3).cos() * 200.0 + 480.0) * sy);
    ctx.set_paint(Gradient::new_linear(start, end).with_stops([stop(0), stop(1), stop(2)]));
    ctx.fill_rect(&Rect::new(0.0, 0.0, width, height));
}

/// Translucent white used for every theme shape.
fn tint(alpha: f64) -> Color {
    Color::from_rgba8(255, 255, 255, (alpha * 255.0).round() as u8)
}

fn draw_blocks(ctx: &mut RenderContext, time: f64, sx: f64, sy: f64) {
    ctx.set_paint(tint(0.2));
    for j in 0..6 {
        let jf = j as f64;
        let cx = (j % 3) as f64 * 180.0 + (time + jf).sin() * 50.0;
        let cy = (j / 3) as f64 * 400.0 + 200.0 + (time * 0.5 + jf).cos() * 100.0;
        let half = (60.0 + (time * 2.0 + jf).sin() * 20.0) / 2.0;
        ctx.fill_rect(&Rect::new(
            (cx - half) * sx,
            (cy - half) * sy,
            (cx + half) * sx,
            (cy + half) * sy,
        ));
    }
}

fn draw_rails(ctx: &mut RenderContext, sx: f64, height: f64) {
    ctx.set_paint(tint(0.3));
    for j in 0..3 {
        let x = (135.0 + j as f64 * 135.0) * sx;
        let half = 4.0 * sx;
        ctx.fill_rect(&Rect::new(x - half, 0.0, x + half, height));
    }
}

fn draw_circles(ctx: &mut RenderContext, time: f64, sx: f64, sy: f64) {
    ctx.set_paint(tint(0.4));
    for j in 0..5 {
        let jf = j as f64;
        let cx = 270.0 + (time * 3.0 + jf * 1.2).sin() * 200.0;
        let cy = (time * 200.0 + jf * 200.0).rem_euclid(1200.0) - 120.0;
        let radius = (30.0 + (time * 4.0 + jf).sin() * 10.0) * sx.min(sy);
        if radius <= 0.0 {
            continue;
        }
        let circle = Circle::new(Point::new(cx * sx, cy * sy), radius);
        ctx.fill_path(&circle.to_path(SHAPE_TOLERANCE));
    }
}

/// Convert the rasterizer's premultiplied output to straight alpha in place.
fn unpremultiply(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        match a {
            255 => {}
            0 => px[..3].fill(0),
            _ => {
                for c in &mut px[..3] {
                    *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
                }
            }
        }
    }
}
