//! Background sources: whatever supplies the base image of each frame.
//!
//! A [`BackgroundProvider`] knows how to open a source for a
//! [`BackgroundKind`]; a [`BackgroundSource`] answers "frame at time t".
//! Providers are ranked: [`acquire_background`] tries them in order and
//! only falls back at acquisition time, never in the middle of a run.

use std::time::Duration;

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::export::BackgroundKind;
use postfully_project_model::frame::Frame;

pub mod clip;
pub mod procedural;

pub use clip::{ClipBackground, ClipProvider};
pub use procedural::{ProceduralBackground, ProceduralProvider};

/// An opened, time-indexed background.
#[async_trait::async_trait]
pub trait BackgroundSource: Send {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Loop length in seconds; `None` for sources that never repeat.
    fn native_duration_secs(&self) -> Option<f64>;

    /// Produce the full-canvas frame at `t` seconds of source time.
    async fn frame_at(&mut self, t: f64) -> PostfullyResult<Frame>;

    /// Release the source. Called exactly once per opened source.
    async fn close(&mut self) -> PostfullyResult<()>;
}

/// Opens background sources for a requested kind and canvas size.
#[async_trait::async_trait]
pub trait BackgroundProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Open a source rendering at `width`x`height`.
    async fn open(
        &self,
        kind: BackgroundKind,
        width: u32,
        height: u32,
    ) -> PostfullyResult<Box<dyn BackgroundSource>>;
}

/// Open the first provider that succeeds within `timeout`.
///
/// Each provider gets its own `timeout`. When every provider fails or
/// times out the result is `SourceUnavailable`, naming each failure.
pub async fn acquire_background(
    providers: &[std::sync::Arc<dyn BackgroundProvider>],
    kind: BackgroundKind,
    width: u32,
    height: u32,
    timeout: Duration,
) -> PostfullyResult<Box<dyn BackgroundSource>> {
    if providers.is_empty() {
        return Err(PostfullyError::source_unavailable(
            "no background providers configured",
        ));
    }

    let mut failures = Vec::with_capacity(providers.len());
    for provider in providers {
        let started = std::time::Instant::now();
        match tokio::time::timeout(timeout, provider.open(kind, width, height)).await {
            Ok(Ok(source)) => {
                tracing::info!(
                    provider = provider.name(),
                    source = source.name(),
                    background = %kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Background source acquired"
                );
                return Ok(source);
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = provider.name(), error = %e, "Background provider failed");
                failures.push(format!("{}: {e}", provider.name()));
            }
            Err(_) => {
                tracing::warn!(
                    provider = provider.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Background provider timed out"
                );
                failures.push(format!(
                    "{}: timed out after {}ms",
                    provider.name(),
                    timeout.as_millis()
                ));
            }
        }
    }

    Err(PostfullyError::source_unavailable(format!(
        "could not open {} background ({})",
        kind.label(),
        failures.join("; ")
    )))
}
