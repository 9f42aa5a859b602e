//! Export driver: runs one export from config to delivered artifact.
//!
//! [`ExportDriver::begin_export`] performs every fallible setup step up
//! front (validation, background acquisition, overlay capture, sink open)
//! and only then spawns the frame loop. The loop is driven by frame index,
//! never by wall-clock time, so a run always submits exactly
//! `round(total_duration_secs * frame_rate)` frames unless it is cancelled
//! or fails.
//!
//! A panic inside the run (a progress or delivery callback, a background
//! source, an encoder) is caught and ends the run as `Failed`; the source
//! is still closed and the sink still aborted.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use postfully_common::clock::{wrap_time, EtaEstimator, RunClock};
use postfully_common::config::ExportDefaults;
use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::artifact::{artifact_file_name, ExportArtifact};
use postfully_project_model::export::{BackgroundKind, ExportConfig};
use postfully_project_model::frame::{Frame, FrameRequest};
use postfully_project_model::overlay::OverlayPlacement;

use crate::background::{acquire_background, BackgroundProvider, BackgroundSource};
use crate::compositor::{render_frame, OverlaySnapshot};
use crate::encoder::{SequencedSink, SinkFactory};
use crate::overlay::{capture_snapshot, OverlayCapture};

/// Progress callback, invoked once after every submitted frame.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Receives the finished artifact. Called at most once, only on success.
pub type DeliverCallback = Box<dyn FnOnce(ExportArtifact) -> PostfullyResult<()> + Send>;

/// Export progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportProgress {
    /// Frames composited and submitted so far.
    pub frames_done: u64,

    /// Frames the run will produce in total.
    pub frames_total: u64,

    /// Estimated seconds remaining; `None` during warm-up.
    pub eta_secs: Option<f64>,
}

impl ExportProgress {
    /// Completed fraction in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.frames_total == 0 {
            return 1.0;
        }
        self.frames_done as f64 / self.frames_total as f64
    }
}

/// Lifecycle of one export handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for ExportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Driver tuning.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Upper bound for opening each background provider.
    pub acquire_timeout: Duration,

    /// Pause before the single retry of a failed frame fetch.
    pub frame_retry_backoff: Duration,

    /// Frames processed before an ETA is reported.
    pub eta_warmup_frames: usize,

    /// Number of recent frames averaged for the ETA.
    pub eta_window_frames: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(10),
            frame_retry_backoff: Duration::from_millis(50),
            eta_warmup_frames: 10,
            eta_window_frames: 30,
        }
    }
}

impl From<&ExportDefaults> for DriverSettings {
    fn from(defaults: &ExportDefaults) -> Self {
        Self {
            acquire_timeout: Duration::from_millis(defaults.acquire_timeout_ms),
            frame_retry_backoff: Duration::from_millis(defaults.frame_retry_backoff_ms),
            eta_warmup_frames: defaults.eta_warmup_frames,
            eta_window_frames: defaults.eta_window_frames,
        }
    }
}

/// Everything one export run needs.
pub struct ExportRequest {
    /// Run configuration; validated and clamped by the driver.
    pub config: ExportConfig,

    /// Background theme to acquire.
    pub background: BackgroundKind,

    /// Background providers in priority order.
    pub providers: Vec<Arc<dyn BackgroundProvider>>,

    /// Rasterizer for the overlay card. Ignored when `show_overlay` is off.
    pub overlay: Option<Arc<dyn OverlayCapture>>,

    /// User pan/zoom applied to the overlay.
    pub placement: OverlayPlacement,

    /// Opens the encoder for this run.
    pub sink_factory: Arc<dyn SinkFactory>,

    /// Receives the artifact on success.
    pub deliver: DeliverCallback,

    /// Optional per-frame progress listener.
    pub progress: Option<ProgressCallback>,
}

impl ExportRequest {
    pub fn new(
        config: ExportConfig,
        background: BackgroundKind,
        providers: Vec<Arc<dyn BackgroundProvider>>,
        sink_factory: Arc<dyn SinkFactory>,
        deliver: DeliverCallback,
    ) -> Self {
        Self {
            config,
            background,
            providers,
            overlay: None,
            placement: OverlayPlacement::CENTERED,
            sink_factory,
            deliver,
            progress: None,
        }
    }

    pub fn with_overlay(
        mut self,
        capture: Arc<dyn OverlayCapture>,
        placement: OverlayPlacement,
    ) -> Self {
        self.overlay = Some(capture);
        self.placement = placement;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// What a delivered artifact looked like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub file_name: String,
    pub mime_type: String,
    pub byte_len: usize,
    pub frames: u64,
}

/// Non-error end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed(ArtifactSummary),
    Cancelled,
}

/// Requests a cooperative stop at the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            tracing::info!("Export cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Handle to a running export.
pub struct ExportHandle {
    cancel: CancelHandle,
    state: watch::Receiver<ExportState>,
    frames_total: u64,
    task: JoinHandle<PostfullyResult<ExportOutcome>>,
}

impl ExportHandle {
    /// Stop at the next frame boundary. No effect once the run has ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cloneable canceller, for signal handlers and UI threads.
    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> ExportState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.clone()
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total
    }

    /// Wait for the run to end.
    ///
    /// Cancellation is reported as [`ExportOutcome::Cancelled`]; failures
    /// come back as the error that ended the run.
    pub async fn wait(self) -> PostfullyResult<ExportOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PostfullyError::Other(anyhow::anyhow!(
                "export task terminated abnormally: {e}"
            ))),
        }
    }
}

/// Runs exports, one at a time.
#[derive(Debug, Clone, Default)]
pub struct ExportDriver {
    settings: DriverSettings,
    busy: Arc<AtomicBool>,
}

/// Holds the driver's single run slot; released on drop.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> PostfullyResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PostfullyError::Busy)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExportDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            settings,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a run currently holds this driver.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Set up a run and start its frame loop.
    ///
    /// Fails fast with `Busy` if another run holds the driver. Setup errors
    /// (`Configuration`, `SourceUnavailable`, overlay or sink failures) are
    /// returned here and no run is started; anything already opened is
    /// released first.
    pub async fn begin_export(&self, request: ExportRequest) -> PostfullyResult<ExportHandle> {
        let guard = BusyGuard::acquire(&self.busy)?;

        let ExportRequest {
            config,
            background,
            providers,
            overlay,
            placement,
            sink_factory,
            deliver,
            progress,
        } = request;

        let config = config
            .validated()
            .map_err(|e| PostfullyError::configuration(e.to_string()))?;
        let frames_total = config.total_frames();

        tracing::info!(
            background = %background,
            format = config.format.extension(),
            width = config.width,
            height = config.height,
            frame_rate = config.frame_rate,
            total_duration_secs = config.total_duration_secs,
            frames_total,
            "Starting export"
        );

        let mut source = acquire_background(
            &providers,
            background,
            config.width,
            config.height,
            self.settings.acquire_timeout,
        )
        .await?;

        let snapshot = match (config.show_overlay, overlay) {
            (true, Some(capture)) => match capture_snapshot(capture.as_ref(), placement).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    close_source(source.as_mut()).await;
                    return Err(e);
                }
            },
            (true, None) => {
                tracing::warn!("Overlay enabled but no capture supplied; exporting background only");
                None
            }
            (false, _) => None,
        };

        let sink = match sink_factory.open_sink(&config).await {
            Ok(sink) => SequencedSink::new(sink, config.width, config.height),
            Err(e) => {
                close_source(source.as_mut()).await;
                return Err(e);
            }
        };

        let (state_tx, state_rx) = watch::channel(ExportState::Idle);
        state_tx.send_replace(ExportState::Running);

        let cancel = CancelHandle::default();
        let run = ExportRun {
            config,
            background,
            source,
            snapshot,
            settings: self.settings.clone(),
            cancel: cancel.clone(),
            progress,
            clock: RunClock::start(),
        };

        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(run.execute(sink, deliver))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => {
                    let err = panic_error("export teardown", payload);
                    tracing::error!(error = %err, "Export failed");
                    Err(err)
                }
            };
            let state = match &result {
                Ok(ExportOutcome::Completed(_)) => ExportState::Completed,
                Ok(ExportOutcome::Cancelled) => ExportState::Cancelled,
                Err(_) => ExportState::Failed,
            };
            drop(guard);
            state_tx.send_replace(state);
            result
        });

        Ok(ExportHandle {
            cancel,
            state: state_rx,
            frames_total,
            task,
        })
    }
}

/// Turn a caught panic into a run failure.
fn panic_error(stage: &str, payload: Box<dyn Any + Send>) -> PostfullyError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    PostfullyError::Other(anyhow::anyhow!("{stage} panicked: {message}"))
}

async fn close_source(source: &mut dyn BackgroundSource) {
    if let Err(e) = source.close().await {
        tracing::warn!(source = source.name(), error = %e, "Failed to close background source");
    }
}

/// State owned by the spawned frame loop.
struct ExportRun {
    config: ExportConfig,
    background: BackgroundKind,
    source: Box<dyn BackgroundSource>,
    snapshot: Option<OverlaySnapshot>,
    settings: DriverSettings,
    cancel: CancelHandle,
    progress: Option<ProgressCallback>,
    clock: RunClock,
}

impl ExportRun {
    async fn execute(
        mut self,
        mut sink: SequencedSink,
        deliver: DeliverCallback,
    ) -> PostfullyResult<ExportOutcome> {
        let rendered = match AssertUnwindSafe(self.render_all(&mut sink))
            .catch_unwind()
            .await
        {
            Ok(rendered) => rendered,
            Err(payload) => Err(panic_error("frame loop", payload)),
        };

        close_source(self.source.as_mut()).await;
        self.snapshot = None;

        let result = match rendered {
            Ok(frames) => self.finish(sink, frames, deliver).await,
            Err(e) => {
                sink.abort().await;
                Err(e)
            }
        };

        let elapsed_secs = self.clock.elapsed_secs();
        match &result {
            Ok(ExportOutcome::Completed(summary)) => tracing::info!(
                file_name = %summary.file_name,
                bytes = summary.byte_len,
                frames = summary.frames,
                elapsed_secs,
                "Export completed"
            ),
            Err(e) if e.is_cancelled() => {
                tracing::info!(elapsed_secs, "Export cancelled; partial output discarded")
            }
            Err(e) => {
                tracing::error!(error = %e, elapsed_secs, "Export failed; partial output discarded")
            }
            Ok(ExportOutcome::Cancelled) => {}
        }

        match result {
            Err(e) if e.is_cancelled() => Ok(ExportOutcome::Cancelled),
            other => other,
        }
    }

    async fn render_all(&mut self, sink: &mut SequencedSink) -> PostfullyResult<u64> {
        let frames_total = self.config.total_frames();
        let native_secs = self.source.native_duration_secs();
        let mut eta = EtaEstimator::new(self.settings.eta_warmup_frames, self.settings.eta_window_frames);

        for frame_index in 0..frames_total {
            if self.cancel.is_cancelled() {
                return Err(PostfullyError::Cancelled);
            }

            let started = Instant::now();
            let request = FrameRequest::at_index(frame_index, self.config.frame_rate);
            let t = request.timestamp_secs;

            let background = self.fetch_background(frame_index, wrap_time(t, native_secs)).await?;
            if background.width() != self.config.width || background.height() != self.config.height {
                return Err(PostfullyError::frame_decode(
                    frame_index,
                    format!(
                        "{} produced {}x{}, canvas is {}x{}",
                        self.source.name(),
                        background.width(),
                        background.height(),
                        self.config.width,
                        self.config.height
                    ),
                ));
            }

            let frame = render_frame(&background, self.snapshot.as_ref(), t, &self.config);
            sink.submit(request, &frame).await?;

            eta.record(started.elapsed());
            let frames_done = frame_index + 1;
            let report = ExportProgress {
                frames_done,
                frames_total,
                eta_secs: eta.estimate_remaining_secs(frames_total - frames_done),
            };
            tracing::debug!(frame_index, t, eta_secs = ?report.eta_secs, "Frame submitted");
            if let Some(cb) = &self.progress {
                cb(report);
            }
        }

        Ok(sink.submitted())
    }

    /// Fetch one background frame, retrying once after a short backoff.
    async fn fetch_background(&mut self, frame_index: u64, source_t: f64) -> PostfullyResult<Frame> {
        match self.source.frame_at(source_t).await {
            Ok(frame) => Ok(frame),
            Err(first) => {
                tracing::warn!(
                    frame_index,
                    source_t,
                    error = %first,
                    "Background frame fetch failed; retrying once"
                );
                tokio::time::sleep(self.settings.frame_retry_backoff).await;
                self.source.frame_at(source_t).await.map_err(|e| {
                    PostfullyError::frame_decode(
                        frame_index,
                        format!("{e} (retry after: {first})"),
                    )
                })
            }
        }
    }

    async fn finish(
        &mut self,
        sink: SequencedSink,
        frames: u64,
        deliver: DeliverCallback,
    ) -> PostfullyResult<ExportOutcome> {
        let format = sink.format();
        let output = match AssertUnwindSafe(sink.finalize()).catch_unwind().await {
            Ok(output) => output?,
            Err(payload) => return Err(panic_error("encoder finalize", payload)),
        };
        let bytes = output.into_bytes();

        let artifact = ExportArtifact {
            file_name: artifact_file_name(self.background, format, self.clock.epoch_utc()),
            mime_type: format.mime_type().to_string(),
            bytes,
        };
        let summary = ArtifactSummary {
            file_name: artifact.file_name.clone(),
            mime_type: artifact.mime_type.clone(),
            byte_len: artifact.len(),
            frames,
        };

        match std::panic::catch_unwind(AssertUnwindSafe(move || deliver(artifact))) {
            Ok(delivered) => delivered?,
            Err(payload) => return Err(panic_error("artifact delivery", payload)),
        }
        Ok(ExportOutcome::Completed(summary))
    }
}
