use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use postfully_common::error::{PostfullyError, PostfullyResult};
use postfully_project_model::artifact::ExportArtifact;
use postfully_project_model::export::{BackgroundKind, ExitAnimation, ExportConfig, ExportFormat};
use postfully_project_model::frame::{Frame, FrameRequest};
use postfully_project_model::overlay::OverlayPlacement;
use postfully_render_engine::background::ProceduralBackground;
use postfully_render_engine::{
    BackgroundProvider, BackgroundSource, DriverSettings, EncodedOutput, EncoderSink,
    ExportDriver, ExportOutcome, ExportProgress, ExportRequest, ExportState, OverlayCapture,
    SinkFactory, StaticOverlay,
};

const WIDTH: u32 = 18;
const HEIGHT: u32 = 32;

fn scenario_a_config() -> ExportConfig {
    ExportConfig {
        total_duration_secs: 10.0,
        overlay_start_secs: 2.0,
        overlay_visible_secs: 6.0,
        exit_animation: ExitAnimation::Fade,
        show_overlay: true,
        disappear_after_time: true,
        frame_rate: 30,
        width: WIDTH,
        height: HEIGHT,
        format: ExportFormat::Y4m,
    }
}

fn fast_settings() -> DriverSettings {
    DriverSettings {
        acquire_timeout: Duration::from_millis(200),
        frame_retry_backoff: Duration::from_millis(1),
        ..DriverSettings::default()
    }
}

fn reference_background(t: f64) -> Frame {
    ProceduralBackground::new(BackgroundKind::Minecraft, WIDTH, HEIGHT, None, 0)
        .unwrap()
        .render(t)
}

fn white_card() -> Arc<dyn OverlayCapture> {
    Arc::new(StaticOverlay(Frame::solid(8, 8, [255, 255, 255, 255])))
}

// ---------------------------------------------------------------------------
// Background test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SourceCounters {
    opens: AtomicUsize,
    fetches: AtomicUsize,
    closes: AtomicUsize,
}

#[derive(Clone)]
struct TestProvider {
    counters: Arc<SourceCounters>,
    loop_secs: Option<f64>,
    fail_open: bool,
    hang_open: bool,
    fail_from_secs: f64,
    failures: Arc<AtomicUsize>,
    gate: Option<(usize, Arc<Notify>)>,
}

impl TestProvider {
    fn healthy(counters: &Arc<SourceCounters>) -> Self {
        Self {
            counters: Arc::clone(counters),
            loop_secs: None,
            fail_open: false,
            hang_open: false,
            fail_from_secs: f64::INFINITY,
            failures: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    fn failing_fetches(mut self, from_secs: f64, count: usize) -> Self {
        self.fail_from_secs = from_secs;
        self.failures = Arc::new(AtomicUsize::new(count));
        self
    }

    /// Block the `fetch_number`-th fetch (1-based) until `gate` is notified.
    fn gated(mut self, fetch_number: usize, gate: &Arc<Notify>) -> Self {
        self.gate = Some((fetch_number, Arc::clone(gate)));
        self
    }

    fn into_providers(self) -> Vec<Arc<dyn BackgroundProvider>> {
        let provider: Arc<dyn BackgroundProvider> = Arc::new(self);
        vec![provider]
    }
}

#[async_trait::async_trait]
impl BackgroundProvider for TestProvider {
    fn name(&self) -> &str {
        "test"
    }

    async fn open(
        &self,
        kind: BackgroundKind,
        width: u32,
        height: u32,
    ) -> PostfullyResult<Box<dyn BackgroundSource>> {
        if self.hang_open {
            std::future::pending::<()>().await;
        }
        if self.fail_open {
            return Err(PostfullyError::source_unavailable("no clip on disk"));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestSource {
            inner: ProceduralBackground::new(kind, width, height, self.loop_secs, 0)?,
            provider: self.clone(),
        }))
    }
}

struct TestSource {
    inner: ProceduralBackground,
    provider: TestProvider,
}

#[async_trait::async_trait]
impl BackgroundSource for TestSource {
    fn name(&self) -> &str {
        "test-source"
    }

    fn native_duration_secs(&self) -> Option<f64> {
        self.inner.native_duration_secs()
    }

    async fn frame_at(&mut self, t: f64) -> PostfullyResult<Frame> {
        let fetch_number = self.provider.counters.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((gated_fetch, gate)) = &self.provider.gate {
            if *gated_fetch == fetch_number {
                gate.notified().await;
            }
        }
        if t >= self.provider.fail_from_secs {
            let failed = self
                .provider
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(PostfullyError::source_unavailable("simulated seek failure"));
            }
        }
        Ok(self.inner.render(t))
    }

    async fn close(&mut self) -> PostfullyResult<()> {
        self.provider.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sink test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SinkLog {
    opened: usize,
    frames: Vec<(FrameRequest, Frame)>,
    finalized: bool,
    aborted: bool,
}

struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    reject_at: Option<u64>,
}

#[async_trait::async_trait]
impl EncoderSink for RecordingSink {
    fn format(&self) -> ExportFormat {
        ExportFormat::Y4m
    }

    async fn submit(&mut self, request: FrameRequest, frame: &Frame) -> PostfullyResult<()> {
        if self.reject_at == Some(request.frame_index) {
            return Err(PostfullyError::encoding("encoder queue closed"));
        }
        self.log.lock().unwrap().frames.push((request, frame.clone()));
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> PostfullyResult<EncodedOutput> {
        let mut log = self.log.lock().unwrap();
        log.finalized = true;
        let mut output = EncodedOutput::new();
        output.push(format!("frames:{}", log.frames.len()).into_bytes());
        Ok(output)
    }

    async fn abort(self: Box<Self>) {
        self.log.lock().unwrap().aborted = true;
    }
}

#[derive(Clone, Default)]
struct RecordingFactory {
    log: Arc<Mutex<SinkLog>>,
    reject_at: Option<u64>,
}

#[async_trait::async_trait]
impl SinkFactory for RecordingFactory {
    async fn open_sink(&self, _config: &ExportConfig) -> PostfullyResult<Box<dyn EncoderSink>> {
        self.log.lock().unwrap().opened += 1;
        Ok(Box::new(RecordingSink {
            log: Arc::clone(&self.log),
            reject_at: self.reject_at,
        }))
    }
}

type Delivered = Arc<Mutex<Vec<ExportArtifact>>>;

fn request(
    config: ExportConfig,
    providers: Vec<Arc<dyn BackgroundProvider>>,
    sink: &RecordingFactory,
) -> (ExportRequest, Delivered) {
    let delivered: Delivered = Arc::default();
    let target = Arc::clone(&delivered);
    let request = ExportRequest::new(
        config,
        BackgroundKind::Minecraft,
        providers,
        Arc::new(sink.clone()),
        Box::new(move |artifact| {
            target.lock().unwrap().push(artifact);
            Ok(())
        }),
    );
    (request, delivered)
}

// ---------------------------------------------------------------------------
// Frame count and scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exports_exactly_duration_times_frame_rate_frames() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let (req, delivered) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let driver = ExportDriver::new(fast_settings());

    let handle = driver
        .begin_export(req.with_overlay(white_card(), OverlayPlacement::CENTERED))
        .await
        .unwrap();
    assert_eq!(handle.frames_total(), 300);
    let mut state = handle.subscribe();

    let outcome = handle.wait().await.unwrap();
    let ExportOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.frames, 300);
    assert_eq!(*state.borrow_and_update(), ExportState::Completed);

    let log = sink.log.lock().unwrap();
    assert_eq!(log.frames.len(), 300);
    for (i, (req, frame)) in log.frames.iter().enumerate() {
        assert_eq!(req.frame_index, i as u64);
        assert_eq!((frame.width(), frame.height()), (WIDTH, HEIGHT));
    }
    assert!(log.finalized);
    assert!(!log.aborted);

    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(!driver.is_busy());

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].file_name.starts_with("reddit-story-minecraft-"));
    assert!(delivered[0].file_name.ends_with(".y4m"));
    assert_eq!(delivered[0].mime_type, "video/x-yuv4mpeg");
    assert_eq!(delivered[0].bytes, b"frames:300".to_vec());
}

#[tokio::test]
async fn scenario_a_overlay_follows_visibility_window() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let (req, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let driver = ExportDriver::new(fast_settings());
    let handle = driver
        .begin_export(req.with_overlay(white_card(), OverlayPlacement::CENTERED))
        .await
        .unwrap();
    handle.wait().await.unwrap();

    let log = sink.log.lock().unwrap();
    let frame = |i: usize| &log.frames[i].1;
    let centre = |f: &Frame| f.pixel(WIDTH / 2, HEIGHT / 2).unwrap();

    assert_eq!(frame(0), &reference_background(0.0));

    assert_eq!(centre(frame(75)), [255, 255, 255, 255]);

    let exiting = frame(239);
    let bg_239 = reference_background(239.0 / 30.0);
    assert_ne!(exiting, &bg_239);
    assert_ne!(centre(exiting), [255, 255, 255, 255]);

    assert_eq!(frame(289), &reference_background(289.0 / 30.0));
}

#[derive(Default)]
struct CountingCapture {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl OverlayCapture for CountingCapture {
    async fn capture_overlay(&self) -> PostfullyResult<Frame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::solid(8, 8, [255, 0, 0, 255]))
    }
}

#[tokio::test]
async fn scenario_b_hidden_overlay_leaves_every_frame_untouched() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let config = ExportConfig {
        show_overlay: false,
        ..scenario_a_config()
    };
    let capture = Arc::new(CountingCapture::default());
    let (req, _) = request(config, TestProvider::healthy(&counters).into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    let handle = driver
        .begin_export(req.with_overlay(capture.clone(), OverlayPlacement::CENTERED))
        .await
        .unwrap();
    handle.wait().await.unwrap();

    assert_eq!(capture.calls.load(Ordering::SeqCst), 0);
    let log = sink.log.lock().unwrap();
    assert_eq!(log.frames.len(), 300);
    for (req, frame) in &log.frames {
        assert_eq!(frame, &reference_background(req.timestamp_secs));
    }
}

#[tokio::test]
async fn scenario_c_short_background_loops() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let config = ExportConfig {
        show_overlay: false,
        ..scenario_a_config()
    };
    let provider = TestProvider {
        loop_secs: Some(4.0),
        ..TestProvider::healthy(&counters)
    };
    let (req, _) = request(config, provider.into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    driver.begin_export(req).await.unwrap().wait().await.unwrap();

    let log = sink.log.lock().unwrap();
    assert_eq!(log.frames[180].0.timestamp_secs, 6.0);
    assert_eq!(log.frames[180].1, log.frames[60].1);
    assert_ne!(log.frames[90].1, log.frames[60].1);
}

#[tokio::test]
async fn overlay_capture_runs_once_per_export() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let capture = Arc::new(CountingCapture::default());
    let (req, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let driver = ExportDriver::new(fast_settings());
    driver
        .begin_export(req.with_overlay(capture.clone(), OverlayPlacement::new(2.0, 0.0, 1.0)))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(capture.calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_is_reported_per_frame_with_eta_after_warmup() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let reports: Arc<Mutex<Vec<ExportProgress>>> = Arc::default();
    let target = Arc::clone(&reports);
    let (req, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let req = req.with_progress(Box::new(move |p| target.lock().unwrap().push(p)));

    let driver = ExportDriver::new(fast_settings());
    driver.begin_export(req).await.unwrap().wait().await.unwrap();

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 300);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.frames_done, i as u64 + 1);
        assert_eq!(report.frames_total, 300);
    }
    assert!(reports[..9].iter().all(|r| r.eta_secs.is_none()));
    assert!(reports[9..].iter().all(|r| r.eta_secs.is_some()));
    assert_eq!(reports[299].eta_secs, Some(0.0));
}

// ---------------------------------------------------------------------------
// Cancellation and exclusivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_releases_source_once_and_discards_output() {
    for gated_fetch in [1usize, 10, 150] {
        let counters = Arc::new(SourceCounters::default());
        let sink = RecordingFactory::default();
        let gate = Arc::new(Notify::new());
        let provider = TestProvider::healthy(&counters).gated(gated_fetch, &gate);
        let (req, delivered) = request(scenario_a_config(), provider.into_providers(), &sink);
        let driver = ExportDriver::new(fast_settings());

        let handle = driver
            .begin_export(req.with_overlay(white_card(), OverlayPlacement::CENTERED))
            .await
            .unwrap();
        let mut state = handle.subscribe();
        handle.cancel();
        gate.notify_one();

        assert_eq!(handle.wait().await.unwrap(), ExportOutcome::Cancelled);
        assert_eq!(*state.borrow_and_update(), ExportState::Cancelled);

        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        let log = sink.log.lock().unwrap();
        assert!(log.aborted);
        assert!(!log.finalized);
        assert!(log.frames.len() <= gated_fetch);
        assert!(log
            .frames
            .iter()
            .all(|(_, f)| f.width() == WIDTH && f.height() == HEIGHT && f.byte_len() == f.data().len()));
        assert!(delivered.lock().unwrap().is_empty());
        assert!(!driver.is_busy());
    }
}

#[tokio::test]
async fn concurrent_begin_fails_fast_with_busy() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let gate = Arc::new(Notify::new());
    let provider = TestProvider::healthy(&counters).gated(1, &gate);
    let (first, _) = request(scenario_a_config(), provider.into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    let handle = driver.begin_export(first).await.unwrap();
    assert!(driver.is_busy());

    let other_counters = Arc::new(SourceCounters::default());
    let other_sink = RecordingFactory::default();
    let (second, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&other_counters).into_providers(),
        &other_sink,
    );
    let err = driver.begin_export(second).await.err().unwrap();
    assert!(matches!(err, PostfullyError::Busy));
    assert_eq!(other_counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(other_sink.log.lock().unwrap().opened, 0);
    assert_eq!(handle.state(), ExportState::Running);

    gate.notify_one();
    assert!(matches!(
        handle.wait().await.unwrap(),
        ExportOutcome::Completed(_)
    ));
    assert!(!driver.is_busy());

    let (third, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&other_counters).into_providers(),
        &other_sink,
    );
    driver.begin_export(third).await.unwrap().wait().await.unwrap();
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_config_fails_before_opening_anything() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let config = ExportConfig {
        total_duration_secs: -1.0,
        ..scenario_a_config()
    };
    let (req, _) = request(config, TestProvider::healthy(&counters).into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    let err = driver.begin_export(req).await.err().unwrap();
    assert!(matches!(err, PostfullyError::Configuration { .. }));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(sink.log.lock().unwrap().opened, 0);
    assert!(!driver.is_busy());
}

#[tokio::test]
async fn unavailable_sources_fail_with_source_unavailable() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let failing = TestProvider {
        fail_open: true,
        ..TestProvider::healthy(&counters)
    };
    let hanging = TestProvider {
        hang_open: true,
        ..TestProvider::healthy(&counters)
    };
    let providers: Vec<Arc<dyn BackgroundProvider>> = vec![Arc::new(failing), Arc::new(hanging)];
    let (req, delivered) = request(scenario_a_config(), providers, &sink);
    let driver = ExportDriver::new(DriverSettings {
        acquire_timeout: Duration::from_millis(20),
        ..fast_settings()
    });

    let err = driver.begin_export(req).await.err().unwrap();
    assert!(matches!(err, PostfullyError::SourceUnavailable { .. }));
    assert!(err.to_string().contains("no clip on disk"));
    assert_eq!(sink.log.lock().unwrap().opened, 0);
    assert!(delivered.lock().unwrap().is_empty());
    assert!(!driver.is_busy());
}

#[tokio::test]
async fn falls_back_to_next_provider_at_acquisition() {
    let broken_counters = Arc::new(SourceCounters::default());
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let providers: Vec<Arc<dyn BackgroundProvider>> = vec![
        Arc::new(TestProvider {
            fail_open: true,
            ..TestProvider::healthy(&broken_counters)
        }),
        Arc::new(TestProvider::healthy(&counters)),
    ];
    let (req, _) = request(scenario_a_config(), providers, &sink);
    let driver = ExportDriver::new(fast_settings());

    driver.begin_export(req).await.unwrap().wait().await.unwrap();
    assert_eq!(broken_counters.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 300);
}

#[tokio::test]
async fn single_fetch_failure_is_retried() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let provider = TestProvider::healthy(&counters).failing_fetches(1.0, 1);
    let (req, delivered) = request(scenario_a_config(), provider.into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    let outcome = driver.begin_export(req).await.unwrap().wait().await.unwrap();
    assert!(matches!(outcome, ExportOutcome::Completed(_)));
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 301);
    assert_eq!(sink.log.lock().unwrap().frames.len(), 300);
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_fetch_failure_fails_run_without_artifact() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let provider = TestProvider::healthy(&counters).failing_fetches(1.5, 2);
    let (req, delivered) = request(scenario_a_config(), provider.into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    let handle = driver.begin_export(req).await.unwrap();
    let mut state = handle.subscribe();
    let err = handle.wait().await.unwrap_err();

    match err {
        PostfullyError::FrameDecode { frame_index, .. } => assert_eq!(frame_index, 45),
        other => panic!("expected FrameDecode, got {other:?}"),
    }
    assert_eq!(*state.borrow_and_update(), ExportState::Failed);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

    let log = sink.log.lock().unwrap();
    assert_eq!(log.frames.len(), 45);
    assert!(log.aborted);
    assert!(!log.finalized);
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn encoder_rejection_fails_run() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory {
        reject_at: Some(10),
        ..RecordingFactory::default()
    };
    let (req, delivered) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let driver = ExportDriver::new(fast_settings());

    let err = driver
        .begin_export(req)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, PostfullyError::Encoding { .. }));
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(sink.log.lock().unwrap().aborted);
    assert!(delivered.lock().unwrap().is_empty());
}

struct BrokenCapture;

#[async_trait::async_trait]
impl OverlayCapture for BrokenCapture {
    async fn capture_overlay(&self) -> PostfullyResult<Frame> {
        Err(PostfullyError::overlay("preview element not mounted"))
    }
}

#[tokio::test]
async fn overlay_failure_closes_acquired_source() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let (req, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let driver = ExportDriver::new(fast_settings());

    let err = driver
        .begin_export(req.with_overlay(Arc::new(BrokenCapture), OverlayPlacement::CENTERED))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PostfullyError::Overlay { .. }));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(sink.log.lock().unwrap().opened, 0);
}

#[tokio::test]
async fn delivery_failure_marks_run_failed() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let req = ExportRequest::new(
        scenario_a_config(),
        BackgroundKind::Minecraft,
        TestProvider::healthy(&counters).into_providers(),
        Arc::new(sink.clone()),
        Box::new(|_| Err(PostfullyError::Other(anyhow::anyhow!("disk full")))),
    );
    let driver = ExportDriver::new(fast_settings());

    let handle = driver.begin_export(req).await.unwrap();
    let mut state = handle.subscribe();
    assert!(handle.wait().await.is_err());
    assert_eq!(*state.borrow_and_update(), ExportState::Failed);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_frame_duration_fails_before_opening_anything() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let config = ExportConfig {
        total_duration_secs: 0.01,
        overlay_start_secs: 0.0,
        overlay_visible_secs: 0.01,
        ..scenario_a_config()
    };
    let (req, _) = request(config, TestProvider::healthy(&counters).into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    let err = driver.begin_export(req).await.err().unwrap();
    assert!(matches!(err, PostfullyError::Configuration { .. }));
    assert!(err.to_string().contains("no frames"));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(sink.log.lock().unwrap().opened, 0);
    assert!(!driver.is_busy());
}

#[tokio::test]
async fn odd_canvas_for_webm_fails_before_opening_anything() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let config = ExportConfig {
        width: 541,
        height: 960,
        format: ExportFormat::Webm,
        ..scenario_a_config()
    };
    let (req, delivered) = request(config, TestProvider::healthy(&counters).into_providers(), &sink);
    let driver = ExportDriver::new(fast_settings());

    let err = driver.begin_export(req).await.err().unwrap();
    assert!(matches!(err, PostfullyError::Configuration { .. }));
    assert!(err.to_string().contains("541x960"));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(sink.log.lock().unwrap().opened, 0);
    assert!(delivered.lock().unwrap().is_empty());
    assert!(!driver.is_busy());
}

/// Reports a capture whose pixel buffer is shorter than its dimensions.
struct TruncatedCapture;

#[async_trait::async_trait]
impl OverlayCapture for TruncatedCapture {
    async fn capture_overlay(&self) -> PostfullyResult<Frame> {
        Frame::from_rgba(8, 8, vec![0; 16]).map_err(|e| PostfullyError::overlay(e.to_string()))
    }
}

#[tokio::test]
async fn mis_sized_overlay_buffer_fails_without_compositing() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let (req, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let driver = ExportDriver::new(fast_settings());

    let err = driver
        .begin_export(req.with_overlay(Arc::new(TruncatedCapture), OverlayPlacement::CENTERED))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PostfullyError::Overlay { .. }));
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(sink.log.lock().unwrap().opened, 0);
    assert!(!driver.is_busy());
}

// ---------------------------------------------------------------------------
// Panicking callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_progress_listener_fails_run_and_releases_resources() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let (req, delivered) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    let req = req.with_progress(Box::new(|p| {
        if p.frames_done == 5 {
            panic!("progress listener crashed");
        }
    }));
    let driver = ExportDriver::new(fast_settings());

    let handle = driver.begin_export(req).await.unwrap();
    let mut state = handle.subscribe();
    let err = handle.wait().await.unwrap_err();

    assert!(err.to_string().contains("progress listener crashed"));
    assert_eq!(*state.borrow_and_update(), ExportState::Failed);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    let log = sink.log.lock().unwrap();
    assert!(log.aborted);
    assert!(!log.finalized);
    assert!(delivered.lock().unwrap().is_empty());
    assert!(!driver.is_busy());
}

#[tokio::test]
async fn panicking_delivery_fails_run_and_frees_driver() {
    let counters = Arc::new(SourceCounters::default());
    let sink = RecordingFactory::default();
    let req = ExportRequest::new(
        scenario_a_config(),
        BackgroundKind::Minecraft,
        TestProvider::healthy(&counters).into_providers(),
        Arc::new(sink.clone()),
        Box::new(|_| panic!("download target vanished")),
    );
    let driver = ExportDriver::new(fast_settings());

    let handle = driver.begin_export(req).await.unwrap();
    let mut state = handle.subscribe();
    let err = handle.wait().await.unwrap_err();

    assert!(err.to_string().contains("download target vanished"));
    assert_eq!(*state.borrow_and_update(), ExportState::Failed);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(sink.log.lock().unwrap().finalized);
    assert!(!driver.is_busy());

    let counters = Arc::new(SourceCounters::default());
    let (next, _) = request(
        scenario_a_config(),
        TestProvider::healthy(&counters).into_providers(),
        &sink,
    );
    driver.begin_export(next).await.unwrap().wait().await.unwrap();
}
