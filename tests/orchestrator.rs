//! Orchestrator integration tests.
//!
//! A scripted engine stands in for FFmpeg: frames are pushed into an
//! in-memory store by the test, and decoding "finishes" when the test says
//! so. This keeps every tick deterministic.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::Duration,
};

use image::{ImageFormat, RgbImage};
use movielines::{
    BarcodeOptions, DecodeEngine, DisplaySurface, FrameId, FrameStore, MemoryFrameStore,
    MovieLinesError, NullDisplay, OperationType, Orchestrator, ProgressCallback, ProgressInfo,
    ReductionMethod, Rgb, RunState, SamplingParams, StripSnapshot, TickOutcome, VideoSource,
};
use tokio_stream::StreamExt;

const TIMEOUT: Duration = Duration::from_secs(10);

fn frame_bytes(color: Rgb) -> Vec<u8> {
    let image = RgbImage::from_pixel(4, 4, image::Rgb(color.0));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Bmp)
        .expect("Failed to encode BMP");
    bytes
}

fn shade(index: u64) -> Rgb {
    Rgb::new((index * 10) as u8, 255 - (index * 10) as u8, 7)
}

fn source() -> VideoSource {
    VideoSource::from_bytes("clip.mp4", vec![0_u8; 16]).expect("Failed to build source")
}

fn options() -> BarcodeOptions {
    BarcodeOptions::new()
        .with_method(ReductionMethod::Average)
        .with_strip_height(4)
}

// ── Scripted engine ────────────────────────────────────────────────

/// What `run` does once it is released.
enum Script {
    /// Block until the test sends a result.
    Gated(Mutex<mpsc::Receiver<Result<(), String>>>),
    /// Push these frames into the store, then finish.
    Emit(Vec<Rgb>),
}

struct ScriptedEngine {
    frames: Arc<MemoryFrameStore>,
    store: Arc<dyn FrameStore>,
    loaded: AtomicBool,
    fail_load: bool,
    script: Script,
}

impl ScriptedEngine {
    fn gated() -> (Self, mpsc::Sender<Result<(), String>>) {
        let (sender, receiver) = mpsc::channel();
        let frames = Arc::new(MemoryFrameStore::new());
        let engine = Self {
            store: frames.clone(),
            frames,
            loaded: AtomicBool::new(false),
            fail_load: false,
            script: Script::Gated(Mutex::new(receiver)),
        };
        (engine, sender)
    }

    fn emitting(colors: Vec<Rgb>) -> Self {
        let frames = Arc::new(MemoryFrameStore::new());
        Self {
            store: frames.clone(),
            frames,
            loaded: AtomicBool::new(false),
            fail_load: false,
            script: Script::Emit(colors),
        }
    }

    fn with_store(mut self, store: Arc<dyn FrameStore>) -> Self {
        self.store = store;
        self
    }

    fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    fn push(&self, index: u64, color: Rgb) {
        self.frames
            .insert(FrameId::from_index(index), frame_bytes(color));
    }

    fn push_raw(&self, index: u64, bytes: &[u8]) {
        self.frames.insert(FrameId::from_index(index), bytes.to_vec());
    }
}

impl DecodeEngine for ScriptedEngine {
    fn load(&self) -> Result<(), MovieLinesError> {
        if self.fail_load {
            return Err(MovieLinesError::EngineLoad("no decoder available".to_string()));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn write_input(&self, source: &VideoSource) -> Result<PathBuf, MovieLinesError> {
        Ok(PathBuf::from(source.name()))
    }

    fn run(&self, _input: &Path, _params: &SamplingParams) -> Result<(), MovieLinesError> {
        match &self.script {
            Script::Gated(receiver) => match receiver.lock().unwrap().recv() {
                Ok(Ok(())) | Err(_) => Ok(()),
                Ok(Err(message)) => Err(MovieLinesError::Decode(message)),
            },
            Script::Emit(colors) => {
                for (index, color) in colors.iter().enumerate() {
                    self.push(index as u64 + 1, *color);
                }
                Ok(())
            }
        }
    }

    fn frame_store(&self) -> Arc<dyn FrameStore> {
        self.store.clone()
    }
}

/// Store whose reads block until the test releases them.
struct GatedStore {
    inner: Arc<MemoryFrameStore>,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl FrameStore for GatedStore {
    fn list_frames(&self) -> Result<Vec<FrameId>, MovieLinesError> {
        self.inner.list_frames()
    }

    fn read_frame(&self, frame: &FrameId) -> Result<Vec<u8>, MovieLinesError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.read_frame(frame)
    }

    fn delete_frame(&self, frame: &FrameId) -> Result<(), MovieLinesError> {
        self.inner.delete_frame(frame)
    }
}

#[derive(Default)]
struct RecordingDisplay {
    presented: Mutex<Vec<(u32, bool)>>,
    previews: Mutex<Vec<Option<usize>>>,
}

impl DisplaySurface for RecordingDisplay {
    fn present(&self, snapshot: &StripSnapshot, in_progress: bool) -> Result<(), MovieLinesError> {
        self.presented
            .lock()
            .unwrap()
            .push((snapshot.width(), in_progress));
        Ok(())
    }

    fn show_preview(&self, frame: Option<&[u8]>) -> Result<(), MovieLinesError> {
        self.previews.lock().unwrap().push(frame.map(<[u8]>::len));
        Ok(())
    }
}

fn orchestrator(engine: Arc<ScriptedEngine>) -> Orchestrator {
    Orchestrator::new(engine, Arc::new(NullDisplay), options())
}

async fn finish_decoding(
    orchestrator: &Orchestrator,
    gate: &mpsc::Sender<Result<(), String>>,
    engine_task: tokio::task::JoinHandle<Result<(), MovieLinesError>>,
) {
    gate.send(Ok(())).expect("engine gone");
    engine_task
        .await
        .expect("engine task panicked")
        .expect("engine failed");
    assert!(orchestrator.completion().is_complete());
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn tick_before_load_is_not_ready() {
    let (engine, _gate) = ScriptedEngine::gated();
    let orchestrator = orchestrator(Arc::new(engine));

    assert_eq!(orchestrator.state(), RunState::Idle);
    let outcome = orchestrator.tick().await.expect("tick failed");
    assert_eq!(outcome, TickOutcome::NotReady);
}

#[tokio::test]
async fn start_enters_extracting_with_a_fresh_strip() {
    let (engine, gate) = ScriptedEngine::gated();
    let orchestrator = orchestrator(Arc::new(engine));

    let _engine_task = orchestrator.start(&source()).await.expect("start failed");
    assert_eq!(orchestrator.state(), RunState::Extracting);
    assert_eq!(orchestrator.offset(), 0);
    assert!(orchestrator.preview().is_none());
    assert!(orchestrator.last_snapshot().is_empty());
    assert!(!orchestrator.completion().is_complete());
    drop(gate);
}

#[tokio::test]
async fn engine_load_failure_never_starts() {
    let (engine, _gate) = ScriptedEngine::gated();
    let orchestrator = orchestrator(Arc::new(engine.failing_load()));

    let result = orchestrator.start(&source()).await;
    assert!(matches!(result, Err(MovieLinesError::EngineLoad(_))));
    assert_eq!(orchestrator.state(), RunState::Idle);
}

#[tokio::test]
async fn three_second_video_produces_three_columns() {
    let (engine, gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let display = Arc::new(RecordingDisplay::default());
    let orchestrator = Orchestrator::new(engine.clone(), display.clone(), options());

    let engine_task = orchestrator.start(&source()).await.expect("start failed");

    engine.push(1, shade(1));
    engine.push(2, shade(2));
    let outcome = orchestrator.tick().await.expect("tick failed");
    assert_eq!(outcome, TickOutcome::Drained { frames: 2 });
    assert_eq!(orchestrator.offset(), 2);
    assert_eq!(
        orchestrator.preview().as_deref(),
        Some(frame_bytes(shade(2)).as_slice())
    );
    assert!(engine.frames.is_empty(), "drained frames should be deleted");

    engine.push(3, shade(3));
    finish_decoding(&orchestrator, &gate, engine_task).await;

    let outcome = orchestrator.tick().await.expect("tick failed");
    let TickOutcome::Completed { frames, snapshot } = outcome else {
        panic!("Expected Completed, got {outcome:?}");
    };
    assert_eq!(frames, 1);
    assert_eq!(snapshot.width(), 3);
    assert_eq!(snapshot.height(), 4);
    assert_eq!(snapshot.colors(), vec![shade(1), shade(2), shade(3)]);

    assert_eq!(orchestrator.state(), RunState::Idle);
    assert_eq!(orchestrator.offset(), 0);
    assert!(orchestrator.preview().is_none());
    assert!(!orchestrator.completion().is_complete());

    let presented = display.presented.lock().unwrap().clone();
    assert_eq!(presented, vec![(2, true), (3, true), (3, false)]);
    let previews = display.previews.lock().unwrap().clone();
    assert_eq!(previews.last(), Some(&None));
}

#[tokio::test]
async fn ticks_after_completion_are_idle() {
    let (engine, gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let orchestrator = orchestrator(engine.clone());

    let engine_task = orchestrator.start(&source()).await.expect("start failed");
    engine.push(1, shade(1));
    finish_decoding(&orchestrator, &gate, engine_task).await;

    let outcome = orchestrator.tick().await.expect("tick failed");
    assert!(matches!(outcome, TickOutcome::Completed { frames: 1, .. }));

    let outcome = orchestrator.tick().await.expect("tick failed");
    assert_eq!(outcome, TickOutcome::Idle);
    assert_eq!(orchestrator.offset(), 0);
    assert!(orchestrator.preview().is_none());
}

#[tokio::test]
async fn restart_does_not_inherit_completion() {
    let (engine, gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let orchestrator = orchestrator(engine.clone());

    let engine_task = orchestrator.start(&source()).await.expect("start failed");
    engine.push(1, shade(1));
    finish_decoding(&orchestrator, &gate, engine_task).await;
    orchestrator.tick().await.expect("tick failed");

    let _second_task = orchestrator.start(&source()).await.expect("restart failed");
    engine.push(1, shade(5));
    let outcome = orchestrator.tick().await.expect("tick failed");
    assert_eq!(outcome, TickOutcome::Drained { frames: 1 });
    assert_eq!(orchestrator.last_snapshot().colors(), vec![shade(5)]);
    drop(gate);
}

// ── Ordering ───────────────────────────────────────────────────────

#[tokio::test]
async fn order_is_preserved_across_batches() {
    let (engine, _gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let orchestrator = orchestrator(engine.clone());
    let _engine_task = orchestrator.start(&source()).await.expect("start failed");

    let batches: [&[u64]; 4] = [&[1, 2, 3], &[4], &[5, 6, 7, 8, 9, 10, 11], &[12]];
    for batch in batches {
        // Insert in reverse to make sure the store, not insertion order,
        // decides the sequence.
        for &index in batch.iter().rev() {
            engine.push(index, shade(index));
        }
        let outcome = orchestrator.tick().await.expect("tick failed");
        assert_eq!(outcome, TickOutcome::Drained { frames: batch.len() });
    }

    let expected: Vec<Rgb> = (1..=12).map(shade).collect();
    assert_eq!(orchestrator.last_snapshot().colors(), expected);
    assert_eq!(orchestrator.offset(), 12);
}

#[tokio::test]
async fn width_never_shrinks_during_a_run() {
    let (engine, _gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let orchestrator = orchestrator(engine.clone());
    let _engine_task = orchestrator.start(&source()).await.expect("start failed");

    let mut previous = 0;
    for index in 1..=6 {
        if index % 2 == 0 {
            engine.push(index, shade(index));
        }
        orchestrator.tick().await.expect("tick failed");
        let width = orchestrator.last_snapshot().width();
        assert!(width >= previous);
        assert_eq!(width, orchestrator.offset());
        previous = width;
    }
    assert_eq!(previous, 3);
}

#[tokio::test]
async fn snapshots_stream_yields_latest_strip() {
    let (engine, _gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let orchestrator = orchestrator(engine.clone());
    let _engine_task = orchestrator.start(&source()).await.expect("start failed");

    engine.push(1, shade(1));
    engine.push(2, shade(2));
    orchestrator.tick().await.expect("tick failed");

    let mut snapshots = orchestrator.snapshots();
    let latest = snapshots.next().await.expect("stream ended");
    assert_eq!(latest.width(), 2);
}

// ── Concurrency ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_tick_is_skipped() {
    let (entered_sender, entered) = mpsc::channel();
    let (release, release_receiver) = mpsc::channel();

    let (engine, _gate) = ScriptedEngine::gated();
    let gated = Arc::new(GatedStore {
        inner: engine.frames.clone(),
        entered: Mutex::new(entered_sender),
        release: Mutex::new(release_receiver),
    });
    let engine = Arc::new(engine.with_store(gated));
    let orchestrator = Arc::new(orchestrator(engine.clone()));
    let _engine_task = orchestrator.start(&source()).await.expect("start failed");

    engine.push(1, shade(1));
    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.tick().await }
    });

    entered
        .recv_timeout(TIMEOUT)
        .expect("first tick never read a frame");
    assert!(orchestrator.is_painting());

    let second = orchestrator.tick().await.expect("second tick failed");
    assert_eq!(second, TickOutcome::Busy);

    release.send(()).expect("store gone");
    let first = first
        .await
        .expect("first tick panicked")
        .expect("first tick failed");
    assert_eq!(first, TickOutcome::Drained { frames: 1 });
    assert!(!orchestrator.is_painting());
    assert_eq!(orchestrator.offset(), 1);
}

// ── Gaps and failures ──────────────────────────────────────────────

#[tokio::test]
async fn empty_final_batch_does_not_complete() {
    let (engine, gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let orchestrator = orchestrator(engine.clone());

    let engine_task = orchestrator.start(&source()).await.expect("start failed");
    engine.push(1, shade(1));
    let outcome = orchestrator.tick().await.expect("tick failed");
    assert_eq!(outcome, TickOutcome::Drained { frames: 1 });

    // Every frame was drained before decoding reported completion.
    finish_decoding(&orchestrator, &gate, engine_task).await;

    for _ in 0..3 {
        let outcome = orchestrator.tick().await.expect("tick failed");
        assert_eq!(outcome, TickOutcome::Drained { frames: 0 });
        assert_eq!(orchestrator.state(), RunState::Extracting);
    }
    assert!(orchestrator.completion().is_complete());
    assert_eq!(orchestrator.offset(), 1);

    orchestrator.reset();
    assert_eq!(orchestrator.state(), RunState::Idle);
    assert_eq!(orchestrator.offset(), 0);
    assert!(!orchestrator.completion().is_complete());
}

#[tokio::test]
async fn reduce_failure_leaves_run_extracting() {
    let (engine, _gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let orchestrator = orchestrator(engine.clone());
    let _engine_task = orchestrator.start(&source()).await.expect("start failed");

    engine.push(1, shade(1));
    engine.push_raw(2, b"garbage");

    let result = orchestrator.tick().await;
    assert!(matches!(result, Err(MovieLinesError::Reduce(_))));
    assert_eq!(orchestrator.state(), RunState::Extracting);
    assert!(orchestrator.is_halted());
    assert!(!orchestrator.is_painting(), "lock must be released on error");
    assert_eq!(engine.frames.len(), 2, "nothing is deleted from a failed batch");

    orchestrator.reset();
    assert_eq!(orchestrator.state(), RunState::Idle);
    assert!(!orchestrator.is_halted());
    assert!(orchestrator.last_snapshot().width() <= 1);
}

#[tokio::test]
async fn failed_tick_is_never_retried() {
    let (engine, _gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let display = Arc::new(RecordingDisplay::default());
    let orchestrator = Orchestrator::new(engine.clone(), display.clone(), options());
    let _engine_task = orchestrator.start(&source()).await.expect("start failed");

    engine.push(1, shade(1));
    engine.push_raw(2, b"garbage");
    let result = orchestrator.tick().await;
    assert!(matches!(result, Err(MovieLinesError::Reduce(_))));
    assert_eq!(orchestrator.offset(), 1);

    // Even once the bad frame is replaced, the batch is not drained again.
    engine.push(2, shade(2));
    let outcome = orchestrator.tick().await.expect("tick failed");
    assert_eq!(outcome, TickOutcome::Halted);
    assert_eq!(orchestrator.offset(), 1);
    assert_eq!(engine.frames.len(), 2);
    assert!(display.presented.lock().unwrap().is_empty());

    orchestrator.reset();
    assert_eq!(orchestrator.tick().await.expect("tick failed"), TickOutcome::Idle);

    let _engine_task = orchestrator.start(&source()).await.expect("restart failed");
    assert!(!orchestrator.is_halted());
    engine.push(1, shade(1));
    engine.push(2, shade(2));
    let outcome = orchestrator.tick().await.expect("tick failed");
    assert_eq!(outcome, TickOutcome::Drained { frames: 2 });
    assert_eq!(orchestrator.last_snapshot().colors(), vec![shade(1), shade(2)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ticks_never_repaint_after_completion() {
    for _ in 0..20 {
        let (engine, gate) = ScriptedEngine::gated();
        let engine = Arc::new(engine);
        let display = Arc::new(RecordingDisplay::default());
        let orchestrator = Arc::new(Orchestrator::new(
            engine.clone(),
            display.clone(),
            options(),
        ));

        let engine_task = orchestrator.start(&source()).await.expect("start failed");
        engine.push(1, shade(1));
        finish_decoding(&orchestrator, &gate, engine_task).await;

        let ticks: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.tick().await })
            })
            .collect();

        let mut completed = 0;
        for tick in ticks {
            let outcome = tick.await.expect("tick panicked").expect("tick failed");
            match outcome {
                TickOutcome::Completed { .. } => completed += 1,
                TickOutcome::Idle | TickOutcome::Busy => {}
                other => panic!("Unexpected outcome after completion: {other:?}"),
            }
        }
        assert_eq!(completed, 1);

        let presented = display.presented.lock().unwrap().clone();
        assert_eq!(presented, vec![(1, true), (1, false)]);
    }
}

#[tokio::test]
async fn decode_failure_is_reported_through_the_handle() {
    let (engine, gate) = ScriptedEngine::gated();
    let orchestrator = orchestrator(Arc::new(engine));

    let engine_task = orchestrator.start(&source()).await.expect("start failed");
    gate.send(Err("corrupt stream".to_string()))
        .expect("engine gone");

    let result = engine_task.await.expect("engine task panicked");
    assert!(matches!(result, Err(MovieLinesError::Decode(_))));
    assert!(!orchestrator.completion().is_complete());
    assert_eq!(orchestrator.state(), RunState::Extracting);
}

// ── Progress ───────────────────────────────────────────────────────

#[derive(Default)]
struct CountingProgress {
    reports: Mutex<Vec<(OperationType, u64)>>,
}

impl ProgressCallback for CountingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.reports
            .lock()
            .unwrap()
            .push((info.operation, info.current));
    }
}

#[tokio::test]
async fn color_extraction_progress_is_reported() {
    let (engine, gate) = ScriptedEngine::gated();
    let engine = Arc::new(engine);
    let progress = Arc::new(CountingProgress::default());
    let orchestrator = Orchestrator::new(
        engine.clone(),
        Arc::new(NullDisplay),
        options().with_progress(progress.clone()).with_batch_size(2),
    );

    let engine_task = orchestrator.start(&source()).await.expect("start failed");
    for index in 1..=4 {
        engine.push(index, shade(index));
    }
    orchestrator.tick().await.expect("tick failed");
    engine.push(5, shade(5));
    finish_decoding(&orchestrator, &gate, engine_task).await;
    orchestrator.tick().await.expect("tick failed");

    let reports = progress.reports.lock().unwrap().clone();
    assert_eq!(
        reports,
        vec![
            (OperationType::ColorExtraction, 2),
            (OperationType::ColorExtraction, 4),
            (OperationType::ColorExtraction, 5),
        ]
    );
}

// ── Scheduled run ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_polls_until_completed() {
    let colors = vec![shade(1), shade(2), shade(3)];
    let engine = Arc::new(ScriptedEngine::emitting(colors.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        engine,
        Arc::new(NullDisplay),
        options().with_poll_interval(Duration::from_millis(200)),
    ));

    let report = tokio::time::timeout(TIMEOUT, orchestrator.run(&source()))
        .await
        .expect("run did not finish")
        .expect("run failed");

    assert_eq!(report.colors, colors);
    assert_eq!(report.samples(), 3);
    assert_eq!(report.snapshot.width(), 3);
    assert!(report.ticks >= 1);
    assert_eq!(orchestrator.state(), RunState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_surfaces_engine_failure() {
    let (engine, gate) = ScriptedEngine::gated();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(engine),
        Arc::new(NullDisplay),
        options().with_poll_interval(Duration::from_millis(20)),
    ));

    gate.send(Err("unsupported codec".to_string()))
        .expect("engine gone");
    let result = tokio::time::timeout(TIMEOUT, orchestrator.run(&source()))
        .await
        .expect("run did not finish");

    match result {
        Err(MovieLinesError::Decode(message)) => assert_eq!(message, "unsupported codec"),
        other => panic!("Expected Decode, got {other:?}"),
    }
    assert_eq!(orchestrator.state(), RunState::Extracting);
}
