//! The extraction state machine.
//!
//! An [`Orchestrator`] drives one run at a time through `Idle → Extracting →
//! Idle`. [`start`](Orchestrator::start) launches the decode engine on a
//! blocking thread and returns immediately; from then on every
//! [`tick`](Orchestrator::tick) drains whatever frames the engine has written
//! so far, reduces each to a color, appends the colors to the strip, deletes
//! the frames, and republishes the strip.
//!
//! At most one tick body runs at a time. A tick that finds another tick in
//! progress returns [`TickOutcome::Busy`] without doing anything: ticks are
//! dropped, never queued.
//!
//! Completion is observed opportunistically. The engine flips the
//! [`CompletionSignal`] when it finishes; the run only returns to idle on a
//! tick that sees the flag set *and* drains at least one frame. If the final
//! frames were drained before the flag was set, later ticks find nothing and
//! the run stays in `Extracting`.
//!
//! A tick that fails halts the run. Frames it already appended stay on the
//! strip and its whole batch stays in the store, so every later tick returns
//! [`TickOutcome::Halted`] until [`reset`](Orchestrator::reset) or a new
//! [`start`](Orchestrator::start).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use movielines::{
//!     BarcodeOptions, FfmpegEngine, ImageFileDisplay, Orchestrator, ReductionMethod, VideoSource,
//! };
//!
//! # async fn example() -> Result<(), movielines::MovieLinesError> {
//! let orchestrator = Arc::new(Orchestrator::new(
//!     Arc::new(FfmpegEngine::new("work")),
//!     Arc::new(ImageFileDisplay::new("strip.png")),
//!     BarcodeOptions::new().with_method(ReductionMethod::Average),
//! ));
//!
//! let report = orchestrator.run(&VideoSource::from_path("movie.mp4")?).await?;
//! println!("{} seconds sampled", report.samples());
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_stream::wrappers::WatchStream;

use crate::{
    color::Rgb,
    compositor::{Compositor, StripSnapshot},
    config::BarcodeOptions,
    display::DisplaySurface,
    engine::DecodeEngine,
    error::MovieLinesError,
    frame_store::FrameStore,
    progress::{CompletionSignal, OperationType, ProgressTracker},
    source::VideoSource,
};

/// Where the orchestrator is in its run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No run in progress; ticks are no-ops.
    #[default]
    Idle,
    /// The engine has been started and ticks drain its frames.
    Extracting,
}

/// What a single [`tick`](Orchestrator::tick) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No run in progress.
    Idle,
    /// The engine has not been loaded yet.
    NotReady,
    /// Another tick was still running; this one did nothing.
    Busy,
    /// An earlier tick failed; nothing runs until the next reset or start.
    Halted,
    /// `frames` frames were reduced and appended (possibly zero).
    Drained { frames: usize },
    /// The final frames were drained and the run returned to idle.
    Completed {
        frames: usize,
        snapshot: StripSnapshot,
    },
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One color per sampled second, in order.
    pub colors: Vec<Rgb>,
    /// The final strip at native width.
    pub snapshot: StripSnapshot,
    /// Ticks that ran a body (including empty ones).
    pub ticks: u64,
    /// Timer firings dropped because a tick was still running.
    pub skipped_ticks: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Number of color samples, i.e. seconds of video.
    pub fn samples(&self) -> usize {
        self.colors.len()
    }
}

/// Mutable per-run state, only touched between awaits.
struct RunCore {
    state: RunState,
    failed: bool,
    offset: u32,
    preview: Option<Arc<[u8]>>,
    compositor: Compositor,
    tracker: ProgressTracker,
}

/// Drives the decode engine and the poll/reduce/append cycle.
pub struct Orchestrator {
    engine: Arc<dyn DecodeEngine>,
    store: Arc<dyn FrameStore>,
    display: Arc<dyn DisplaySurface>,
    options: BarcodeOptions,
    completion: CompletionSignal,
    painting: AtomicBool,
    core: Mutex<RunCore>,
    snapshots: watch::Sender<StripSnapshot>,
}

impl Debug for Orchestrator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("offset", &self.offset())
            .field("painting", &self.is_painting())
            .field("halted", &self.is_halted())
            .field("decode_complete", &self.completion.is_complete())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator for `engine`, reading frames from the engine's own store.
    pub fn new(
        engine: Arc<dyn DecodeEngine>,
        display: Arc<dyn DisplaySurface>,
        options: BarcodeOptions,
    ) -> Self {
        let store = engine.frame_store();
        let height = options.strip_height;
        let tracker = Self::new_tracker(&options);
        let (snapshots, _) = watch::channel(StripSnapshot::empty(height));

        Self {
            engine,
            store,
            display,
            options,
            completion: CompletionSignal::new(),
            painting: AtomicBool::new(false),
            core: Mutex::new(RunCore {
                state: RunState::Idle,
                failed: false,
                offset: 0,
                preview: None,
                compositor: Compositor::new(height),
                tracker,
            }),
            snapshots,
        }
    }

    /// The current run state.
    pub fn state(&self) -> RunState {
        self.core().state
    }

    /// Samples appended in the current run; equals the strip width.
    pub fn offset(&self) -> u32 {
        self.core().offset
    }

    /// The most recently drained frame, while a run is in progress.
    pub fn preview(&self) -> Option<Arc<[u8]>> {
        self.core().preview.clone()
    }

    /// Whether a tick body is executing right now.
    pub fn is_painting(&self) -> bool {
        self.painting.load(Ordering::Acquire)
    }

    /// Whether a failed tick has stopped the current run.
    pub fn is_halted(&self) -> bool {
        self.core().failed
    }

    /// The flag the engine task sets when decoding finishes.
    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    /// The options this orchestrator was built with.
    pub fn options(&self) -> &BarcodeOptions {
        &self.options
    }

    /// The strip as last published.
    pub fn last_snapshot(&self) -> StripSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Stream of every published strip, starting with the current one.
    pub fn snapshots(&self) -> WatchStream<StripSnapshot> {
        WatchStream::new(self.snapshots.subscribe())
    }

    /// Load the engine, hand it the video, and start decoding in the
    /// background.
    ///
    /// Frames left in the store by an earlier run are deleted first. Moves
    /// the orchestrator to [`RunState::Extracting`] with a fresh strip.
    /// The returned handle resolves when the engine finishes; on success the
    /// completion signal has already been set. Calling `start` while a run
    /// is in progress is not rejected.
    ///
    /// # Errors
    ///
    /// [`MovieLinesError::EngineLoad`] if the engine cannot be loaded, or any
    /// error from writing the input. The state is unchanged in that case.
    pub async fn start(
        &self,
        source: &VideoSource,
    ) -> Result<JoinHandle<Result<(), MovieLinesError>>, MovieLinesError> {
        let engine = Arc::clone(&self.engine);
        let input_source = source.clone();
        let input = tokio::task::spawn_blocking(move || {
            engine.load()?;
            engine.write_input(&input_source)
        })
        .await??;

        let stale = self.store.list_frames()?;
        if !stale.is_empty() {
            log::debug!("Removing {} frame(s) left over from an earlier run", stale.len());
            for frame in &stale {
                self.store.delete_frame(frame)?;
            }
        }

        {
            let mut core = self.core();
            core.state = RunState::Extracting;
            core.failed = false;
            core.offset = 0;
            core.preview = None;
            core.compositor.reset();
            core.tracker = Self::new_tracker(&self.options);
        }
        self.completion.reset();
        self.snapshots
            .send_replace(StripSnapshot::empty(self.options.strip_height));

        log::info!(
            "Run started: {} ({} bytes, method={})",
            source.name(),
            source.len(),
            self.options.method,
        );

        let engine = Arc::clone(&self.engine);
        let completion = self.completion.clone();
        let params = self.options.sampling();
        Ok(tokio::task::spawn_blocking(move || {
            let result = engine.run(&input, &params);
            match &result {
                Ok(()) => completion.complete(),
                Err(error) => log::error!("Decode engine failed: {error}"),
            }
            result
        }))
    }

    /// Run one poll cycle.
    ///
    /// Drains every frame currently in the store in sequence order, reduces
    /// each to a color, appends the colors, deletes the drained frames, and
    /// publishes the strip. Returns to idle when decoding has finished and
    /// this tick drained at least one frame.
    ///
    /// # Errors
    ///
    /// Any store, reduction or display failure aborts the tick and halts the
    /// run. The run stays in [`RunState::Extracting`] and later ticks return
    /// [`TickOutcome::Halted`]; use [`reset`](Orchestrator::reset) to
    /// recover.
    pub async fn tick(&self) -> Result<TickOutcome, MovieLinesError> {
        if !self.engine.is_loaded() {
            return Ok(TickOutcome::NotReady);
        }
        if self.state() == RunState::Idle {
            return Ok(TickOutcome::Idle);
        }
        let Some(_guard) = PaintingGuard::acquire(&self.painting) else {
            log::warn!("Tick skipped: previous tick still running");
            return Ok(TickOutcome::Busy);
        };

        // The tick holding the guard before this one may have finished the run.
        let (state, failed) = {
            let core = self.core();
            (core.state, core.failed)
        };
        if state == RunState::Idle {
            return Ok(TickOutcome::Idle);
        }
        if failed {
            log::warn!("Tick skipped: run halted by an earlier failure");
            return Ok(TickOutcome::Halted);
        }

        let result = self.drain_batch().await;
        if let Err(error) = &result {
            self.core().failed = true;
            log::error!("Tick failed, halting run until reset: {error}");
        }
        result
    }

    async fn drain_batch(&self) -> Result<TickOutcome, MovieLinesError> {
        let frames = self.store.list_frames()?;
        let reducer = self.options.reducer();
        let mut preview: Option<Arc<[u8]>> = None;

        for frame in &frames {
            let bytes: Arc<[u8]> = self.store.read_frame(frame)?.into();
            let color = {
                let bytes = Arc::clone(&bytes);
                tokio::task::spawn_blocking(move || reducer.reduce(&bytes)).await??
            };

            {
                let mut core = self.core();
                core.compositor.append_column(color);
                core.offset += 1;
                core.tracker.advance(None, None);
                log::trace!("Frame {frame} -> {} (column {})", color.to_hex(), core.offset - 1);
            }
            preview = Some(bytes);
        }

        // Deleting only after the whole batch has been reduced keeps every
        // read in this batch independent of the store's deletions.
        for frame in &frames {
            self.store.delete_frame(frame)?;
        }

        let snapshot = {
            let mut core = self.core();
            if let Some(latest) = &preview {
                core.preview = Some(Arc::clone(latest));
            }
            core.compositor.publish()
        };
        if let Some(latest) = &preview {
            self.display.show_preview(Some(latest))?;
        }
        self.display.present(&snapshot, true)?;
        self.snapshots.send_replace(snapshot.clone());

        if !frames.is_empty() {
            log::debug!(
                "Drained {} frame(s) ({}..={}), strip width {}",
                frames.len(),
                frames[0].index(),
                frames[frames.len() - 1].index(),
                snapshot.width(),
            );
        }

        if self.completion.is_complete() && !frames.is_empty() {
            self.finish_run(&snapshot)?;
            return Ok(TickOutcome::Completed {
                frames: frames.len(),
                snapshot,
            });
        }

        Ok(TickOutcome::Drained {
            frames: frames.len(),
        })
    }

    /// Start a run and poll it to completion.
    ///
    /// Polls every [`poll_interval`](BarcodeOptions::with_poll_interval),
    /// first firing one interval after the engine starts. Each firing runs
    /// its tick on its own task, so a slow tick turns later firings into
    /// no-ops instead of delaying them.
    ///
    /// # Errors
    ///
    /// The first error from the engine or from a tick. The run is left in
    /// [`RunState::Extracting`].
    pub async fn run(self: &Arc<Self>, source: &VideoSource) -> Result<RunReport, MovieLinesError> {
        let started = Instant::now();
        let mut engine_task = self.start(source).await?;
        let mut engine_running = true;

        let period = self.options.poll_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (sender, mut outcomes) = mpsc::unbounded_channel();
        let mut ticks = 0_u64;
        let mut skipped_ticks = 0_u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let orchestrator = Arc::clone(self);
                    let sender = sender.clone();
                    tokio::spawn(async move {
                        // The receiver only disappears once the run is over.
                        let _ = sender.send(orchestrator.tick().await);
                    });
                }
                Some(outcome) = outcomes.recv() => {
                    match outcome? {
                        TickOutcome::Completed { snapshot, .. } => {
                            ticks += 1;
                            let report = RunReport {
                                colors: snapshot.colors(),
                                snapshot,
                                ticks,
                                skipped_ticks,
                                elapsed: started.elapsed(),
                            };
                            log::info!(
                                "Run finished: {} sample(s) in {:.2}s ({} ticks, {} skipped)",
                                report.samples(),
                                report.elapsed.as_secs_f64(),
                                report.ticks,
                                report.skipped_ticks,
                            );
                            return Ok(report);
                        }
                        TickOutcome::Busy => skipped_ticks += 1,
                        TickOutcome::Drained { .. } => ticks += 1,
                        TickOutcome::Idle | TickOutcome::NotReady | TickOutcome::Halted => {}
                    }
                }
                result = &mut engine_task, if engine_running => {
                    engine_running = false;
                    result??;
                    log::debug!("Decode engine finished; waiting for the final frames");
                }
            }
        }
    }

    /// Force the orchestrator back to idle and clear the strip.
    ///
    /// The only way out of a run that failed or never saw its final frames.
    pub fn reset(&self) {
        {
            let mut core = self.core();
            core.state = RunState::Idle;
            core.failed = false;
            core.offset = 0;
            core.preview = None;
            core.compositor.reset();
        }
        self.completion.reset();
        log::debug!("Orchestrator reset to idle");
    }

    fn finish_run(&self, snapshot: &StripSnapshot) -> Result<(), MovieLinesError> {
        {
            let mut core = self.core();
            core.state = RunState::Idle;
            core.preview = None;
            core.offset = 0;
            core.compositor.reset();
            core.tracker.finish(Some(100.0));
        }
        self.completion.reset();

        self.display.show_preview(None)?;
        self.display.present(snapshot, false)
    }

    fn new_tracker(options: &BarcodeOptions) -> ProgressTracker {
        ProgressTracker::new(
            Arc::clone(&options.progress),
            OperationType::ColorExtraction,
            None,
            options.batch_size,
        )
    }

    fn core(&self) -> MutexGuard<'_, RunCore> {
        // Every update to `RunCore` is a handful of plain assignments, so a
        // poisoned lock still holds consistent data.
        self.core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holds the reentrancy flag for the duration of one tick body.
struct PaintingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PaintingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PaintingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
