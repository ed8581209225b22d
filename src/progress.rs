//! Progress reporting and completion signaling.
//!
//! The decode engine reports progress as a native ratio through a
//! [`ProgressCallback`] registered when the engine is built, and signals the
//! end of decoding exactly once through a [`CompletionSignal`]. The
//! orchestrator never waits on either: it checks the completion flag on each
//! tick, so completion races against the poll cadence.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use movielines::{FfmpegEngine, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("[{:?}] {pct:.1}% complete", info.operation);
//!         }
//!     }
//! }
//!
//! let engine = FfmpegEngine::new("work").with_progress(Arc::new(PrintProgress));
//! # Ok::<(), movielines::MovieLinesError>(())
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// The kind of work a progress report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// The decode engine sampling one frame per second.
    FrameSampling,
    /// The orchestrator reducing drained frames to colors.
    ColorExtraction,
}

/// A snapshot of progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// How many items (sampled frames / reduced colors) are done so far.
    pub current: u64,
    /// Total items expected, if known ahead of time.
    pub total: Option<u64>,
    /// Completion percentage (0.0 – 100.0), if it can be computed.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the operation started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// Position in the source video the report corresponds to.
    pub current_timestamp: Option<Duration>,
}

/// Trait for receiving progress updates.
///
/// Implementations must be [`Send`] and [`Sync`]: the engine calls them from
/// its blocking decode thread.
///
/// Progress callbacks are infallible and observe only; they cannot stop a
/// run.
pub trait ProgressCallback: Send + Sync {
    /// Called whenever new progress is available.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications. The default callback.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Maps an engine-native progress ratio to a user-visible percentage.
///
/// Some engines report a single ratio across several internal sub-phases of
/// which only one is the user-visible extraction work; that ratio has to be
/// divided by the number of sub-phases; in-browser FFmpeg builds, for
/// instance, report over four. [`FfmpegEngine`]
/// computes its ratio directly from the decoded timestamp over the duration,
/// which is a single phase.
///
/// [`FfmpegEngine`]: crate::FfmpegEngine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressScale {
    sub_phases: u32,
}

impl ProgressScale {
    /// Scale for an engine whose ratio spans `sub_phases` phases (minimum 1).
    pub const fn new(sub_phases: u32) -> Self {
        Self {
            sub_phases: if sub_phases == 0 { 1 } else { sub_phases },
        }
    }

    /// Scale for an engine that reports one phase.
    pub const fn single_phase() -> Self {
        Self::new(1)
    }

    /// Number of phases the engine reports across.
    pub fn sub_phases(&self) -> u32 {
        self.sub_phases
    }

    /// Convert a native ratio into a percentage in `0.0..=100.0`.
    pub fn percentage(&self, ratio: f64) -> f32 {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (ratio * 100.0 / f64::from(self.sub_phases)) as f32
    }
}

impl Default for ProgressScale {
    fn default() -> Self {
        Self::single_phase()
    }
}

/// Internal helper that tracks timing and emits callbacks.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    current: u64,
    batch_size: u64,
    start_time: Instant,
    items_since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            current: 0,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            items_since_last_report: 0,
        }
    }

    /// Record one completed item and fire the callback if the batch
    /// threshold is reached.
    ///
    /// `percentage` overrides the `current / total` ratio when the caller
    /// knows better (the engine measures by timestamp, not frame count).
    pub(crate) fn advance(&mut self, timestamp: Option<Duration>, percentage: Option<f32>) {
        self.current += 1;
        self.items_since_last_report += 1;

        if self.items_since_last_report >= self.batch_size {
            self.report(timestamp, percentage);
            self.items_since_last_report = 0;
        }
    }

    /// Unconditionally emit a final report.
    pub(crate) fn finish(&mut self, percentage: Option<f32>) {
        self.report(None, percentage);
    }

    fn report(&self, timestamp: Option<Duration>, percentage: Option<f32>) {
        let elapsed = self.start_time.elapsed();

        let percentage = percentage.or_else(|| {
            self.total
                .filter(|&total| total > 0)
                .map(|total| (self.current as f32 / total as f32) * 100.0)
        });

        let estimated_remaining = percentage
            .filter(|&pct| pct > 0.0 && pct < 100.0)
            .map(|pct| elapsed.mul_f32((100.0 - pct) / pct));

        let info = ProgressInfo {
            operation: self.operation,
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            current_timestamp: timestamp,
        };

        self.callback.on_progress(&info);
    }
}

/// One-shot "decoding finished" flag.
///
/// Set once by whoever drives the decode engine, read opportunistically by
/// the orchestrator on each tick, and cleared when the run returns to idle.
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CompletionSignal {
    /// A signal that has not fired.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Mark decoding as finished. Later calls are no-ops.
    pub fn complete(&self) {
        self.sender.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
    }

    /// Whether decoding has finished.
    pub fn is_complete(&self) -> bool {
        *self.sender.borrow()
    }

    /// Clear the flag for the next run.
    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    /// Subscribe to changes of the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Wait until the flag is set.
    pub async fn wait(&self) {
        let mut receiver = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|done| *done).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}
