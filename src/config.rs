//! Pipeline configuration.
//!
//! [`BarcodeOptions`] is a builder that threads the reduction method, poll
//! cadence, strip geometry, and progress callback through the orchestrator
//! without polluting every constructor.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use movielines::{BarcodeOptions, ReductionMethod};
//!
//! let options = BarcodeOptions::new()
//!     .with_method(ReductionMethod::Average)
//!     .with_poll_interval(Duration::from_secs(1))
//!     .with_strip_height(64);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::color::{ColorReducer, DEFAULT_PALETTE_SIZE, DEFAULT_QUALITY, ReductionMethod};
use crate::compositor::DEFAULT_STRIP_HEIGHT;
use crate::progress::{NoOpProgress, ProgressCallback};

/// Default time between two poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Parameters handed to the decode engine for one run.
///
/// The sampling rate is fixed at one frame per second of source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingParams {
    /// Ask the engine to shrink every sample to a single pixel, so averaging
    /// happens during decoding rather than in the color reducer.
    pub reduce_to_single_pixel: bool,
}

impl SamplingParams {
    /// Samples emitted per second of source video.
    pub const FRAMES_PER_SECOND: u32 = 1;

    /// Parameters appropriate for `method`.
    pub fn for_method(method: ReductionMethod) -> Self {
        Self {
            reduce_to_single_pixel: method == ReductionMethod::Average,
        }
    }

    /// FFmpeg filter chain implementing these parameters.
    pub fn filter_spec(&self) -> String {
        let mut chain = format!("fps=fps={}/1", Self::FRAMES_PER_SECOND);
        if self.reduce_to_single_pixel {
            chain.push_str(",scale=1:1");
        }
        chain.push_str(",format=pix_fmts=rgb24");
        chain
    }
}

/// Configuration for a barcode run.
#[derive(Clone)]
pub struct BarcodeOptions {
    pub(crate) method: ReductionMethod,
    pub(crate) poll_interval: Duration,
    pub(crate) strip_height: u32,
    pub(crate) palette_size: usize,
    pub(crate) quality: usize,
    /// Receives color-extraction progress from the orchestrator.
    pub(crate) progress: Arc<dyn ProgressCallback>,
    /// Fire the progress callback every N reduced frames.
    pub(crate) batch_size: u64,
}

impl Debug for BarcodeOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BarcodeOptions")
            .field("method", &self.method)
            .field("poll_interval", &self.poll_interval)
            .field("strip_height", &self.strip_height)
            .field("palette_size", &self.palette_size)
            .field("quality", &self.quality)
            .field("has_progress", &true)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for BarcodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl BarcodeOptions {
    /// Defaults: dominant color, 5 s poll interval, 100 px strip, palette of
    /// 5, sampling every 10th pixel, no progress callback.
    pub fn new() -> Self {
        Self {
            method: ReductionMethod::Dominant,
            poll_interval: DEFAULT_POLL_INTERVAL,
            strip_height: DEFAULT_STRIP_HEIGHT,
            palette_size: DEFAULT_PALETTE_SIZE,
            quality: DEFAULT_QUALITY,
            progress: Arc::new(NoOpProgress),
            batch_size: 1,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: ReductionMethod) -> Self {
        self.method = method;
        self
    }

    /// Time between poll ticks. Clamped to a minimum of 1 ms.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Strip height in pixels. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_strip_height(mut self, height: u32) -> Self {
        self.strip_height = height.max(1);
        self
    }

    /// Palette size for the dominant method. Clamped to `2..=256`.
    #[must_use]
    pub fn with_palette_size(mut self, size: usize) -> Self {
        self.palette_size = size.clamp(2, 256);
        self
    }

    /// Pixel sampling stride for the dominant method. Clamped to at least 1.
    #[must_use]
    pub fn with_quality(mut self, quality: usize) -> Self {
        self.quality = quality.max(1);
        self
    }

    /// Attach a callback for color-extraction progress.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Fire the progress callback every `size` reduced frames (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// How frames are reduced to a color.
    pub fn method(&self) -> ReductionMethod {
        self.method
    }

    /// Time between ticks of [`Orchestrator::run`](crate::Orchestrator::run).
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Height of the strip in pixels.
    pub fn strip_height(&self) -> u32 {
        self.strip_height
    }

    /// Decode parameters implied by these options.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams::for_method(self.method)
    }

    pub(crate) fn reducer(&self) -> ColorReducer {
        ColorReducer::new(self.method)
            .with_palette_size(self.palette_size)
            .with_quality(self.quality)
    }
}
