//! # movielines
//!
//! Turn a video into a color barcode: one vertical line per second of
//! footage, each line the dominant (or average) color of that second's frame.
//!
//! Decoding runs in the background through FFmpeg (via
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next)), writing one still
//! per second. An [`Orchestrator`] polls for those stills on a fixed
//! interval, reduces each to a single color, appends it to a growing strip,
//! and publishes the strip after every drain, so the barcode fills in while
//! the video is still being decoded.
//!
//! ## Quick Start
//!
//! ### Render a Strip
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use movielines::{BarcodeOptions, FfmpegEngine, ImageFileDisplay, Orchestrator, VideoSource};
//!
//! # async fn example() -> Result<(), movielines::MovieLinesError> {
//! let orchestrator = Arc::new(Orchestrator::new(
//!     Arc::new(FfmpegEngine::new("frames")),
//!     Arc::new(ImageFileDisplay::new("barcode.png").with_preview("preview.bmp")),
//!     BarcodeOptions::new(),
//! ));
//!
//! let report = orchestrator.run(&VideoSource::from_path("input.mp4")?).await?;
//! for color in &report.colors {
//!     println!("{}", color.to_hex());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Reduce a Single Image
//!
//! ```no_run
//! use movielines::ReductionMethod;
//!
//! let bytes = std::fs::read("frame.bmp").unwrap();
//! let color = movielines::color::reduce(&bytes, ReductionMethod::Dominant).unwrap();
//! println!("{color}");
//! ```
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod color;
pub mod compositor;
pub mod config;
mod conversion;
pub mod display;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod frame_store;
pub mod orchestrator;
pub mod progress;
pub mod source;

pub use color::{ColorReducer, ReductionMethod, Rgb};
pub use compositor::{
    Compositor, DEFAULT_STRIP_HEIGHT, DISPLAY_STRETCH, MIN_DISPLAY_WIDTH, StripSnapshot,
};
pub use config::{BarcodeOptions, DEFAULT_POLL_INTERVAL, SamplingParams};
pub use display::{DisplaySurface, ImageFileDisplay, NullDisplay};
pub use engine::{DecodeEngine, FfmpegEngine};
pub use error::{FALLBACK_MESSAGE, MovieLinesError};
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use frame_store::{DirectoryFrameStore, FRAME_EXTENSION, FrameId, FrameStore, MemoryFrameStore};
pub use orchestrator::{Orchestrator, RunReport, RunState, TickOutcome};
pub use progress::{
    CompletionSignal, OperationType, ProgressCallback, ProgressInfo, ProgressScale,
};
pub use source::VideoSource;
