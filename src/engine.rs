//! The decode engine: turns a video into one still image per second.
//!
//! [`DecodeEngine`] is the boundary the orchestrator drives. It is loaded
//! once, receives the input video, and is then run to completion on a
//! blocking thread while the orchestrator polls its [`FrameStore`] for
//! whatever frames have appeared so far.
//!
//! [`FfmpegEngine`] is the FFmpeg-backed implementation. It decodes the best
//! video stream, pushes every decoded frame through an `fps=1` filter graph
//! (plus `scale=1:1` for the average method), and writes each sample as
//! `<n>.bmp` into its working directory. Every frame is written to
//! `<n>.bmp.part` first and renamed, so a concurrent listing never sees a
//! half-written file.
//!
//! # Example
//!
//! ```no_run
//! use movielines::{DecodeEngine, FfmpegEngine, SamplingParams, VideoSource};
//!
//! let engine = FfmpegEngine::new("work");
//! engine.load()?;
//! let input = engine.write_input(&VideoSource::from_path("movie.mp4")?)?;
//! engine.run(&input, &SamplingParams { reduce_to_single_pixel: false })?;
//! # Ok::<(), movielines::MovieLinesError>(())
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use ffmpeg_next::{
    codec::context::Context as CodecContext, filter::Graph as FilterGraph,
    frame::Video as VideoFrame, media::Type,
};
use ffmpeg_sys_next::AVPixelFormat;
use image::{ImageFormat, RgbImage};

use crate::{
    config::SamplingParams,
    error::MovieLinesError,
    frame_store::{DirectoryFrameStore, FrameId, FrameStore},
    progress::{NoOpProgress, OperationType, ProgressCallback, ProgressScale, ProgressTracker},
    source::VideoSource,
};

/// An engine that decodes a video into sequentially numbered still images.
///
/// All methods are synchronous; [`run`](DecodeEngine::run) is long-running
/// and is executed on a blocking thread by the orchestrator.
pub trait DecodeEngine: Send + Sync {
    /// Initialise the engine. Idempotent; must succeed before `run`.
    fn load(&self) -> Result<(), MovieLinesError>;

    /// Whether [`load`](DecodeEngine::load) has completed.
    fn is_loaded(&self) -> bool;

    /// Hand the engine the input video. Returns where the engine put it.
    fn write_input(&self, source: &VideoSource) -> Result<PathBuf, MovieLinesError>;

    /// Decode `input` to completion, emitting one frame per second.
    ///
    /// An input copy made by `write_input` is removed when decoding ends,
    /// whether or not it succeeded.
    fn run(&self, input: &Path, params: &SamplingParams) -> Result<(), MovieLinesError>;

    /// The store the engine's frames appear in.
    fn frame_store(&self) -> Arc<dyn FrameStore>;
}

const INPUT_PREFIX: &str = "input-";

/// FFmpeg-backed [`DecodeEngine`] writing BMP frames to a working directory.
pub struct FfmpegEngine {
    work_dir: PathBuf,
    loaded: AtomicBool,
    progress: Arc<dyn ProgressCallback>,
    scale: ProgressScale,
    store: Arc<DirectoryFrameStore>,
}

impl Debug for FfmpegEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FfmpegEngine")
            .field("work_dir", &self.work_dir)
            .field("loaded", &self.is_loaded())
            .field("scale", &self.scale)
            .finish_non_exhaustive()
    }
}

impl FfmpegEngine {
    /// Engine that will use `work_dir` for its input copy and output frames.
    ///
    /// The directory is created by [`load`](DecodeEngine::load).
    pub fn new<P: AsRef<Path>>(work_dir: P) -> Self {
        let work_dir = work_dir.as_ref().to_path_buf();
        Self {
            store: Arc::new(DirectoryFrameStore::new(&work_dir)),
            work_dir,
            loaded: AtomicBool::new(false),
            progress: Arc::new(NoOpProgress),
            scale: ProgressScale::single_phase(),
        }
    }

    /// Register the callback that receives decode progress.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// How this engine's native progress ratio maps to a percentage.
    pub fn progress_scale(&self) -> ProgressScale {
        self.scale
    }

    /// Directory holding the input copy and the sampled frames.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn sample(&self, input: &Path, params: &SamplingParams) -> Result<(), MovieLinesError> {
        let mut input_context = ffmpeg_next::format::input(input).map_err(|error| {
            MovieLinesError::Decode(format!("cannot open {}: {error}", input.display()))
        })?;

        let stream = input_context
            .streams()
            .best(Type::Video)
            .ok_or_else(|| MovieLinesError::Decode("no video stream found".to_string()))?;
        let video_stream_index = stream.index();
        let time_base = stream.time_base();
        let decoder_context = CodecContext::from_parameters(stream.parameters())?;
        let mut decoder = decoder_context.decoder().video()?;
        let duration_microseconds = input_context.duration();

        log::info!(
            "Sampling {} (stream={}, {}x{}, duration={:.2}s, filter={})",
            input.display(),
            video_stream_index,
            decoder.width(),
            decoder.height(),
            duration_microseconds.max(0) as f64 / 1_000_000.0,
            params.filter_spec(),
        );

        let expected_samples = (duration_microseconds > 0)
            .then(|| (duration_microseconds as u64).div_ceil(1_000_000));
        let mut tracker = ProgressTracker::new(
            Arc::clone(&self.progress),
            OperationType::FrameSampling,
            expected_samples,
            1,
        );

        let mut sampler = Sampler {
            graph: None,
            filter_spec: params.filter_spec(),
            time_base,
            writer: FrameWriter::new(&self.work_dir),
            filtered_frame: VideoFrame::empty(),
        };
        let mut decoded_frame = VideoFrame::empty();
        let mut position_seconds = 0.0;

        for (stream, packet) in input_context.packets() {
            if stream.index() != video_stream_index {
                continue;
            }

            decoder
                .send_packet(&packet)
                .map_err(|error| MovieLinesError::Decode(error.to_string()))?;

            while decoder.receive_frame(&mut decoded_frame).is_ok() {
                if let Some(pts) = decoded_frame.pts() {
                    position_seconds = crate::conversion::pts_to_seconds(pts, time_base);
                }
                let written = sampler.feed(&decoded_frame)?;
                for _ in 0..written {
                    let ratio =
                        crate::conversion::decode_ratio(position_seconds, duration_microseconds);
                    tracker.advance(
                        Some(Duration::from_secs_f64(position_seconds.max(0.0))),
                        Some(self.scale.percentage(ratio)),
                    );
                }
            }
        }

        // Flush the decoder, then the filter graph (the fps filter holds back
        // its last sample until end of stream).
        decoder
            .send_eof()
            .map_err(|error| MovieLinesError::Decode(error.to_string()))?;
        while decoder.receive_frame(&mut decoded_frame).is_ok() {
            let written = sampler.feed(&decoded_frame)?;
            for _ in 0..written {
                tracker.advance(None, None);
            }
        }
        for _ in 0..sampler.flush()? {
            tracker.advance(None, None);
        }

        tracker.finish(Some(self.scale.percentage(1.0)));
        log::info!(
            "Sampling finished: {} frame(s) written to {}",
            sampler.writer.written(),
            self.work_dir.display()
        );
        Ok(())
    }

    /// Delete an input copy made by [`write_input`](DecodeEngine::write_input).
    /// Files outside the working directory are left alone.
    fn remove_input(&self, input: &Path) {
        let owned = input.parent() == Some(self.work_dir.as_path())
            && input
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(INPUT_PREFIX));
        if !owned {
            return;
        }
        match fs::remove_file(input) {
            Ok(()) => log::debug!("Removed input {}", input.display()),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => log::warn!("Could not remove input {}: {error}", input.display()),
        }
    }
}

impl DecodeEngine for FfmpegEngine {
    fn load(&self) -> Result<(), MovieLinesError> {
        if self.is_loaded() {
            return Ok(());
        }

        log::debug!("Loading FFmpeg engine (work_dir={})", self.work_dir.display());

        ffmpeg_next::init().map_err(|error| {
            MovieLinesError::EngineLoad(format!("FFmpeg initialisation failed: {error}"))
        })?;
        fs::create_dir_all(&self.work_dir).map_err(|error| {
            MovieLinesError::EngineLoad(format!(
                "cannot create working directory {}: {error}",
                self.work_dir.display()
            ))
        })?;

        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn write_input(&self, source: &VideoSource) -> Result<PathBuf, MovieLinesError> {
        if !self.is_loaded() {
            return Err(MovieLinesError::EngineLoad(
                "engine must be loaded before writing input".to_string(),
            ));
        }

        // Prefixed so an input named like a frame is never listed as one.
        let path = self.work_dir.join(format!("{INPUT_PREFIX}{}", source.name()));
        fs::write(&path, source.bytes())?;
        log::debug!("Wrote input {} ({} bytes)", path.display(), source.len());
        Ok(path)
    }

    fn run(&self, input: &Path, params: &SamplingParams) -> Result<(), MovieLinesError> {
        if !self.is_loaded() {
            return Err(MovieLinesError::EngineLoad(
                "engine must be loaded before running".to_string(),
            ));
        }

        let result = self.sample(input, params);
        self.remove_input(input);
        result
    }

    fn frame_store(&self) -> Arc<dyn FrameStore> {
        self.store.clone()
    }
}

/// Lazily built `buffer → fps[,scale] → format → buffersink` graph.
///
/// The graph is created from the first decoded frame so the buffer source
/// matches the decoder's real output format.
struct Sampler {
    graph: Option<FilterGraph>,
    filter_spec: String,
    time_base: ffmpeg_next::Rational,
    writer: FrameWriter,
    filtered_frame: VideoFrame,
}

impl Sampler {
    /// Push one decoded frame through the graph; returns frames written.
    fn feed(&mut self, frame: &VideoFrame) -> Result<u64, MovieLinesError> {
        if self.graph.is_none() {
            self.graph = Some(build_graph(frame, self.time_base, &self.filter_spec)?);
        }
        let Some(graph) = self.graph.as_mut() else {
            return Ok(0);
        };

        graph
            .get("in")
            .ok_or_else(|| MovieLinesError::Decode("filter 'in' not found".to_string()))?
            .source()
            .add(frame)
            .map_err(|error| MovieLinesError::Decode(format!("failed to feed filter: {error}")))?;

        self.drain()
    }

    /// Signal end of stream to the graph and write whatever it still holds.
    fn flush(&mut self) -> Result<u64, MovieLinesError> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(0);
        };

        graph
            .get("in")
            .ok_or_else(|| MovieLinesError::Decode("filter 'in' not found".to_string()))?
            .source()
            .flush()
            .map_err(|error| MovieLinesError::Decode(format!("failed to flush filter: {error}")))?;

        self.drain()
    }

    fn drain(&mut self) -> Result<u64, MovieLinesError> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(0);
        };

        let mut written = 0;
        while graph
            .get("out")
            .ok_or_else(|| MovieLinesError::Decode("filter 'out' not found".to_string()))?
            .sink()
            .frame(&mut self.filtered_frame)
            .is_ok()
        {
            self.writer.write(&self.filtered_frame)?;
            written += 1;
        }
        Ok(written)
    }
}

fn build_graph(
    frame: &VideoFrame,
    time_base: ffmpeg_next::Rational,
    filter_spec: &str,
) -> Result<FilterGraph, MovieLinesError> {
    let mut graph = FilterGraph::new();

    let buffer_args = format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
        frame.width(),
        frame.height(),
        AVPixelFormat::from(frame.format()) as i32,
        time_base.numerator(),
        time_base.denominator(),
    );

    let buffer = ffmpeg_next::filter::find("buffer")
        .ok_or_else(|| MovieLinesError::Decode("FFmpeg 'buffer' filter not found".to_string()))?;
    graph
        .add(&buffer, "in", &buffer_args)
        .map_err(|error| MovieLinesError::Decode(format!("failed to add buffer filter: {error}")))?;

    let buffersink = ffmpeg_next::filter::find("buffersink").ok_or_else(|| {
        MovieLinesError::Decode("FFmpeg 'buffersink' filter not found".to_string())
    })?;
    graph.add(&buffersink, "out", "").map_err(|error| {
        MovieLinesError::Decode(format!("failed to add buffersink filter: {error}"))
    })?;

    graph
        .output("in", 0)
        .and_then(|parser| parser.input("out", 0))
        .and_then(|parser| parser.parse(filter_spec))
        .map_err(|error| MovieLinesError::Decode(format!("filter graph parse error: {error}")))?;

    graph
        .validate()
        .map_err(|error| MovieLinesError::Decode(format!("filter graph validation: {error}")))?;

    log::debug!("Filter graph ready: {buffer_args} -> {filter_spec}");
    Ok(graph)
}

/// Writes RGB24 frames as `<n>.bmp`, numbering from 1.
struct FrameWriter {
    directory: PathBuf,
    next_index: u64,
}

impl FrameWriter {
    fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            next_index: 1,
        }
    }

    fn written(&self) -> u64 {
        self.next_index - 1
    }

    fn write(&mut self, rgb_frame: &VideoFrame) -> Result<(), MovieLinesError> {
        let width = rgb_frame.width();
        let height = rgb_frame.height();
        let buffer = crate::conversion::frame_to_buffer(rgb_frame, width, height, 3);
        let image = RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            MovieLinesError::Decode("sampled frame has an unexpected buffer size".to_string())
        })?;

        let frame = FrameId::from_index(self.next_index);
        let final_path = self.directory.join(frame.name());
        let staging_path = self.directory.join(format!("{}.part", frame.name()));

        image.save_with_format(&staging_path, ImageFormat::Bmp)?;
        fs::rename(&staging_path, &final_path)?;

        log::trace!("Wrote sample {} ({width}x{height})", final_path.display());
        self.next_index += 1;
        Ok(())
    }
}
