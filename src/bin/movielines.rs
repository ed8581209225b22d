use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use movielines::{
    BarcodeOptions, DEFAULT_STRIP_HEIGHT, FfmpegEngine, FfmpegLogLevel, ImageFileDisplay,
    OperationType, Orchestrator, ProgressCallback, ProgressInfo, ReductionMethod, Rgb,
    VideoSource,
};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  movielines strip movie.mp4 --out barcode.png\n  movielines strip movie.mp4 --out barcode.png --method average --height 200 --progress\n  movielines strip movie.mp4 --out barcode.png --preview frame.bmp --poll-interval-ms 1000\n  movielines strip movie.mp4 --out barcode.png --json\n  movielines completions zsh > _movielines";

#[derive(Debug, Parser)]
#[command(
    name = "movielines",
    version,
    about = "Render a video as a color barcode, one line per second",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar while decoding.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode a video and render its color strip.
    #[command(
        about = "Render the color strip of a video",
        after_help = "The strip is repainted after every poll, so --out can be watched while the video decodes."
    )]
    Strip {
        input: String,
        #[arg(long, default_value = "strip.png")]
        out: PathBuf,
        /// Color reduction method (dominant, average).
        #[arg(long, default_value = "dominant")]
        method: String,
        /// Strip height in pixels.
        #[arg(long, default_value_t = DEFAULT_STRIP_HEIGHT)]
        height: u32,
        /// Fixed output width; by default the strip is stretched while
        /// running and saved at one pixel per second when done.
        #[arg(long)]
        width: Option<u32>,
        /// How often to poll for decoded frames.
        #[arg(long, default_value_t = 5000)]
        poll_interval_ms: u64,
        /// Also write the most recently decoded frame here.
        #[arg(long)]
        preview: Option<PathBuf>,
        /// Scratch directory for decoded frames.
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Print the sampled colors as JSON.
        #[arg(long)]
        json: bool,
        /// Allow overwriting an existing output file.
        #[arg(long)]
        overwrite: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_method(value: &str) -> Option<ReductionMethod> {
    value.parse().ok()
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    value.parse().ok()
}

fn colors_json(colors: &[Rgb]) -> serde_json::Value {
    json!(colors.iter().map(|color| color.to_hex()).collect::<Vec<_>>())
}

fn default_work_dir(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("input");
    std::env::temp_dir().join(format!("movielines-{stem}-{}", std::process::id()))
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        movielines::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

/// Drives an indicatif bar from both phases: decode progress moves the bar,
/// extracted samples update the message.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(100);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}% {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        bar.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        match info.operation {
            OperationType::FrameSampling => {
                if let Some(percentage) = info.percentage {
                    self.bar.set_position(percentage.round() as u64);
                }
            }
            OperationType::ColorExtraction => {
                self.bar.set_message(format!("{} sample(s)", info.current));
            }
            _ => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_strip(
    global: &GlobalOptions,
    input: &str,
    out: &Path,
    method: &str,
    height: u32,
    width: Option<u32>,
    poll_interval_ms: u64,
    preview: Option<&Path>,
    work_dir: Option<&Path>,
    json_output: bool,
    overwrite: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let method = parse_method(method).ok_or(format!("unsupported --method: {method}"))?;
    if out.exists() && !overwrite {
        return Err(format!(
            "output file already exists: {} (use --overwrite)",
            out.display()
        )
        .into());
    }

    let input_path = Path::new(input);
    let source = VideoSource::from_path(input_path)?;
    let (work_dir, owned_work_dir) = match work_dir {
        Some(directory) => (directory.to_path_buf(), false),
        None => (default_work_dir(input_path), true),
    };

    let progress = if global.progress {
        Some(Arc::new(BarProgress::new()?))
    } else {
        None
    };

    let mut engine = FfmpegEngine::new(&work_dir);
    let mut options = BarcodeOptions::new()
        .with_method(method)
        .with_strip_height(height)
        .with_poll_interval(Duration::from_millis(poll_interval_ms));
    if let Some(progress) = &progress {
        engine = engine.with_progress(progress.clone());
        options = options.with_progress(progress.clone()).with_batch_size(1);
    }

    let mut display = ImageFileDisplay::new(out);
    if let Some(path) = preview {
        display = display.with_preview(path);
    }
    if let Some(width) = width {
        display = display.with_width(width);
    }

    if global.verbose {
        eprintln!(
            "decoding {} ({} bytes) into {}, method={method}, poll={}ms",
            source.name(),
            source.len(),
            work_dir.display(),
            poll_interval_ms,
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(engine),
        Arc::new(display),
        options,
    ));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;
    let result = runtime.block_on(orchestrator.run(&source));

    if owned_work_dir {
        if let Err(error) = fs::remove_dir_all(&work_dir) {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("could not remove {}: {error}", work_dir.display()).yellow()
            );
        }
    }
    let report = result?;

    if let Some(progress) = progress {
        progress.bar.finish_with_message("done");
    }

    if global.verbose {
        eprintln!(
            "{} tick(s), {} skipped, {:.2}s",
            report.ticks,
            report.skipped_ticks,
            report.elapsed.as_secs_f64()
        );
    }

    if json_output {
        let payload = json!({
            "input": source.name(),
            "output": out.display().to_string(),
            "method": method.as_str(),
            "samples": report.samples(),
            "height": report.snapshot.height(),
            "colors": colors_json(&report.colors),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "{} {}",
            "saved".green().bold(),
            format!(
                "{} sample(s) from {} to {}",
                report.samples(),
                source.name(),
                out.display()
            )
            .green()
        );
    }

    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Strip {
            input,
            out,
            method,
            height,
            width,
            poll_interval_ms,
            preview,
            work_dir,
            json,
            overwrite,
        } => run_strip(
            &cli.global,
            &input,
            &out,
            &method,
            height,
            width,
            poll_interval_ms,
            preview.as_deref(),
            work_dir.as_deref(),
            json,
            overwrite,
        )?,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "movielines", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn error_message(error: &(dyn std::error::Error + 'static)) -> String {
    if let Some(error) = error.downcast_ref::<movielines::MovieLinesError>() {
        return error.user_message();
    }
    let message = error.to_string();
    if message.trim().is_empty() {
        movielines::FALLBACK_MESSAGE.to_string()
    } else {
        message
    }
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {}", error_message(error.as_ref()));
        std::process::exit(1);
    }
}
