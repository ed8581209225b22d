//! Configuration builder tests.

use std::{sync::Arc, time::Duration};

use movielines::{
    BarcodeOptions, DEFAULT_POLL_INTERVAL, ProgressCallback, ProgressInfo, ReductionMethod,
    SamplingParams,
};

struct NoisyProgress;

impl ProgressCallback for NoisyProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

#[test]
fn defaults() {
    let options = BarcodeOptions::new();
    assert_eq!(options.method(), ReductionMethod::Dominant);
    assert_eq!(options.poll_interval(), DEFAULT_POLL_INTERVAL);
    assert_eq!(options.poll_interval(), Duration::from_secs(5));
    assert_eq!(options.strip_height(), 100);
}

#[test]
fn builder_overrides() {
    let options = BarcodeOptions::default()
        .with_method(ReductionMethod::Average)
        .with_poll_interval(Duration::from_millis(250))
        .with_strip_height(32);

    assert_eq!(options.method(), ReductionMethod::Average);
    assert_eq!(options.poll_interval(), Duration::from_millis(250));
    assert_eq!(options.strip_height(), 32);
}

#[test]
fn degenerate_values_are_clamped() {
    let options = BarcodeOptions::new()
        .with_poll_interval(Duration::ZERO)
        .with_strip_height(0);

    assert_eq!(options.poll_interval(), Duration::from_millis(1));
    assert_eq!(options.strip_height(), 1);
}

#[test]
fn debug_hides_the_callback() {
    let options = BarcodeOptions::new()
        .with_progress(Arc::new(NoisyProgress))
        .with_batch_size(3);
    let debug = format!("{options:?}");

    assert!(debug.contains("has_progress: true"), "{debug}");
    assert!(debug.contains("batch_size: 3"), "{debug}");
}

// ── Sampling parameters ────────────────────────────────────────────

#[test]
fn dominant_samples_full_frames() {
    let params = BarcodeOptions::new().sampling();
    assert!(!params.reduce_to_single_pixel);
    assert_eq!(params.filter_spec(), "fps=fps=1/1,format=pix_fmts=rgb24");
}

#[test]
fn average_lets_the_engine_downscale() {
    let params = SamplingParams::for_method(ReductionMethod::Average);
    assert!(params.reduce_to_single_pixel);
    assert_eq!(
        params.filter_spec(),
        "fps=fps=1/1,scale=1:1,format=pix_fmts=rgb24"
    );
    assert_eq!(SamplingParams::FRAMES_PER_SECOND, 1);
}
