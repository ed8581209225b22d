//! Internal helpers shared by the FFmpeg engine.

use ffmpeg_next::{Rational, frame::Video as VideoFrame};

/// Copy pixel data from an FFmpeg video frame into a tightly-packed buffer.
///
/// FFmpeg rows are frequently padded (stride > width × bytes per pixel);
/// the padding is stripped so the result can go straight into
/// [`image::RgbImage::from_raw`].
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_bytes = (width as usize) * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == row_bytes {
        data[..row_bytes * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_bytes]);
        }
        buffer
    }
}

/// Rescale a PTS value from stream time base to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator())
}

/// Fraction of the video decoded so far, given the current position and the
/// container duration in microseconds.
pub(crate) fn decode_ratio(position_seconds: f64, duration_microseconds: i64) -> f64 {
    if duration_microseconds <= 0 {
        return 0.0;
    }
    let duration_seconds = duration_microseconds as f64 / 1_000_000.0;
    (position_seconds / duration_seconds).clamp(0.0, 1.0)
}
