//! The growing color strip.
//!
//! [`Compositor`] owns the pixel buffer: each appended color becomes one
//! 1-pixel-wide column spanning the full strip height. The buffer is stored
//! column-major so appending never touches earlier columns, which keeps a
//! whole run linear in the number of samples no matter how frames are
//! batched across ticks.
//!
//! Displays never see the live buffer. They paint from a [`StripSnapshot`],
//! an immutable copy taken by [`Compositor::publish`].

use std::sync::Arc;

use image::{RgbImage, imageops::FilterType};

use crate::color::Rgb;

/// Default strip height in pixels.
pub const DEFAULT_STRIP_HEIGHT: u32 = 100;

/// Horizontal stretch applied to the strip while a run is in progress.
pub const DISPLAY_STRETCH: f32 = 3.5;

/// Width of the display before the first column arrives.
pub const MIN_DISPLAY_WIDTH: u32 = 1200;

/// Append-only pixel buffer, one column per color sample.
#[derive(Debug, Clone)]
pub struct Compositor {
    height: u32,
    colors: Vec<Rgb>,
    /// Column-major RGB bytes: `height * 3` bytes per column.
    columns: Vec<u8>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(DEFAULT_STRIP_HEIGHT)
    }
}

impl Compositor {
    /// Create an empty strip of fixed `height` (minimum 1).
    pub fn new(height: u32) -> Self {
        Self {
            height: height.max(1),
            colors: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Paint one new rightmost column entirely with `color`.
    pub fn append_column(&mut self, color: Rgb) {
        self.colors.push(color);
        for _ in 0..self.height {
            self.columns.extend_from_slice(&color.0);
        }
    }

    /// Immutable copy of the current buffer.
    pub fn publish(&self) -> StripSnapshot {
        StripSnapshot {
            width: self.width(),
            height: self.height,
            columns: Arc::from(self.columns.as_slice()),
        }
    }

    /// Drop every column and start over at width 0.
    pub fn reset(&mut self) {
        self.colors.clear();
        self.columns.clear();
    }

    /// Current width, equal to the number of appended colors.
    pub fn width(&self) -> u32 {
        self.colors.len() as u32
    }

    /// Height of every column in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Colors appended so far, in column order.
    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }
}

/// A published, read-only copy of the strip.
///
/// Cheap to clone; safe to hand to another thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripSnapshot {
    width: u32,
    height: u32,
    columns: Arc<[u8]>,
}

impl StripSnapshot {
    /// A zero-width snapshot.
    pub fn empty(height: u32) -> Self {
        Self {
            width: 0,
            height: height.max(1),
            columns: Arc::from(Vec::new()),
        }
    }

    /// Number of columns, one per sample.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether no column has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.width == 0
    }

    /// Color of column `column`, if it exists.
    pub fn column(&self, column: u32) -> Option<Rgb> {
        if column >= self.width {
            return None;
        }
        let start = column as usize * self.column_stride();
        let bytes = self.columns.get(start..start + 3)?;
        Some(Rgb::new(bytes[0], bytes[1], bytes[2]))
    }

    /// One color per column.
    pub fn colors(&self) -> Vec<Rgb> {
        (0..self.width).filter_map(|column| self.column(column)).collect()
    }

    /// Pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = x as usize * self.column_stride() + y as usize * 3;
        let bytes = self.columns.get(start..start + 3)?;
        Some(Rgb::new(bytes[0], bytes[1], bytes[2]))
    }

    /// Row-major image at the strip's native size.
    ///
    /// A zero-width snapshot yields a zero-width image.
    pub fn to_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            self.pixel(x, y).unwrap_or_default().into()
        })
    }

    /// Nearest-neighbour stretch to `width` pixels, keeping the height.
    pub fn scaled(&self, width: u32) -> RgbImage {
        let native = self.to_image();
        if self.width == 0 || width == 0 || width == self.width {
            return native;
        }
        image::imageops::resize(&native, width, self.height, FilterType::Nearest)
    }

    /// Width the strip is shown at: stretched while a run is in progress,
    /// native once it has finished.
    pub fn display_width(&self, in_progress: bool) -> u32 {
        if self.width == 0 {
            MIN_DISPLAY_WIDTH
        } else if in_progress {
            (self.width as f32 * DISPLAY_STRETCH).round() as u32
        } else {
            self.width
        }
    }

    fn column_stride(&self) -> usize {
        self.height as usize * 3
    }
}
