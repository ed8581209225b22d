//! Reducing a decoded still image to one representative color.
//!
//! Two methods are supported:
//!
//! - [`ReductionMethod::Dominant`] quantizes the image into a small palette
//!   (modified median cut over a 5-bit-per-channel histogram) and returns
//!   the color of the most populous palette box.
//! - [`ReductionMethod::Average`] returns the arithmetic mean of every
//!   pixel. When the decode engine has already scaled the frame down to
//!   1×1 this is simply that pixel.
//!
//! # Example
//!
//! ```no_run
//! use movielines::{ReductionMethod, color};
//!
//! let bytes = std::fs::read("1.bmp")?;
//! let color = color::reduce(&bytes, ReductionMethod::Average)?;
//! println!("{color}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use image::DynamicImage;

use crate::error::MovieLinesError;

/// Bits kept per channel when building the quantization histogram.
const SIGNIFICANT_BITS: u32 = 5;
const RIGHT_SHIFT: u32 = 8 - SIGNIFICANT_BITS;
const HISTOGRAM_SIDE: usize = 1 << SIGNIFICANT_BITS;

/// Pixels with every channel above this are treated as background.
const WHITE_THRESHOLD: u8 = 250;
/// Pixels with alpha below this are ignored.
const ALPHA_THRESHOLD: u8 = 125;

/// Default number of palette boxes for [`ReductionMethod::Dominant`].
pub const DEFAULT_PALETTE_SIZE: usize = 5;
/// Default pixel sampling stride for [`ReductionMethod::Dominant`].
pub const DEFAULT_QUALITY: usize = 10;

/// An 8-bit RGB color sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// Build a color from its three channels.
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self([red, green, blue])
    }

    /// Red channel.
    pub fn red(self) -> u8 {
        self.0[0]
    }

    /// Green channel.
    pub fn green(self) -> u8 {
        self.0[1]
    }

    /// Blue channel.
    pub fn blue(self) -> u8 {
        self.0[2]
    }

    /// CSS-style `#rrggbb` notation.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "rgb({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

impl From<image::Rgb<u8>> for Rgb {
    fn from(pixel: image::Rgb<u8>) -> Self {
        Self(pixel.0)
    }
}

impl From<Rgb> for image::Rgb<u8> {
    fn from(color: Rgb) -> Self {
        image::Rgb(color.0)
    }
}

/// How a frame is reduced to a single color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReductionMethod {
    /// Most populous color after palette quantization. This is the default.
    #[default]
    Dominant,
    /// Mean of all pixels.
    Average,
}

impl ReductionMethod {
    /// Lowercase name, as accepted by `FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            ReductionMethod::Dominant => "dominant",
            ReductionMethod::Average => "average",
        }
    }
}

impl Display for ReductionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReductionMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dominant" | "palette" => Ok(ReductionMethod::Dominant),
            "average" | "avg" | "mean" => Ok(ReductionMethod::Average),
            other => Err(format!("unknown reduction method: {other}")),
        }
    }
}

/// A configured color reducer.
///
/// Cheap to copy, so it can be moved onto a blocking thread per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorReducer {
    method: ReductionMethod,
    palette_size: usize,
    quality: usize,
}

impl Default for ColorReducer {
    fn default() -> Self {
        Self::new(ReductionMethod::default())
    }
}

impl ColorReducer {
    /// Reducer for `method` with default palette settings.
    pub fn new(method: ReductionMethod) -> Self {
        Self {
            method,
            palette_size: DEFAULT_PALETTE_SIZE,
            quality: DEFAULT_QUALITY,
        }
    }

    /// Number of palette boxes used by the dominant method (2..=256).
    #[must_use]
    pub fn with_palette_size(mut self, palette_size: usize) -> Self {
        self.palette_size = palette_size.clamp(2, 256);
        self
    }

    /// Sample every `quality`-th pixel for the dominant method (minimum 1).
    #[must_use]
    pub fn with_quality(mut self, quality: usize) -> Self {
        self.quality = quality.max(1);
        self
    }

    /// The method this reducer applies.
    pub fn method(&self) -> ReductionMethod {
        self.method
    }

    /// Decode `bytes` and reduce the image to one color.
    ///
    /// # Errors
    ///
    /// Returns [`MovieLinesError::Reduce`] if the bytes are not a decodable
    /// image or the image has no pixels.
    pub fn reduce(&self, bytes: &[u8]) -> Result<Rgb, MovieLinesError> {
        let image = image::load_from_memory(bytes)
            .map_err(|error| MovieLinesError::Reduce(error.to_string()))?;
        self.reduce_image(&image)
    }

    /// Reduce an already decoded image to one color.
    pub fn reduce_image(&self, image: &DynamicImage) -> Result<Rgb, MovieLinesError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(MovieLinesError::Reduce("image has no pixels".to_string()));
        }

        let color = match self.method {
            ReductionMethod::Average => average_color(image),
            ReductionMethod::Dominant => dominant_color(image, self.palette_size, self.quality),
        };
        Ok(color)
    }
}

/// Reduce encoded image bytes with the default settings for `method`.
pub fn reduce(bytes: &[u8], method: ReductionMethod) -> Result<Rgb, MovieLinesError> {
    ColorReducer::new(method).reduce(bytes)
}

/// Arithmetic mean of every pixel, rounded to the nearest integer.
pub fn average_color(image: &DynamicImage) -> Rgb {
    let rgb = image.to_rgb8();
    let count = u64::from(rgb.width()) * u64::from(rgb.height());
    if count == 0 {
        return Rgb::default();
    }

    let mut sums = [0_u64; 3];
    for pixel in rgb.pixels() {
        sums[0] += u64::from(pixel.0[0]);
        sums[1] += u64::from(pixel.0[1]);
        sums[2] += u64::from(pixel.0[2]);
    }

    let mean = |sum: u64| ((sum + count / 2) / count) as u8;
    Rgb::new(mean(sums[0]), mean(sums[1]), mean(sums[2]))
}

/// Color of the most populous box in the image's quantized palette.
pub fn dominant_color(image: &DynamicImage, palette_size: usize, quality: usize) -> Rgb {
    palette(image, palette_size, quality)
        .into_iter()
        .next()
        .map(|(color, _)| color)
        .unwrap_or_default()
}

/// Quantize the image into at most `palette_size` colors.
///
/// Returns `(color, population)` pairs, most populous first.
pub fn palette(image: &DynamicImage, palette_size: usize, quality: usize) -> Vec<(Rgb, u64)> {
    let rgba = image.to_rgba8();
    let stride = quality.max(1);

    let mut histogram = build_histogram(rgba.pixels().step_by(stride).filter(|pixel| {
        let [r, g, b, a] = pixel.0;
        a >= ALPHA_THRESHOLD
            && !(r > WHITE_THRESHOLD && g > WHITE_THRESHOLD && b > WHITE_THRESHOLD)
    }));

    // Entirely white (or transparent) frames still need a color.
    if histogram.total == 0 {
        histogram = build_histogram(rgba.pixels().step_by(stride));
    }
    if histogram.total == 0 {
        return Vec::new();
    }

    let mut boxes = vec![ColorBox::enclosing(&histogram)];
    while boxes.len() < palette_size.max(1) {
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.is_splittable())
            .max_by_key(|(_, candidate)| candidate.count)
            .map(|(index, _)| index);

        let Some(index) = candidate else {
            break;
        };

        let target = boxes.swap_remove(index);
        let (left, right) = target.split(&histogram);
        boxes.push(left);
        boxes.push(right);
    }

    boxes.sort_by(|a, b| b.count.cmp(&a.count));
    boxes
        .iter()
        .map(|color_box| (color_box.average(&histogram), color_box.count))
        .collect()
}

struct Histogram {
    counts: Vec<u64>,
    total: u64,
}

impl Histogram {
    fn index(r: usize, g: usize, b: usize) -> usize {
        (r << (2 * SIGNIFICANT_BITS)) | (g << SIGNIFICANT_BITS) | b
    }

    fn get(&self, r: usize, g: usize, b: usize) -> u64 {
        self.counts[Self::index(r, g, b)]
    }
}

fn build_histogram<'a>(pixels: impl Iterator<Item = &'a image::Rgba<u8>>) -> Histogram {
    let mut counts = vec![0_u64; HISTOGRAM_SIDE * HISTOGRAM_SIDE * HISTOGRAM_SIDE];
    let mut total = 0;
    for pixel in pixels {
        let [r, g, b, _] = pixel.0;
        let index = Histogram::index(
            usize::from(r >> RIGHT_SHIFT),
            usize::from(g >> RIGHT_SHIFT),
            usize::from(b >> RIGHT_SHIFT),
        );
        counts[index] += 1;
        total += 1;
    }
    Histogram { counts, total }
}

/// An axis-aligned box in quantized color space (bounds inclusive).
#[derive(Debug, Clone, Copy)]
struct ColorBox {
    low: [usize; 3],
    high: [usize; 3],
    count: u64,
}

impl ColorBox {
    fn enclosing(histogram: &Histogram) -> Self {
        Self::shrunk([0; 3], [HISTOGRAM_SIDE - 1; 3], histogram)
    }

    /// Tighten `low..=high` to the populated cells and count them.
    fn shrunk(low: [usize; 3], high: [usize; 3], histogram: &Histogram) -> Self {
        let mut min = high;
        let mut max = low;
        let mut count = 0;
        for r in low[0]..=high[0] {
            for g in low[1]..=high[1] {
                for b in low[2]..=high[2] {
                    let cell = histogram.get(r, g, b);
                    if cell == 0 {
                        continue;
                    }
                    count += cell;
                    for (axis, value) in [r, g, b].into_iter().enumerate() {
                        min[axis] = min[axis].min(value);
                        max[axis] = max[axis].max(value);
                    }
                }
            }
        }

        if count == 0 {
            return Self { low, high, count };
        }
        Self {
            low: min,
            high: max,
            count,
        }
    }

    fn extent(&self, axis: usize) -> usize {
        self.high[axis] - self.low[axis]
    }

    fn is_splittable(&self) -> bool {
        self.count > 1 && (0..3).any(|axis| self.extent(axis) > 0)
    }

    /// Cut along the longest axis at the population median.
    fn split(&self, histogram: &Histogram) -> (ColorBox, ColorBox) {
        let axis = (0..3).max_by_key(|&axis| self.extent(axis)).unwrap_or(0);

        let half = self.count / 2;
        let mut cumulative = 0;
        let mut cut = self.low[axis];
        for slice in self.low[axis]..self.high[axis] {
            cumulative += self.slice_count(axis, slice, histogram);
            cut = slice;
            if cumulative >= half.max(1) {
                break;
            }
        }

        let mut left_high = self.high;
        left_high[axis] = cut;
        let mut right_low = self.low;
        right_low[axis] = cut + 1;

        (
            ColorBox::shrunk(self.low, left_high, histogram),
            ColorBox::shrunk(right_low, self.high, histogram),
        )
    }

    fn slice_count(&self, axis: usize, slice: usize, histogram: &Histogram) -> u64 {
        let mut low = self.low;
        let mut high = self.high;
        low[axis] = slice;
        high[axis] = slice;

        let mut count = 0;
        for r in low[0]..=high[0] {
            for g in low[1]..=high[1] {
                for b in low[2]..=high[2] {
                    count += histogram.get(r, g, b);
                }
            }
        }
        count
    }

    /// Population-weighted center of the box, mapped back to 8 bits.
    fn average(&self, histogram: &Histogram) -> Rgb {
        let multiplier = f64::from(1_u32 << RIGHT_SHIFT);
        let mut sums = [0.0_f64; 3];
        let mut total = 0_u64;

        for r in self.low[0]..=self.high[0] {
            for g in self.low[1]..=self.high[1] {
                for b in self.low[2]..=self.high[2] {
                    let cell = histogram.get(r, g, b);
                    if cell == 0 {
                        continue;
                    }
                    total += cell;
                    for (axis, value) in [r, g, b].into_iter().enumerate() {
                        sums[axis] += cell as f64 * (value as f64 + 0.5) * multiplier;
                    }
                }
            }
        }

        let channel = |axis: usize| -> u8 {
            let value = if total > 0 {
                sums[axis] / total as f64
            } else {
                (self.low[axis] + self.high[axis] + 1) as f64 * multiplier / 2.0
            };
            value.round().clamp(0.0, 255.0) as u8
        };
        Rgb::new(channel(0), channel(1), channel(2))
    }
}
