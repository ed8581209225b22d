//! Where published strips and preview frames end up.
//!
//! The orchestrator pushes every published [`StripSnapshot`] and the most
//! recent decoded frame to a [`DisplaySurface`]. Surfaces only read the
//! snapshot; the buffer behind it stays owned by the compositor.

use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use image::ImageFormat;

use crate::{compositor::StripSnapshot, error::MovieLinesError};

/// A sink for the strip and the live preview.
pub trait DisplaySurface: Send + Sync {
    /// Repaint from `snapshot`. `in_progress` is `false` for the final
    /// repaint of a run.
    fn present(&self, snapshot: &StripSnapshot, in_progress: bool) -> Result<(), MovieLinesError>;

    /// Show the most recently decoded frame, or clear the preview.
    fn show_preview(&self, frame: Option<&[u8]>) -> Result<(), MovieLinesError>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl DisplaySurface for NullDisplay {
    fn present(&self, _snapshot: &StripSnapshot, _in_progress: bool) -> Result<(), MovieLinesError> {
        Ok(())
    }

    fn show_preview(&self, _frame: Option<&[u8]>) -> Result<(), MovieLinesError> {
        Ok(())
    }
}

/// Writes the strip (and optionally the preview frame) to image files.
///
/// Files are written to a sibling temporary path and renamed into place, so
/// a viewer watching the path never reads a half-written image.
#[derive(Debug, Clone)]
pub struct ImageFileDisplay {
    strip_path: PathBuf,
    preview_path: Option<PathBuf>,
    width: Option<u32>,
}

impl ImageFileDisplay {
    /// Write the strip to `strip_path`; the format follows the extension.
    pub fn new<P: AsRef<Path>>(strip_path: P) -> Self {
        Self {
            strip_path: strip_path.as_ref().to_path_buf(),
            preview_path: None,
            width: None,
        }
    }

    /// Also write the preview frame to `path` while a run is in progress.
    #[must_use]
    pub fn with_preview<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.preview_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Always stretch the strip to `width` pixels instead of the default
    /// in-progress / final display width.
    #[must_use]
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width.max(1));
        self
    }

    /// Where the strip is written.
    pub fn strip_path(&self) -> &Path {
        &self.strip_path
    }
}

impl DisplaySurface for ImageFileDisplay {
    fn present(&self, snapshot: &StripSnapshot, in_progress: bool) -> Result<(), MovieLinesError> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let width = self
            .width
            .unwrap_or_else(|| snapshot.display_width(in_progress));
        let image = snapshot.scaled(width);

        let format = ImageFormat::from_path(&self.strip_path)
            .map_err(|error| write_failed(&self.strip_path, error))?;
        let staging = staging_path(&self.strip_path);
        image
            .save_with_format(&staging, format)
            .map_err(|error| write_failed(&self.strip_path, error))?;
        fs::rename(&staging, &self.strip_path)
            .map_err(|error| write_failed(&self.strip_path, error))?;

        log::trace!(
            "Repainted {} ({}x{}, {} samples)",
            self.strip_path.display(),
            width,
            snapshot.height(),
            snapshot.width(),
        );
        Ok(())
    }

    fn show_preview(&self, frame: Option<&[u8]>) -> Result<(), MovieLinesError> {
        let Some(path) = &self.preview_path else {
            return Ok(());
        };

        match frame {
            Some(bytes) => {
                let staging = staging_path(path);
                fs::write(&staging, bytes).map_err(|error| write_failed(path, error))?;
                fs::rename(&staging, path).map_err(|error| write_failed(path, error))?;
            }
            None => match fs::remove_file(path) {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(MovieLinesError::Display(format!(
                        "cannot clear {}: {error}",
                        path.display()
                    )));
                }
            },
        }
        Ok(())
    }
}

fn write_failed(path: &Path, error: impl fmt::Display) -> MovieLinesError {
    MovieLinesError::Display(format!("cannot write {}: {error}", path.display()))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
