//! Error types for the `movielines` crate.
//!
//! This module defines [`MovieLinesError`], the unified error type returned
//! by every fallible operation in the crate. None of these errors are retried
//! internally: they abort the current tick (or the whole run) and surface to
//! whoever started it.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `movielines` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MovieLinesError {
    /// The decode engine could not be initialised. The run never starts.
    #[error("Failed to load decode engine: {0}")]
    EngineLoad(String),

    /// The decode engine failed mid-run (bad input, unsupported codec, ...).
    #[error("Failed to decode video: {0}")]
    Decode(String),

    /// A frame's bytes could not be interpreted as an image.
    #[error("Failed to extract a color from frame: {0}")]
    Reduce(String),

    /// Listing, reading, or deleting a frame in the frame store failed.
    #[error("Frame store I/O failed for {frame}: {source}")]
    StoreIo {
        /// The frame (or directory) the operation targeted.
        frame: String,
        /// Underlying I/O failure.
        #[source]
        source: IoError,
    },

    /// The video source could not be read or has no usable name.
    #[error("Invalid video source {path}: {reason}")]
    InvalidSource {
        /// Path (or name) the source was created from.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The display surface failed to repaint.
    #[error("Display error: {0}")]
    Display(String),

    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    TaskJoin(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error outside the frame store.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while encoding or decoding a picture.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl From<FfmpegError> for MovieLinesError {
    fn from(error: FfmpegError) -> Self {
        MovieLinesError::FfmpegError(error.to_string())
    }
}

impl From<tokio::task::JoinError> for MovieLinesError {
    fn from(error: tokio::task::JoinError) -> Self {
        MovieLinesError::TaskJoin(error.to_string())
    }
}

impl MovieLinesError {
    /// Wrap a frame-store I/O failure with the frame it concerned.
    pub(crate) fn store_io(frame: impl Into<String>, source: IoError) -> Self {
        MovieLinesError::StoreIo {
            frame: frame.into(),
            source,
        }
    }

    /// Message suitable for an end user: the error's own text, or a generic
    /// fallback when the upstream component gave no detail.
    pub fn user_message(&self) -> String {
        match self {
            MovieLinesError::EngineLoad(detail)
            | MovieLinesError::Decode(detail)
            | MovieLinesError::Reduce(detail)
            | MovieLinesError::Display(detail)
            | MovieLinesError::TaskJoin(detail)
            | MovieLinesError::FfmpegError(detail)
                if detail.trim().is_empty() =>
            {
                FALLBACK_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Shown when a failure carries no message of its own.
pub const FALLBACK_MESSAGE: &str = "Something went wrong";

