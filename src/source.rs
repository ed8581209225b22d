//! The video a run is computed from.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::Path,
    sync::Arc,
};

use crate::error::MovieLinesError;

/// An immutable input video: a name plus its encoded bytes.
///
/// The decode engine consumes it once; nothing mutates it afterwards. Clones
/// share the same bytes.
#[derive(Clone)]
pub struct VideoSource {
    name: String,
    bytes: Arc<[u8]>,
}

impl Debug for VideoSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoSource")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl VideoSource {
    /// Wrap in-memory video bytes under `name`.
    ///
    /// Only the final path component of `name` is kept, so a source can
    /// never point the engine outside its working directory.
    ///
    /// # Errors
    ///
    /// Returns [`MovieLinesError::InvalidSource`] if `name` has no usable
    /// file name or `bytes` is empty.
    pub fn from_bytes(name: &str, bytes: impl Into<Arc<[u8]>>) -> Result<Self, MovieLinesError> {
        let bytes = bytes.into();
        let file_name = Path::new(name)
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .filter(|file_name| !file_name.is_empty())
            .ok_or_else(|| MovieLinesError::InvalidSource {
                path: name.into(),
                reason: "source has no file name".to_string(),
            })?;

        if bytes.is_empty() {
            return Err(MovieLinesError::InvalidSource {
                path: name.into(),
                reason: "source is empty".to_string(),
            });
        }

        Ok(Self {
            name: file_name.to_string(),
            bytes,
        })
    }

    /// Read a video file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, MovieLinesError> {
        let path = path.as_ref();
        log::debug!("Reading video source: {}", path.display());

        let bytes = std::fs::read(path).map_err(|error| MovieLinesError::InvalidSource {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("input");
        Self::from_bytes(name, bytes)
    }

    /// File name the video was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw video bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the video in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the video has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
