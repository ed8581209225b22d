//! Access to the still images written by the decode engine.
//!
//! The engine writes one image per sampled second, named after its 1-based
//! sequence index (`1.bmp`, `2.bmp`, ...). A [`FrameStore`] lists whatever
//! is currently there in sequence order, hands out the raw bytes, and deletes
//! frames once they have been reduced so memory and disk use stay bounded.
//!
//! Ordering is by the numeric index, not the file name: `10.bmp` comes after
//! `9.bmp`.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::error::MovieLinesError;

/// File extension of the frames produced by the decode engine.
pub const FRAME_EXTENSION: &str = "bmp";

/// Identifier of one decoded frame: its file name plus the parsed index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u64,
    name: String,
}

impl FrameId {
    /// Identifier for the frame with sequence number `index`.
    pub fn from_index(index: u64) -> Self {
        Self {
            index,
            name: format!("{index}.{FRAME_EXTENSION}"),
        }
    }

    /// Parse a file name such as `"12.bmp"`.
    ///
    /// Returns `None` for anything that is not `<digits>.bmp`, including the
    /// engine's in-progress `*.bmp.part` files.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(FRAME_EXTENSION)?.strip_suffix('.')?;
        if stem.is_empty() || !stem.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let index = stem.parse().ok()?;
        Some(Self {
            index,
            name: name.to_string(),
        })
    }

    /// Sequence number; the first sample of a video is 1.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// File name in the store, e.g. `12.bmp`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Ord for FrameId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for FrameId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for FrameId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.name)
    }
}

/// Frames currently available from the decode engine.
///
/// Implementations are synchronous and local; any failure is reported as
/// [`MovieLinesError::StoreIo`] and is not retried.
pub trait FrameStore: Send + Sync {
    /// Frames currently available, ascending by sequence index.
    fn list_frames(&self) -> Result<Vec<FrameId>, MovieLinesError>;

    /// Raw encoded bytes of one frame.
    fn read_frame(&self, frame: &FrameId) -> Result<Vec<u8>, MovieLinesError>;

    /// Remove a frame. Deleting a frame that is already gone is not an error.
    fn delete_frame(&self, frame: &FrameId) -> Result<(), MovieLinesError>;
}

/// A [`FrameStore`] over a flat filesystem directory.
#[derive(Debug, Clone)]
pub struct DirectoryFrameStore {
    directory: PathBuf,
}

impl DirectoryFrameStore {
    /// Store over `directory`, which need not exist yet.
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// The directory frames are listed from.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl FrameStore for DirectoryFrameStore {
    fn list_frames(&self) -> Result<Vec<FrameId>, MovieLinesError> {
        let directory_name = self.directory.display().to_string();
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            // The engine has not created its output directory yet.
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(MovieLinesError::store_io(directory_name, error)),
        };

        let mut frames = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| MovieLinesError::store_io(&directory_name, error))?;
            if !entry.file_type().is_ok_and(|file_type| file_type.is_file()) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(frame) = FrameId::parse(&name) {
                frames.push(frame);
            }
        }

        frames.sort();
        Ok(frames)
    }

    fn read_frame(&self, frame: &FrameId) -> Result<Vec<u8>, MovieLinesError> {
        fs::read(self.directory.join(frame.name()))
            .map_err(|error| MovieLinesError::store_io(frame.name(), error))
    }

    fn delete_frame(&self, frame: &FrameId) -> Result<(), MovieLinesError> {
        match fs::remove_file(self.directory.join(frame.name())) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(MovieLinesError::store_io(frame.name(), error)),
        }
    }
}

/// An in-memory [`FrameStore`], for embedding the pipeline behind a
/// custom decoder.
#[derive(Debug, Default)]
pub struct MemoryFrameStore {
    frames: Mutex<BTreeMap<FrameId, Vec<u8>>>,
}

impl MemoryFrameStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a frame available, replacing any frame with the same name.
    pub fn insert(&self, frame: FrameId, bytes: Vec<u8>) {
        self.lock().insert(frame, bytes);
    }

    /// Number of frames held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no frames.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<FrameId, Vec<u8>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameStore for MemoryFrameStore {
    fn list_frames(&self) -> Result<Vec<FrameId>, MovieLinesError> {
        Ok(self.lock().keys().cloned().collect())
    }

    fn read_frame(&self, frame: &FrameId) -> Result<Vec<u8>, MovieLinesError> {
        self.lock().get(frame).cloned().ok_or_else(|| {
            MovieLinesError::store_io(
                frame.name(),
                std::io::Error::new(ErrorKind::NotFound, "frame not in store"),
            )
        })
    }

    fn delete_frame(&self, frame: &FrameId) -> Result<(), MovieLinesError> {
        self.lock().remove(frame);
        Ok(())
    }
}
