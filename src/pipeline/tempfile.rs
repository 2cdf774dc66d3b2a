//! Request-scoped temporary audio files.
//!
//! Every upload is persisted under a uniquely named path so concurrent
//! requests never collide, and every path is removed when the guard drops --
//! success, handled error or early return alike. Removal failures are logged
//! and swallowed: failing to delete a temp file must never replace the
//! outcome the request already computed.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Filename prefix for every temp file this service creates.
const TEMP_PREFIX: &str = "voice-note-";

/// RAII guard around one temporary audio file.
///
/// At most two of these exist per request: the persisted upload and, when
/// the converter runs, its WAV output.
#[derive(Debug)]
pub struct TempAudioFile {
    path: PathBuf,
}

impl TempAudioFile {
    /// Persist upload bytes to a fresh uniquely named file, keeping the
    /// original extension so the converter can sniff the container.
    pub async fn persist(dir: &Path, bytes: &[u8], extension: &str) -> Result<Self> {
        let file = Self::allocate(dir, extension);
        tokio::fs::write(&file.path, bytes)
            .await
            .map_err(|e| anyhow!("Failed to write upload to {}: {}", file.path.display(), e))?;
        Ok(file)
    }

    /// Allocate a unique path without creating the file, used for the
    /// converter output. The guard owns the path either way; dropping it
    /// removes the file if the converter got as far as creating it.
    pub fn allocate(dir: &Path, extension: &str) -> Self {
        let name = format!("{}{}.{}", TEMP_PREFIX, Uuid::new_v4(), extension);
        Self {
            path: dir.join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempAudioFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed temp file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Failed to remove temp file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Extension for the persisted upload, taken from the declared filename.
/// Browser captures often arrive without one; WebM is what MediaRecorder
/// produces, so that is the default.
pub fn extension_for(filename: &str) -> String {
    let ext: String = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("webm")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_lowercase();

    if ext.is_empty() {
        "webm".to_string()
    } else {
        ext
    }
}
