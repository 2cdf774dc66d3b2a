//! # Transcription Module
//!
//! Speech-to-text via a Whisper-architecture model running on Candle-rs,
//! consumed through the opaque [`Transcriber`] capability: load from a local
//! directory once, transcribe audio files many times.
//!
//! ## Key Components:
//! - **model**: Candle-based model loading and inference
//! - **registry**: Lazy, process-wide singleton holding the loaded model
//! - **wav**: WAV container decoding for the inference input path

pub mod model;
pub mod registry;
pub mod wav;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub use model::WhisperLoader;
pub use registry::ModelRegistry;

/// Opaque speech-to-text capability.
///
/// `transcribe` is synchronous and potentially slow (model inference);
/// callers run it on a blocking thread.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// Creates a [`Transcriber`] from a model directory.
///
/// Separated from the registry so tests can inject a fake without touching
/// real weight files.
pub trait TranscriberLoader: Send + Sync {
    fn load(&self, model_dir: &Path) -> Result<Arc<dyn Transcriber>>;
}
