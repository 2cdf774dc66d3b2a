//! # Transcription Pipeline
//!
//! Request-scoped orchestration of the whole transcription flow:
//! validation → temp-file persist → format normalization (with fallback) →
//! lazy model acquisition → inference → guaranteed cleanup.
//!
//! ## Control flow:
//! Validation rejects before any disk I/O. Both temporary files live behind
//! RAII guards owned by `handle`, so they are removed on every exit path --
//! success, classified error, or early `?` return. Conversion failure is the
//! one recoverable error: it downgrades to a warning and the original upload
//! goes to the model instead.

pub mod convert;
pub mod tempfile;
pub mod validate;

use crate::error::AppError;
use crate::transcription::ModelRegistry;
use convert::{AudioConverter, NormalizeOutcome};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempAudioFile;
use validate::UploadedAudio;

/// Extension the converter output carries; inputs already tagged with it
/// skip conversion entirely.
const CANONICAL_EXTENSION: &str = "wav";

/// Successful pipeline outcome, serialized straight into the 200 response.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionOutcome {
    pub text: String,
    /// Character count of `text`
    pub length: usize,
    /// The upload's declared filename, echoed back
    pub filename: String,
}

pub struct TranscriptionPipeline {
    registry: Arc<ModelRegistry>,
    converter: Arc<AudioConverter>,
    max_upload_bytes: u64,
    temp_dir: PathBuf,
}

impl TranscriptionPipeline {
    pub fn new(
        registry: Arc<ModelRegistry>,
        converter: Arc<AudioConverter>,
        max_upload_bytes: u64,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            converter,
            max_upload_bytes,
            temp_dir,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn converter(&self) -> &AudioConverter {
        &self.converter
    }

    /// Run one upload through the pipeline.
    ///
    /// ## Sequence:
    /// 1. Validate (rejects create zero temp files)
    /// 2. Persist the bytes under a unique name, original extension kept
    /// 3. Normalize to canonical WAV unless the upload already is one;
    ///    conversion failure falls back to the original file
    /// 4. Acquire the transcriber (lazy first load)
    /// 5. Transcribe on a blocking thread
    /// 6. Temp files are removed by their guards on every path out
    pub async fn handle(&self, upload: UploadedAudio) -> Result<TranscriptionOutcome, AppError> {
        validate::validate(&upload, self.max_upload_bytes)?;

        let extension = tempfile::extension_for(&upload.filename);
        let input = TempAudioFile::persist(&self.temp_dir, &upload.bytes, &extension)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        // Holds the converter output alive (and cleaned up) when conversion
        // succeeds; stays None on fallback
        let mut converted: Option<TempAudioFile> = None;

        if extension != CANONICAL_EXTENSION {
            let output = TempAudioFile::allocate(&self.temp_dir, CANONICAL_EXTENSION);
            match self.converter.normalize(input.path(), output.path()).await {
                Ok(NormalizeOutcome::Converted) => {
                    tracing::debug!(
                        filename = %upload.filename,
                        "Upload normalized to canonical WAV"
                    );
                    converted = Some(output);
                }
                Ok(NormalizeOutcome::Skipped) => {
                    tracing::debug!(
                        filename = %upload.filename,
                        "No converter available, transcribing the original upload"
                    );
                }
                Err(e) => {
                    // Recoverable: the model gets the original file instead
                    tracing::warn!(
                        filename = %upload.filename,
                        error = %e,
                        "Conversion failed, falling back to the original upload"
                    );
                }
            }
        }

        let selected = converted
            .as_ref()
            .map(|f| f.path())
            .unwrap_or_else(|| input.path())
            .to_path_buf();

        let transcriber = self.registry.get().await?;

        tracing::info!(filename = %upload.filename, "Transcribing {}", selected.display());
        let text = tokio::task::spawn_blocking(move || transcriber.transcribe(&selected))
            .await
            .map_err(|e| AppError::Internal(format!("Transcription task panicked: {}", e)))?
            .map_err(|e| AppError::Transcription(e.to_string()))?;

        let length = text.chars().count();
        tracing::info!(
            filename = %upload.filename,
            chars = length,
            "Transcription completed"
        );

        Ok(TranscriptionOutcome {
            text,
            length,
            filename: upload.filename,
        })
    }
}
