//! # External Audio Conversion
//!
//! Best-effort normalization of arbitrary uploads into the canonical format
//! the model consumes: mono, 16 kHz, 16-bit PCM WAV. Browser captures
//! usually arrive as WebM/Opus, which the model cannot read directly.
//!
//! Conversion is a convenience, not a hard dependency. The ffmpeg binary is
//! probed exactly once at startup; when it is missing the converter degrades
//! to a passthrough and the pipeline transcribes the original file directly.
//! When ffmpeg is present but an invocation fails (bad input, non-zero exit,
//! timeout), the error is recoverable: the caller logs it and falls back to
//! the un-converted file instead of aborting the request.

use crate::error::AppError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// What the converter did with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// The output path now holds canonical WAV
    Converted,
    /// No converter on this host; keep using the input path
    Skipped,
}

/// Normalizer capability with two implementations, selected once at startup.
pub enum AudioConverter {
    /// Shells out to ffmpeg, bounded by a timeout per invocation
    Ffmpeg { timeout: Duration },
    /// No-op for hosts without ffmpeg installed
    Passthrough,
}

impl AudioConverter {
    /// Probe for ffmpeg and pick the implementation.
    ///
    /// The probe runs `ffmpeg -version` once; repeating it per request would
    /// only add latency for an answer that cannot change while the process
    /// lives.
    pub async fn detect(timeout: Duration) -> Self {
        let probe = Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match probe {
            Ok(status) if status.success() => {
                tracing::info!("ffmpeg detected, audio conversion enabled");
                AudioConverter::Ffmpeg { timeout }
            }
            Ok(status) => {
                tracing::warn!(
                    "ffmpeg probe exited with {}, transcribing uploads as-is",
                    status
                );
                AudioConverter::Passthrough
            }
            Err(e) => {
                tracing::warn!(
                    "ffmpeg not available ({}), transcribing uploads as-is",
                    e
                );
                AudioConverter::Passthrough
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, AudioConverter::Ffmpeg { .. })
    }

    /// Normalize `input` into canonical WAV at `output`.
    ///
    /// ## Returns:
    /// - `Ok(Converted)`: output holds mono 16 kHz 16-bit PCM WAV
    /// - `Ok(Skipped)`: no converter on this host, caller keeps the input
    /// - `Err(Conversion)`: ffmpeg failed or timed out; the caller treats
    ///   this as recoverable and falls back to the input file
    pub async fn normalize(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<NormalizeOutcome, AppError> {
        let timeout = match self {
            AudioConverter::Passthrough => return Ok(NormalizeOutcome::Skipped),
            AudioConverter::Ffmpeg { timeout } => *timeout,
        };

        let invocation = Command::new("ffmpeg")
            .arg("-i")
            .arg(input)
            .args(["-ar", "16000"]) // 16 kHz sample rate
            .args(["-ac", "1"]) // mono
            .args(["-c:a", "pcm_s16le"]) // 16-bit PCM
            .arg("-y") // overwrite output
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(timeout, invocation).await;

        let command_output = match result {
            Err(_) => {
                return Err(AppError::Conversion(format!(
                    "ffmpeg timed out after {}s",
                    timeout.as_secs()
                )));
            }
            Ok(Err(e)) => {
                // The binary vanished between probe and invocation
                return Err(AppError::Conversion(format!(
                    "Failed to run ffmpeg: {}",
                    e
                )));
            }
            Ok(Ok(out)) => out,
        };

        if !command_output.status.success() {
            let stderr = String::from_utf8_lossy(&command_output.stderr);
            return Err(AppError::Conversion(format!(
                "ffmpeg exited with {}: {}",
                command_output.status,
                stderr_tail(&stderr),
            )));
        }

        Ok(NormalizeOutcome::Converted)
    }
}

/// ffmpeg prints its whole configuration banner to stderr; only the last
/// lines carry the actual failure.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail_start = lines.len().saturating_sub(3);
    lines[tail_start..].join(" | ")
}
