//! # Upload Validation
//!
//! Checks an incoming upload before anything touches the disk: a rejected
//! request must leave zero temporary files behind.
//!
//! ## Validation order:
//! 1. Declared filename is non-empty
//! 2. Byte length is non-zero and within the configured limit
//! 3. Declared content type is on the audio allow-list -- a mismatch is only
//!    a warning, because browsers report MIME types for recorded audio
//!    inconsistently and the converter sniffs the real container anyway
//!
//! The "audio field is present at all" check happens during multipart
//! extraction in the handler, before this module runs.

use crate::error::AppError;

/// MIME types browsers commonly declare for recorded or picked audio.
/// `video/webm` is included because MediaRecorder labels audio-only WebM
/// captures that way on some platforms.
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "audio/webm",
    "audio/ogg",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/m4a",
    "audio/x-m4a",
    "audio/flac",
    "audio/aac",
    "video/webm",
];

/// Rejection for an upload over the size limit, stating both the computed
/// size and the limit. Also used by the multipart reader, which rejects
/// while streaming so an oversize body is never fully buffered.
pub fn oversize_error(size: u64, max_bytes: u64) -> AppError {
    AppError::Validation(format!(
        "File too large: {:.1} MiB exceeds the {} MiB limit",
        size as f64 / (1024.0 * 1024.0),
        max_bytes / (1024 * 1024),
    ))
}

/// An upload as received from the multipart form, request-scoped.
#[derive(Debug, Clone)]
pub struct UploadedAudio {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: Option<String>,
}

/// Validate an upload against size and type policy.
///
/// Returns the rejection reason as a `Validation` error; no side effects
/// beyond a possible content-type warning in the log.
pub fn validate(upload: &UploadedAudio, max_bytes: u64) -> Result<(), AppError> {
    if upload.filename.is_empty() {
        return Err(AppError::Validation("Empty file".to_string()));
    }

    if upload.bytes.is_empty() {
        return Err(AppError::Validation("Empty file".to_string()));
    }

    let size = upload.bytes.len() as u64;
    if size > max_bytes {
        return Err(oversize_error(size, max_bytes));
    }

    match upload.content_type.as_deref() {
        Some(declared) if !ALLOWED_CONTENT_TYPES.contains(&declared) => {
            tracing::warn!(
                filename = %upload.filename,
                content_type = %declared,
                "Unexpected content type on audio upload, proceeding anyway"
            );
        }
        None => {
            tracing::warn!(
                filename = %upload.filename,
                "Audio upload declared no content type, proceeding anyway"
            );
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 50 * 1024 * 1024;

    fn upload(bytes: Vec<u8>, filename: &str, content_type: Option<&str>) -> UploadedAudio {
        UploadedAudio {
            bytes,
            filename: filename.to_string(),
            content_type: content_type.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_accepts_typical_browser_capture() {
        let up = upload(vec![1; 2 * 1024 * 1024], "clip.webm", Some("audio/webm"));
        assert!(validate(&up, MAX).is_ok());
    }

    #[test]
    fn test_rejects_empty_filename() {
        let up = upload(vec![1, 2, 3], "", Some("audio/wav"));
        let err = validate(&up, MAX).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref msg) if msg == "Empty file"));
    }

    #[test]
    fn test_rejects_zero_length_upload() {
        let up = upload(vec![], "a.wav", Some("audio/wav"));
        let err = validate(&up, MAX).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref msg) if msg == "Empty file"));
    }

    #[test]
    fn test_rejects_oversize_with_sizes_in_message() {
        let up = upload(vec![0; 60 * 1024 * 1024], "big.wav", Some("audio/wav"));
        let err = validate(&up, MAX).unwrap_err();
        match err {
            AppError::Validation(msg) => {
                assert!(msg.contains("60.0 MiB"), "message was: {}", msg);
                assert!(msg.contains("50 MiB"), "message was: {}", msg);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_unlisted_content_type_is_not_rejected() {
        let up = upload(vec![1; 128], "clip.weird", Some("application/octet-stream"));
        assert!(validate(&up, MAX).is_ok());

        let up = upload(vec![1; 128], "clip.webm", None);
        assert!(validate(&up, MAX).is_ok());
    }

    #[test]
    fn test_exact_limit_is_accepted() {
        let up = upload(vec![0; MAX as usize], "edge.wav", Some("audio/wav"));
        assert!(validate(&up, MAX).is_ok());
    }
}
