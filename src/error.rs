//! # Error Handling
//!
//! Defines the application error type and how each variant is converted to an
//! HTTP response. The variants mirror the failure points of the transcription
//! pipeline so the fallback policy is visible at the call site instead of
//! hidden in catch-all handling.
//!
//! ## Error Categories:
//! - **Validation**: The upload was rejected before any disk I/O (400)
//! - **ModelLoad**: The speech model could not be initialized (500, likely
//!   persistent until the deployment is fixed)
//! - **Conversion**: ffmpeg normalization failed. The pipeline treats this as
//!   recoverable and falls back to the original file, so this variant is
//!   never the final outcome of a request; the 500 mapping only exists as a
//!   safety net
//! - **Transcription**: Inference failed for this specific request (500)
//! - **NotImplemented**: Reserved endpoint (501)
//! - **Internal**: Anything unclassified (500)
//!
//! ## JSON envelope:
//! Every error response uses one consistent shape:
//! `{"error": "...", "details": "..."}` with `details` omitted for client
//! errors where the message says it all.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Classified pipeline outcome carried up to the HTTP boundary.
///
/// Each variant holds a short, human-readable detail string. Detail strings
/// are kept safe for clients: no stack traces, no absolute paths.
#[derive(Debug)]
pub enum AppError {
    /// The upload failed validation (missing field, empty file, oversize)
    Validation(String),

    /// The transcriber singleton could not be loaded from the model directory
    ModelLoad(String),

    /// External audio conversion failed; recoverable inside the pipeline
    Conversion(String),

    /// Model inference failed on this request's audio
    Transcription(String),

    /// Reserved operation that is not supported yet
    NotImplemented(String),

    /// Catch-all for unexpected failures
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation failed: {}", msg),
            AppError::ModelLoad(msg) => write!(f, "Model load failed: {}", msg),
            AppError::Conversion(msg) => write!(f, "Audio conversion failed: {}", msg),
            AppError::Transcription(msg) => write!(f, "Transcription failed: {}", msg),
            AppError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Validation(msg) => {
                HttpResponse::BadRequest().json(json!({ "error": msg }))
            }
            AppError::NotImplemented(msg) => {
                HttpResponse::NotImplemented().json(json!({ "error": msg }))
            }
            AppError::ModelLoad(msg) => HttpResponse::InternalServerError().json(json!({
                "error": "Failed to load transcription model",
                "details": msg,
            })),
            AppError::Conversion(msg) => HttpResponse::InternalServerError().json(json!({
                "error": "Audio conversion failed",
                "details": msg,
            })),
            AppError::Transcription(msg) => HttpResponse::InternalServerError().json(json!({
                "error": "Transcription failed",
                "details": msg,
            })),
            AppError::Internal(msg) => HttpResponse::InternalServerError().json(json!({
                "error": "Internal server error",
                "details": msg,
            })),
        }
    }
}

/// anyhow errors from deep inside the pipeline default to Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Type alias for Results that use the application error type.
pub type AppResult<T> = Result<T, AppError>;
