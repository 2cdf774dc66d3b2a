//! # Transcription REST API Handlers
//!
//! The HTTP boundary of the pipeline: multipart extraction, outcome-to-JSON
//! mapping, and the reserved streaming endpoint.
//!
//! ## Available Endpoints:
//! - `GET /` - embedded single-page recorder client
//! - `POST /api/transcribe` - transcribe an uploaded audio file
//! - `POST /api/transcribe-stream` - reserved for real-time support (501)

use crate::error::{AppError, AppResult};
use crate::pipeline::validate::{self, UploadedAudio};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;

/// Serve the embedded recorder client.
pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(include_str!("../../static/index.html"))
}

/// Transcribe an uploaded audio file.
///
/// ## Endpoint: `POST /api/transcribe`
///
/// ## Request:
/// Multipart form data with the audio file in a field named `audio`.
///
/// ## Responses:
/// - 200 `{"success": true, "text": "...", "length": 42, "filename": "clip.webm"}`
/// - 400 `{"error": "..."}` for validation rejections
/// - 500 `{"error": "...", "details": "..."}` for model or inference failures
pub async fn transcribe_audio(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let max_bytes = state.get_config().max_upload_bytes();
    let upload = extract_audio_field(payload, max_bytes)
        .await?
        .ok_or_else(|| AppError::Validation("No audio file provided".to_string()))?;

    let outcome = state.pipeline.handle(upload).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "text": outcome.text,
        "length": outcome.length,
        "filename": outcome.filename,
    })))
}

/// Reserved endpoint for future real-time transcription.
///
/// ## Endpoint: `POST /api/transcribe-stream`
pub async fn transcribe_stream() -> AppResult<HttpResponse> {
    Err(AppError::NotImplemented(
        "Streaming transcription is not implemented yet".to_string(),
    ))
}

/// Pull the `audio` field out of the multipart form.
///
/// Returns `None` when no such field exists; malformed multipart framing is
/// a validation error. Other fields are drained and ignored.
///
/// Buffering is bounded by `max_bytes`: once the field exceeds the limit the
/// collected bytes are dropped and only a running count continues, so an
/// arbitrarily large body cannot hold its full size in memory while the
/// rejection still states the actual upload size.
async fn extract_audio_field(
    mut payload: Multipart,
    max_bytes: u64,
) -> AppResult<Option<UploadedAudio>> {
    let mut upload: Option<UploadedAudio> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?;

        let Some(content_disposition) = field.content_disposition() else {
            continue;
        };
        if content_disposition.get_name() != Some("audio") {
            continue;
        }

        let filename = content_disposition
            .get_filename()
            .unwrap_or_default()
            .to_string();
        let content_type = field.content_type().map(|mime| mime.to_string());

        let mut bytes = Vec::new();
        let mut total_size: u64 = 0;
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Validation(format!("Upload read error: {}", e)))?;
            total_size += chunk.len() as u64;
            if total_size > max_bytes {
                bytes = Vec::new();
            } else {
                bytes.extend_from_slice(&chunk);
            }
        }

        if total_size > max_bytes {
            return Err(validate::oversize_error(total_size, max_bytes));
        }

        upload = Some(UploadedAudio {
            bytes,
            filename,
            content_type,
        });
    }

    Ok(upload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::health;
    use crate::pipeline::convert::AudioConverter;
    use crate::pipeline::TranscriptionPipeline;
    use crate::transcription::{ModelRegistry, Transcriber, TranscriberLoader};
    use actix_web::{http::StatusCode, test, App};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    struct FakeTranscriber;

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, _audio_path: &Path) -> anyhow::Result<String> {
            Ok("the quick brown fox".to_string())
        }
    }

    struct FakeLoader {
        fail: bool,
    }

    impl TranscriberLoader for FakeLoader {
        fn load(&self, _model_dir: &Path) -> anyhow::Result<Arc<dyn Transcriber>> {
            if self.fail {
                return Err(anyhow::anyhow!("model directory is empty"));
            }
            Ok(Arc::new(FakeTranscriber))
        }
    }

    fn test_state(loader_fails: bool, temp_dir: &Path) -> AppState {
        let config = AppConfig::default();
        let registry = Arc::new(ModelRegistry::new(
            Arc::new(FakeLoader { fail: loader_fails }),
            PathBuf::from(&config.model.dir),
        ));
        let pipeline = Arc::new(TranscriptionPipeline::new(
            registry,
            Arc::new(AudioConverter::Passthrough),
            config.max_upload_bytes(),
            temp_dir.to_path_buf(),
        ));
        AppState::new(config, pipeline)
    }

    /// Build a multipart body with a single file field.
    fn multipart_body(
        field_name: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> (String, Vec<u8>) {
        let boundary = "----test-boundary-7MA4YWxkTrZu0gW";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field_name, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", boundary),
            body,
        )
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/", web::get().to(index))
                    .route("/health", web::get().to(health::health_check))
                    .route("/api/transcribe", web::post().to(transcribe_audio))
                    .route("/api/transcribe-stream", web::post().to(transcribe_stream)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_transcribe_happy_path() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        let (content_type, body) =
            multipart_body("audio", "clip.webm", "audio/webm", &vec![1u8; 2 * 1024 * 1024]);
        let req = test::TestRequest::post()
            .uri("/api/transcribe")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["text"], "the quick brown fox");
        assert_eq!(json["length"], "the quick brown fox".len());
        assert_eq!(json["filename"], "clip.webm");

        // The request-scoped temp files are gone
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_missing_audio_field_is_400() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        let (content_type, body) = multipart_body("video", "clip.webm", "video/webm", &[1, 2, 3]);
        let req = test::TestRequest::post()
            .uri("/api/transcribe")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["error"], "No audio file provided");
    }

    #[actix_web::test]
    async fn test_empty_file_is_400() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        let (content_type, body) = multipart_body("audio", "a.wav", "audio/wav", &[]);
        let req = test::TestRequest::post()
            .uri("/api/transcribe")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["error"], "Empty file");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_oversize_upload_is_400_with_limit_in_message() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        let (content_type, body) =
            multipart_body("audio", "big.wav", "audio/wav", &vec![0u8; 60 * 1024 * 1024]);
        let req = test::TestRequest::post()
            .uri("/api/transcribe")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = test::read_body_json(resp).await;
        let message = json["error"].as_str().unwrap();
        assert!(message.contains("60.0 MiB"), "message was: {}", message);
        assert!(message.contains("50 MiB"), "message was: {}", message);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_upload_one_byte_over_the_limit_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        // The reader stops buffering the moment the limit is crossed, so the
        // rejection must still fire for the smallest possible excess
        let (content_type, body) = multipart_body(
            "audio",
            "edge.wav",
            "audio/wav",
            &vec![0u8; 50 * 1024 * 1024 + 1],
        );
        let req = test::TestRequest::post()
            .uri("/api/transcribe")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = test::read_body_json(resp).await;
        let message = json["error"].as_str().unwrap();
        assert!(
            message.contains("exceeds the 50 MiB limit"),
            "message was: {}",
            message
        );
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_model_load_failure_is_500_with_details() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(true, temp.path()));

        let (content_type, body) =
            multipart_body("audio", "clip.webm", "audio/webm", &[1u8; 64]);
        let req = test::TestRequest::post()
            .uri("/api/transcribe")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["error"], "Failed to load transcription model");
        assert!(json["details"].as_str().unwrap().contains("empty"));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_transcribe_stream_is_501() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        let req = test::TestRequest::post()
            .uri("/api/transcribe-stream")
            .set_payload("anything")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("not implemented"));
    }

    #[actix_web::test]
    async fn test_health_reports_model_state() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model_loaded"], false);
        assert_eq!(json["model_dir"], "model");

        // A transcription loads the model lazily; health reflects it after
        let (content_type, body) =
            multipart_body("audio", "clip.webm", "audio/webm", &[1u8; 64]);
        let req = test::TestRequest::post()
            .uri("/api/transcribe")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["model_loaded"], true);
    }

    #[actix_web::test]
    async fn test_index_serves_html() {
        let temp = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(false, temp.path()));

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("<html"));
    }
}
