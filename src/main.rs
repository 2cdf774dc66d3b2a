//! # Voice Notes Backend - Main Application Entry Point
//!
//! HTTP server that turns browser-recorded audio into text: uploads arrive as
//! multipart form data, get normalized through ffmpeg when available, and run
//! through a locally-stored Whisper model that loads lazily on first use.
//!
//! ## Application Architecture:
//! - **config**: Configuration (defaults + config.toml + environment variables)
//! - **state**: Shared application state and request metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request observation (logging + metrics)
//! - **handlers**: HTTP request handlers for the transcription API
//! - **pipeline**: Upload validation, temp files, conversion, orchestration
//! - **transcription**: The speech model, its lazy registry, WAV decoding
//! - **error**: Error types and their HTTP responses

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use pipeline::convert::AudioConverter;
use pipeline::TranscriptionPipeline;
use state::AppState;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{ModelRegistry, WhisperLoader};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-notes-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let model_dir = PathBuf::from(&config.model.dir);
    if !model_dir.is_dir() {
        // Not fatal: the model loads lazily, so the directory may appear
        // before the first transcription request
        warn!(
            "Model directory {} does not exist yet; transcription will fail until it does",
            model_dir.display()
        );
    }

    let converter = Arc::new(
        AudioConverter::detect(Duration::from_secs(config.conversion.timeout_secs)).await,
    );
    let registry = Arc::new(ModelRegistry::new(Arc::new(WhisperLoader), model_dir));
    let pipeline = Arc::new(TranscriptionPipeline::new(
        registry,
        converter,
        config.max_upload_bytes(),
        std::env::temp_dir(),
    ));

    let app_state = AppState::new(config.clone(), pipeline);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestObserver)
            .route("/", web::get().to(handlers::index))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .service(
                web::scope("/api")
                    .route("/transcribe", web::post().to(handlers::transcribe_audio))
                    .route(
                        "/transcribe-stream",
                        web::post().to(handlers::transcribe_stream),
                    ),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging via tracing; `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_notes_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
