//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment-platform environment variables (HOST, PORT, MODEL_DIR)
//! 2. Prefixed environment variables (APP_SERVER__HOST, APP_UPLOAD__MAX_FILE_SIZE_MB, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub upload: UploadConfig,
    pub conversion: ConversionConfig,
}

/// Server bind settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: Accept connections from any IP address (default, the
///   recorder client usually runs on another device)
/// - `host = "127.0.0.1"`: Localhost only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech model settings.
///
/// ## Fields:
/// - `dir`: Local directory containing the model files (config.json,
///   tokenizer.json, model.safetensors). The weights are shipped with the
///   deployment; nothing is downloaded at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub dir: String,
}

/// Upload validation settings.
///
/// ## Fields:
/// - `max_file_size_mb`: Uploads larger than this are rejected with 400
///   before anything touches the disk. 50 MiB comfortably fits several
///   minutes of browser-captured audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_file_size_mb: u64,
}

/// External converter settings.
///
/// ## Fields:
/// - `timeout_secs`: Upper bound for one ffmpeg invocation. Expiry is treated
///   as a recoverable conversion failure, not a request failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
            },
            model: ModelConfig {
                dir: "model".to_string(),
            },
            upload: UploadConfig {
                max_file_size_mb: 50,
            },
            conversion: ConversionConfig { timeout_secs: 60 },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8080`: Override server port
    /// - `APP_UPLOAD__MAX_FILE_SIZE_MB=100`: Raise the upload limit
    /// - `APP_CONVERSION__TIMEOUT_SECS=120`: Allow slower conversions
    /// - `HOST=127.0.0.1` / `PORT=3000` / `MODEL_DIR=/srv/model`: Special
    ///   cases for deployment platforms that don't follow the APP_ prefix
    ///
    /// The section/key separator is a double underscore: field names like
    /// `max_file_size_mb` contain single underscores, so splitting on those
    /// would make such keys unreachable.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(dir) = env::var("MODEL_DIR") {
            settings = settings.set_override("model.dir", dir)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup beats failing on the first
    /// request with a confusing message.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.model.dir.is_empty() {
            return Err(anyhow::anyhow!("Model directory cannot be empty"));
        }

        if self.upload.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.conversion.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Conversion timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Upload limit in bytes, derived from the MiB setting.
    pub fn max_upload_bytes(&self) -> u64 {
        self.upload.max_file_size_mb * 1024 * 1024
    }
}
