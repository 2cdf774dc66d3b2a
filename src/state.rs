//! # Application State Management
//!
//! Shared state handed to every HTTP request handler: the configuration, the
//! transcription pipeline (which owns the model registry and the converter),
//! and request metrics.
//!
//! ## Thread Safety Pattern:
//! Everything mutable sits behind `Arc<RwLock<T>>` -- many handlers can read
//! simultaneously, one can write at a time. The pipeline itself is immutable
//! after startup and only needs the `Arc`.

use crate::config::AppConfig;
use crate::pipeline::TranscriptionPipeline;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration, readable by any handler
    pub config: Arc<RwLock<AppConfig>>,

    /// The request-scoped transcription pipeline, shared by all requests
    pub pipeline: Arc<TranscriptionPipeline>,

    /// Request metrics, updated by the observer middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (immutable, Instant is Copy)
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of error responses since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Arc<TranscriptionPipeline>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            pipeline,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately so other handlers are never blocked on it.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Record one completed request for the metrics endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent snapshot for serialization, taken under the read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
