//! # Model Registry
//!
//! Process-wide holder of the one transcriber instance, initialized lazily on
//! the first transcription request. Loading large weight files at startup
//! would make process start slow and waste the work entirely if the service
//! never receives traffic, so the cost is deferred and the first request
//! pays it.
//!
//! ## First-load race policy:
//! Concurrent first requests are resolved by a write-lock guard: exactly one
//! caller performs the load while the others wait and then share the same
//! instance (block-and-share). A failed load leaves the slot unset so a later
//! request retries, which matters when the model directory is provisioned
//! after the server starts.
//!
//! ## Lifetime:
//! No eviction, no reload, no teardown. Once loaded, the instance lives and
//! is shared read-only until the process exits.

use crate::error::AppError;
use crate::transcription::{Transcriber, TranscriberLoader};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ModelRegistry {
    /// The singleton slot. None until the first successful load.
    model: RwLock<Option<Arc<dyn Transcriber>>>,

    /// Loader capability, injected so tests can substitute a fake.
    loader: Arc<dyn TranscriberLoader>,

    /// Directory the model is loaded from.
    model_dir: PathBuf,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn TranscriberLoader>, model_dir: PathBuf) -> Self {
        Self {
            model: RwLock::new(None),
            loader,
            model_dir,
        }
    }

    /// Get the transcriber, loading it on first use.
    ///
    /// Idempotent: subsequent calls return the cached instance without
    /// re-loading. The load itself runs on a blocking thread because it
    /// memory-maps and validates large weight files.
    pub async fn get(&self) -> Result<Arc<dyn Transcriber>, AppError> {
        // Fast path: already loaded, shared read access
        if let Some(model) = self.model.read().await.as_ref() {
            return Ok(Arc::clone(model));
        }

        // Slow path: take the write lock, re-check, then load. Racing
        // callers queue here and find the slot filled on wake-up.
        let mut slot = self.model.write().await;
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        tracing::info!("Loading transcription model from {}", self.model_dir.display());

        let loader = Arc::clone(&self.loader);
        let model_dir = self.model_dir.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&model_dir))
            .await
            .map_err(|e| AppError::Internal(format!("Model load task panicked: {}", e)))?
            .map_err(|e| {
                tracing::error!("Model load failed: {}", e);
                AppError::ModelLoad(e.to_string())
            })?;

        *slot = Some(Arc::clone(&loaded));
        tracing::info!("Transcription model loaded and cached");
        Ok(loaded)
    }

    /// Whether the singleton has been initialized, for the health endpoint.
    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    pub fn model_dir(&self) -> &std::path::Path {
        &self.model_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTranscriber;

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, _audio_path: &Path) -> anyhow::Result<String> {
            Ok("fake transcript".to_string())
        }
    }

    /// Counts loads; optionally fails the first N attempts.
    struct CountingLoader {
        loads: AtomicUsize,
        fail_first: usize,
    }

    impl CountingLoader {
        fn new(fail_first: usize) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    impl TranscriberLoader for CountingLoader {
        fn load(&self, _model_dir: &Path) -> anyhow::Result<Arc<dyn Transcriber>> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(anyhow!("weights not found"));
            }
            Ok(Arc::new(FakeTranscriber))
        }
    }

    #[tokio::test]
    async fn test_load_happens_exactly_once() {
        let loader = Arc::new(CountingLoader::new(0));
        let registry = ModelRegistry::new(loader.clone(), PathBuf::from("model"));

        assert!(!registry.is_loaded().await);

        let first = registry.get().await.unwrap();
        let second = registry.get().await.unwrap();
        let third = registry.get().await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded().await);

        // All callers observe the same instance
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_load() {
        let loader = Arc::new(CountingLoader::new(0));
        let registry = Arc::new(ModelRegistry::new(loader.clone(), PathBuf::from("model")));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.get().await }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_slot_unset_and_retries() {
        let loader = Arc::new(CountingLoader::new(1));
        let registry = ModelRegistry::new(loader.clone(), PathBuf::from("model"));

        let first = registry.get().await;
        assert!(matches!(first, Err(AppError::ModelLoad(_))));
        assert!(!registry.is_loaded().await);

        // The next call retries and succeeds
        assert!(registry.get().await.is_ok());
        assert!(registry.is_loaded().await);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }
}
