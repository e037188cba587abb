use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::artifact::{load_artifact, source_for};
use super::model::{ModelHandle, ModelInfo, SequentialModel};
use super::tensor::MemoryInfo;
use crate::config::ModelConfig;
use crate::error::PredictError;
use crate::predictor::PredictionWindow;

/// Something that can produce a ready-to-run model handle.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn load(&self) -> Result<Box<dyn ModelHandle>, PredictError>;

    fn describe_source(&self) -> String;
}

/// Loads TensorFlow.js layers models from a path or URL.
pub struct LayersBackend {
    location: String,
}

impl LayersBackend {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            location: config.source.clone(),
        }
    }
}

#[async_trait]
impl InferenceBackend for LayersBackend {
    async fn load(&self) -> Result<Box<dyn ModelHandle>, PredictError> {
        let source = source_for(&self.location)?;
        let artifact = load_artifact(source.as_ref()).await?;
        let model = SequentialModel::from_artifact(artifact)?;
        Ok(Box::new(model))
    }

    fn describe_source(&self) -> String {
        self.location.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ModelState {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub state: ModelState,
    pub source: String,
    pub model: Option<ModelInfo>,
    pub memory: Option<MemoryInfo>,
    pub loaded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub predictions_served: u64,
}

struct LoadedModel {
    handle: Box<dyn ModelHandle>,
    loaded_at: chrono::DateTime<chrono::Utc>,
}

/// Owns the model lifecycle: background load, readiness gating, serialized
/// predictions and hot reload.
pub struct PredictionEngine {
    backend: Arc<dyn InferenceBackend>,
    load_timeout: Duration,
    model: ArcSwapOption<LoadedModel>,
    state: RwLock<ModelState>,
    predict_lock: Mutex<()>,
    predictions_served: std::sync::atomic::AtomicU64,
    status_tx: broadcast::Sender<ModelState>,
}

impl PredictionEngine {
    pub fn new(backend: Arc<dyn InferenceBackend>, load_timeout: Duration) -> Self {
        let (status_tx, _) = broadcast::channel(16);
        metrics::gauge!("stock_forecast_model_ready").set(0.0);

        Self {
            backend,
            load_timeout,
            model: ArcSwapOption::empty(),
            state: RwLock::new(ModelState::Loading),
            predict_lock: Mutex::new(()),
            predictions_served: std::sync::atomic::AtomicU64::new(0),
            status_tx,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            Arc::new(LayersBackend::new(config)),
            Duration::from_secs(config.load_timeout_seconds),
        )
    }

    /// Receives every state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<ModelState> {
        self.status_tx.subscribe()
    }

    /// Starts loading in a background task and returns immediately. A load
    /// that panics is recorded as a failed load.
    pub fn spawn_load(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<(), PredictError>> {
        let engine = self.clone();
        tokio::spawn(async move {
            let loader = engine.clone();
            match tokio::spawn(async move { loader.load().await }).await {
                Ok(result) => result,
                Err(join_error) => {
                    let e = PredictError::ModelLoad(format!("load task failed: {}", join_error));
                    engine
                        .record_load_failure(&engine.backend.describe_source(), &e)
                        .await;
                    Err(e)
                }
            }
        })
    }

    /// Loads the model and swaps it in. While a reload is in flight the
    /// previous model keeps serving.
    pub async fn load(&self) -> Result<(), PredictError> {
        let source = self.backend.describe_source();
        if self.model.load().is_none() {
            self.set_state(ModelState::Loading).await;
        }
        info!("Loading model from {}", source);

        let started = Instant::now();
        let result = match tokio::time::timeout(self.load_timeout, self.backend.load()).await {
            Ok(result) => result,
            Err(_) => Err(PredictError::ModelLoad(format!(
                "timed out after {:?}",
                self.load_timeout
            ))),
        };

        match result {
            Ok(handle) => {
                self.model.store(Some(Arc::new(LoadedModel {
                    handle,
                    loaded_at: chrono::Utc::now(),
                })));
                self.set_state(ModelState::Ready).await;
                metrics::counter!("stock_forecast_model_loads_total", "outcome" => "ok").increment(1);
                metrics::gauge!("stock_forecast_model_ready").set(1.0);
                info!("✅ Model loaded from {} in {:?}", source, started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.record_load_failure(&source, &e).await;
                Err(e)
            }
        }
    }

    async fn record_load_failure(&self, source: &str, e: &PredictError) {
        metrics::counter!("stock_forecast_model_loads_total", "outcome" => "error").increment(1);
        error!("Failed to load model from {}: {}", source, e);
        if self.model.load().is_some() {
            warn!("Keeping previously loaded model after failed reload");
        } else {
            self.set_state(ModelState::Failed(e.to_string())).await;
        }
    }

    pub async fn reload(&self) -> Result<(), PredictError> {
        info!("Reloading model");
        self.load().await
    }

    pub async fn state(&self) -> ModelState {
        self.state.read().await.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.model.load().is_some()
    }

    pub async fn status(&self) -> ModelStatus {
        let loaded = self.model.load_full();
        ModelStatus {
            state: self.state().await,
            source: self.backend.describe_source(),
            model: loaded.as_ref().map(|m| m.handle.describe()),
            memory: loaded.as_ref().map(|m| m.handle.memory()),
            loaded_at: loaded.as_ref().map(|m| m.loaded_at),
            predictions_served: self
                .predictions_served
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Runs one prediction. Rejects immediately when no model is loaded;
    /// concurrent callers queue behind the in-flight prediction.
    pub async fn predict(&self, window: PredictionWindow) -> Result<f64, PredictError> {
        let result = self.predict_inner(window).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("stock_forecast_predictions_total", "outcome" => outcome).increment(1);
        result
    }

    /// `ModelNotReady` while the first load is pending, `ModelLoad` once it
    /// has failed.
    pub async fn ensure_available(&self) -> Result<(), PredictError> {
        if self.is_ready() {
            return Ok(());
        }
        match self.state().await {
            ModelState::Failed(message) => Err(PredictError::ModelLoad(message)),
            _ => Err(PredictError::ModelNotReady),
        }
    }

    async fn predict_inner(&self, window: PredictionWindow) -> Result<f64, PredictError> {
        self.ensure_available().await?;
        let loaded = self.model.load_full().ok_or(PredictError::ModelNotReady)?;

        let _guard = self.predict_lock.lock().await;
        let started = Instant::now();

        let prediction = tokio::task::spawn_blocking(move || loaded.handle.predict(&window))
            .await
            .map_err(|e| PredictError::Inference(format!("prediction task failed: {}", e)))??;

        let elapsed = started.elapsed();
        metrics::histogram!("stock_forecast_prediction_seconds").record(elapsed.as_secs_f64());
        self.predictions_served
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!("Prediction {:.4} computed in {:?}", prediction, elapsed);

        Ok(prediction)
    }

    async fn set_state(&self, state: ModelState) {
        *self.state.write().await = state.clone();
        // No receivers is fine.
        let _ = self.status_tx.send(state);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the window mean and counts how often it ran.
    pub struct CountingModel {
        pub calls: Arc<AtomicUsize>,
    }

    impl ModelHandle for CountingModel {
        fn predict(&self, window: &PredictionWindow) -> Result<f64, PredictError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(window.values().iter().sum::<f64>() / window.values().len() as f64)
        }

        fn describe(&self) -> ModelInfo {
            ModelInfo {
                name: "counting".to_string(),
                source: "memory".to_string(),
                generated_by: None,
                layers: Vec::new(),
                parameters: 0,
                input_shape: vec![100, 1],
            }
        }

        fn memory(&self) -> MemoryInfo {
            MemoryInfo {
                num_tensors: 0,
                num_bytes: 0,
                total_allocated: 0,
            }
        }
    }

    /// Waits for `release` before handing out a `CountingModel`, or fails.
    pub struct GatedBackend {
        pub calls: Arc<AtomicUsize>,
        pub release: Arc<tokio::sync::Notify>,
        pub fail: bool,
    }

    impl GatedBackend {
        pub fn new(fail: bool) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                release: Arc::new(tokio::sync::Notify::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl InferenceBackend for GatedBackend {
        async fn load(&self) -> Result<Box<dyn ModelHandle>, PredictError> {
            self.release.notified().await;
            if self.fail {
                return Err(PredictError::ModelLoad("404 Not Found".to_string()));
            }
            Ok(Box::new(CountingModel {
                calls: self.calls.clone(),
            }))
        }

        fn describe_source(&self) -> String {
            "gated".to_string()
        }
    }

    /// Panics inside `load`.
    pub struct PanickingBackend;

    #[async_trait]
    impl InferenceBackend for PanickingBackend {
        async fn load(&self) -> Result<Box<dyn ModelHandle>, PredictError> {
            panic!("corrupt artifact");
        }

        fn describe_source(&self) -> String {
            "panicking".to_string()
        }
    }
}
