use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::artifact::ModelArtifact;
use super::layers::Layer;
use super::tensor::{element_count, MemoryInfo, Tensor, TensorTracker};
use crate::error::{ArtifactError, PredictError};
use crate::predictor::{PredictionWindow, WINDOW_LEN};

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub source: String,
    pub generated_by: Option<String>,
    pub layers: Vec<String>,
    pub parameters: usize,
    pub input_shape: Vec<usize>,
}

/// Handle to a loaded model. Implementations must release every
/// intermediate buffer before `predict` returns.
pub trait ModelHandle: Send + Sync {
    fn predict(&self, window: &PredictionWindow) -> Result<f64, PredictError>;

    fn describe(&self) -> ModelInfo;

    fn memory(&self) -> MemoryInfo;
}

/// Keras Sequential model evaluated layer by layer.
#[derive(Debug)]
pub struct SequentialModel {
    name: String,
    source: String,
    generated_by: Option<String>,
    layers: Vec<Layer>,
    input_shape: Vec<usize>,
    tracker: Arc<TensorTracker>,
}

impl SequentialModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ArtifactError> {
        let input_shape = declared_input_shape(&artifact)
            .unwrap_or_else(|| vec![WINDOW_LEN, 1]);
        if element_count(&input_shape) != Some(WINDOW_LEN) {
            return Err(ArtifactError::Format(format!(
                "model input shape {:?} does not hold a {}-value window",
                input_shape, WINDOW_LEN
            )));
        }

        let mut layers = Vec::new();
        for spec in &artifact.layers {
            if let Some(layer) = Layer::from_spec(spec, &artifact.weights)? {
                debug!("Built {} layer {}", layer.kind(), layer.name());
                layers.push(layer);
            }
        }
        if layers.is_empty() {
            return Err(ArtifactError::Format("model has no layers".to_string()));
        }

        info!(
            "Model {} ready with {} layers, input shape {:?}",
            artifact.model_name,
            layers.len(),
            input_shape
        );

        Ok(Self {
            name: artifact.model_name,
            source: artifact.location,
            generated_by: artifact.generated_by,
            layers,
            input_shape,
            tracker: TensorTracker::new(),
        })
    }

    /// Runs one forward pass. Each layer output is dropped as soon as the
    /// next layer has consumed it.
    pub fn forward(&self, input: Tensor) -> Result<Tensor, String> {
        let mut current = input;
        for layer in &self.layers {
            current = layer
                .forward(&self.tracker, &current)
                .map_err(|e| format!("layer {}: {}", layer.name(), e))?;
        }
        Ok(current)
    }

    pub fn tracker(&self) -> &Arc<TensorTracker> {
        &self.tracker
    }
}

impl ModelHandle for SequentialModel {
    fn predict(&self, window: &PredictionWindow) -> Result<f64, PredictError> {
        let values: Vec<f32> = window.values().iter().map(|v| *v as f32).collect();
        let mut shape = vec![1];
        shape.extend_from_slice(&self.input_shape);

        let input = Tensor::new(&self.tracker, shape, values).map_err(PredictError::Inference)?;
        let output = self.forward(input).map_err(PredictError::Inference)?;

        let scalar = output
            .data()
            .first()
            .copied()
            .ok_or_else(|| PredictError::Inference("model produced an empty output".to_string()))?;
        drop(output);

        if !scalar.is_finite() {
            return Err(PredictError::Inference(format!(
                "model produced a non-finite value ({})",
                scalar
            )));
        }
        Ok(scalar as f64)
    }

    fn describe(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            source: self.source.clone(),
            generated_by: self.generated_by.clone(),
            layers: self
                .layers
                .iter()
                .map(|l| format!("{} ({})", l.name(), l.kind()))
                .collect(),
            parameters: self.layers.iter().map(Layer::param_count).sum(),
            input_shape: self.input_shape.clone(),
        }
    }

    fn memory(&self) -> MemoryInfo {
        self.tracker.memory()
    }
}

/// Reads `[null, steps, features]` from the InputLayer or the first layer.
fn declared_input_shape(artifact: &ModelArtifact) -> Option<Vec<usize>> {
    artifact.layers.iter().find_map(|spec| {
        let shape = spec
            .config
            .get("batch_input_shape")
            .or_else(|| spec.config.get("batch_shape"))
            .and_then(Value::as_array)?;
        shape
            .iter()
            .skip(1)
            .map(|d| d.as_u64().map(|v| v as usize))
            .collect::<Option<Vec<_>>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::artifact::testing::*;
    use crate::ml::artifact::{load_artifact, FileSource};

    async fn load_model(units: usize, fill: f32, bias: f32) -> SequentialModel {
        let dir = ArtifactDir::new();
        let (model, shard) = lstm_dense_model(units, fill, bias);
        let manifest = dir.write(&model, &shard);
        let artifact = load_artifact(&FileSource::new(manifest)).await.unwrap();
        SequentialModel::from_artifact(artifact).unwrap()
    }

    fn window(value: f64) -> PredictionWindow {
        PredictionWindow::try_from(vec![value; WINDOW_LEN]).unwrap()
    }

    #[tokio::test]
    async fn test_zero_weights_return_dense_bias() {
        let model = load_model(8, 0.0, 42.5).await;
        let prediction = model.predict(&window(150.0)).unwrap();
        assert!((prediction - 42.5).abs() < 1e-6);

        let info = model.describe();
        assert_eq!(info.input_shape, vec![100, 1]);
        assert_eq!(info.layers.len(), 3);
        assert_eq!(info.parameters, 4 * 8 + 8 * 32 + 32 + 8 + 1);
    }

    #[tokio::test]
    async fn test_predict_is_deterministic_and_releases_tensors() {
        let model = load_model(4, 0.05, 1.0).await;
        let baseline = model.memory().num_tensors;

        let first = model.predict(&window(0.3)).unwrap();
        for _ in 0..50 {
            let again = model.predict(&window(0.3)).unwrap();
            assert_eq!(first, again);
        }

        let mem = model.memory();
        assert_eq!(mem.num_tensors, baseline);
        assert_eq!(mem.num_bytes, 0);
        assert!(mem.total_allocated >= 51);
    }

    #[tokio::test]
    async fn test_overflow_is_inference_error() {
        let model = load_model(2, 0.0, f32::INFINITY).await;
        let err = model.predict(&window(1.0)).unwrap_err();
        assert!(matches!(err, PredictError::Inference(_)));
        assert_eq!(model.memory().num_tensors, 0);
    }

    #[tokio::test]
    async fn test_rejects_wrong_input_width() {
        let dir = ArtifactDir::new();
        let (mut model, shard) = lstm_dense_model(2, 0.0, 0.0);
        model["modelTopology"]["config"]["layers"][0]["config"]["batch_input_shape"] =
            serde_json::json!([null, 50, 1]);
        let manifest = dir.write(&model, &shard);
        let artifact = load_artifact(&FileSource::new(manifest)).await.unwrap();
        assert!(SequentialModel::from_artifact(artifact).is_err());
    }
}
