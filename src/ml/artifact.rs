//! Reader for the TensorFlow.js layers-model format: a `model.json` holding
//! the Keras topology and a weights manifest, plus binary weight shards.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use super::tensor::element_count;
use crate::error::ArtifactError;

#[derive(Debug, Deserialize)]
struct ModelJson {
    #[serde(default)]
    format: Option<String>,
    #[serde(rename = "generatedBy", default)]
    generated_by: Option<String>,
    #[serde(rename = "modelTopology")]
    model_topology: Value,
    #[serde(rename = "weightsManifest", default)]
    weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Deserialize)]
struct WeightGroup {
    paths: Vec<String>,
    weights: Vec<WeightEntry>,
}

#[derive(Debug, Deserialize)]
struct WeightEntry {
    name: String,
    shape: Vec<usize>,
    #[serde(default = "default_dtype")]
    dtype: String,
    #[serde(default)]
    quantization: Option<Value>,
}

fn default_dtype() -> String {
    "float32".to_string()
}

/// One entry of the Keras `layers` list.
#[derive(Debug, Clone)]
pub struct LayerSpec {
    pub class_name: String,
    pub config: Value,
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        self.config
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct WeightData {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

#[derive(Debug)]
pub struct ModelArtifact {
    pub location: String,
    pub format: Option<String>,
    pub generated_by: Option<String>,
    pub model_name: String,
    pub layers: Vec<LayerSpec>,
    pub weights: HashMap<String, WeightData>,
}

/// Somewhere a `model.json` and its shards can be fetched from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    fn location(&self) -> String;

    async fn fetch_manifest(&self) -> Result<Vec<u8>, ArtifactError>;

    /// `path` is relative to the manifest, as written in `weightsManifest`.
    async fn fetch_shard(&self, path: &str) -> Result<Vec<u8>, ArtifactError>;
}

pub struct FileSource {
    manifest_path: PathBuf,
}

impl FileSource {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    async fn read(&self, path: PathBuf) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(&path).await.map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[async_trait]
impl ArtifactSource for FileSource {
    fn location(&self) -> String {
        self.manifest_path.display().to_string()
    }

    async fn fetch_manifest(&self) -> Result<Vec<u8>, ArtifactError> {
        self.read(self.manifest_path.clone()).await
    }

    async fn fetch_shard(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let base = self
            .manifest_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        self.read(base.join(path)).await
    }
}

pub struct HttpSource {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpSource {
    pub fn new(url: &str) -> Result<Self, ArtifactError> {
        let url = reqwest::Url::parse(url).map_err(|e| ArtifactError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }

    async fn get(&self, url: reqwest::Url) -> Result<Vec<u8>, ArtifactError> {
        let http_err = |e: reqwest::Error| ArtifactError::Http {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        let bytes = response.bytes().await.map_err(http_err)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    fn location(&self) -> String {
        self.url.to_string()
    }

    async fn fetch_manifest(&self) -> Result<Vec<u8>, ArtifactError> {
        self.get(self.url.clone()).await
    }

    async fn fetch_shard(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let url = self.url.join(path).map_err(|e| ArtifactError::Http {
            url: path.to_string(),
            message: e.to_string(),
        })?;
        self.get(url).await
    }
}

/// Picks an HTTP source for `http(s)://` locations, a file source otherwise.
pub fn source_for(location: &str) -> Result<Box<dyn ArtifactSource>, ArtifactError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Box::new(HttpSource::new(location)?))
    } else {
        Ok(Box::new(FileSource::new(location)))
    }
}

pub async fn load_artifact(source: &dyn ArtifactSource) -> Result<ModelArtifact, ArtifactError> {
    let location = source.location();
    info!("Loading model artifact from {}", location);

    let manifest = source.fetch_manifest().await?;
    let model_json: ModelJson = serde_json::from_slice(&manifest)?;

    if let Some(format) = &model_json.format {
        if format != "layers-model" {
            return Err(ArtifactError::Format(format!(
                "expected a layers-model, found {}",
                format
            )));
        }
    }

    let (model_name, layers) = parse_topology(&model_json.model_topology)?;

    let mut weights = HashMap::new();
    for group in &model_json.weights_manifest {
        let mut buffer = Vec::new();
        for path in &group.paths {
            let shard = source.fetch_shard(path).await?;
            debug!("Fetched shard {} ({} bytes)", path, shard.len());
            buffer.extend_from_slice(&shard);
        }
        decode_group(group, &buffer, &mut weights)?;
    }

    info!(
        "Model artifact parsed: {} layers, {} weight tensors",
        layers.len(),
        weights.len()
    );

    Ok(ModelArtifact {
        location,
        format: model_json.format,
        generated_by: model_json.generated_by,
        model_name,
        layers,
        weights,
    })
}

fn decode_group(
    group: &WeightGroup,
    buffer: &[u8],
    weights: &mut HashMap<String, WeightData>,
) -> Result<(), ArtifactError> {
    let mut offset: usize = 0;
    for entry in &group.weights {
        if entry.quantization.is_some() {
            return Err(ArtifactError::Format(format!(
                "quantized weight {} is not supported",
                entry.name
            )));
        }
        if entry.dtype != "float32" {
            return Err(ArtifactError::Format(format!(
                "weight {} has dtype {}, only float32 is supported",
                entry.name, entry.dtype
            )));
        }

        let byte_len = element_count(&entry.shape)
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| {
                ArtifactError::Format(format!(
                    "weight {} has an oversized shape {:?}",
                    entry.name, entry.shape
                ))
            })?;
        let end = offset.saturating_add(byte_len);
        if end > buffer.len() {
            return Err(ArtifactError::Format(format!(
                "weight {} needs {} bytes at offset {}, shard data has {}",
                entry.name,
                byte_len,
                offset,
                buffer.len()
            )));
        }

        let values = buffer[offset..end]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        offset = end;

        weights.insert(
            entry.name.clone(),
            WeightData {
                shape: entry.shape.clone(),
                values,
            },
        );
    }
    Ok(())
}

/// Accepts both the bare topology and the `{"model_config": ...}` wrapper, and
/// both the old list-style and the newer `{"layers": [...]}` Sequential config.
fn parse_topology(topology: &Value) -> Result<(String, Vec<LayerSpec>), ArtifactError> {
    let model_config = topology.get("model_config").unwrap_or(topology);

    let class_name = model_config
        .get("class_name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if class_name != "Sequential" {
        return Err(ArtifactError::Format(format!(
            "only Sequential models are supported, found {:?}",
            class_name
        )));
    }

    let config = model_config
        .get("config")
        .ok_or_else(|| ArtifactError::Format("topology has no config".to_string()))?;

    let (name, layer_values) = match config {
        Value::Array(layers) => ("sequential".to_string(), layers.clone()),
        Value::Object(obj) => {
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("sequential")
                .to_string();
            let layers = obj
                .get("layers")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| ArtifactError::Format("topology has no layers".to_string()))?;
            (name, layers)
        }
        _ => return Err(ArtifactError::Format("malformed topology config".to_string())),
    };

    let layers = layer_values
        .into_iter()
        .map(|layer| {
            let class_name = layer
                .get("class_name")
                .and_then(Value::as_str)
                .ok_or_else(|| ArtifactError::Format("layer without class_name".to_string()))?
                .to_string();
            let config = layer.get("config").cloned().unwrap_or(Value::Null);
            Ok(LayerSpec { class_name, config })
        })
        .collect::<Result<Vec<_>, ArtifactError>>()?;

    Ok((name, layers))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_load_file_artifact() {
        let dir = ArtifactDir::new();
        let (model, shard) = lstm_dense_model(4, 0.1, 0.5);
        let manifest = dir.write(&model, &shard);

        let artifact = load_artifact(&FileSource::new(manifest)).await.unwrap();
        assert_eq!(artifact.model_name, "sequential");
        assert_eq!(artifact.layers.len(), 4);
        assert_eq!(artifact.layers[1].class_name, "LSTM");
        assert_eq!(artifact.layers[1].name(), "lstm");
        assert_eq!(artifact.weights.len(), 5);
        assert_eq!(artifact.weights["dense/bias"].values, vec![0.5]);
        assert_eq!(artifact.weights["lstm/lstm_cell/recurrent_kernel"].shape, vec![4, 16]);
    }

    #[tokio::test]
    async fn test_truncated_shard_is_format_error() {
        let dir = ArtifactDir::new();
        let (model, mut shard) = lstm_dense_model(4, 0.1, 0.5);
        shard.truncate(10);
        let manifest = dir.write(&model, &shard);

        let err = load_artifact(&FileSource::new(manifest)).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Format(_)));
    }

    #[tokio::test]
    async fn test_overflowing_weight_shape_is_format_error() {
        let dir = ArtifactDir::new();
        let (mut model, shard) = lstm_dense_model(4, 0.1, 0.5);
        model["weightsManifest"][0]["weights"][4]["shape"] =
            serde_json::json!([1u64 << 33, 1u64 << 33]);
        let manifest = dir.write(&model, &shard);

        let err = load_artifact(&FileSource::new(manifest)).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Format(ref msg) if msg.contains("dense/bias")));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_io_error() {
        let dir = ArtifactDir::new();
        let err = load_artifact(&FileSource::new(dir.path().join("absent.json")))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[tokio::test]
    async fn test_rejects_functional_models() {
        let dir = ArtifactDir::new();
        let model = serde_json::json!({
            "format": "layers-model",
            "modelTopology": {"class_name": "Functional", "config": {"layers": []}},
            "weightsManifest": []
        });
        let manifest = dir.write(&model, &[]);

        let err = load_artifact(&FileSource::new(manifest)).await.unwrap_err();
        assert!(err.to_string().contains("Sequential"));
    }

    #[test]
    fn test_parse_wrapped_list_topology() {
        let topology = serde_json::json!({
            "keras_version": "2.1.6",
            "model_config": {
                "class_name": "Sequential",
                "config": [
                    {"class_name": "Dense", "config": {"name": "dense_1", "units": 1}}
                ]
            }
        });
        let (name, layers) = parse_topology(&topology).unwrap();
        assert_eq!(name, "sequential");
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name(), "dense_1");
    }

    #[test]
    fn test_source_for_picks_transport() {
        assert!(source_for("https://example.com/model.json")
            .unwrap()
            .location()
            .starts_with("https://"));
        assert_eq!(source_for("static/model.json").unwrap().location(), "static/model.json");
    }
}
