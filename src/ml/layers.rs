use nalgebra::{DMatrix, DVector};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::artifact::{LayerSpec, WeightData};
use super::tensor::{element_count, Tensor, TensorTracker};
use crate::error::ArtifactError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Tanh,
    Sigmoid,
    HardSigmoid,
}

impl Activation {
    pub fn parse(name: Option<&str>) -> Result<Self, ArtifactError> {
        match name.unwrap_or("linear") {
            "linear" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "hard_sigmoid" => Ok(Activation::HardSigmoid),
            other => Err(ArtifactError::Format(format!(
                "unsupported activation {}",
                other
            ))),
        }
    }

    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
        }
    }
}

/// Keras LSTM with gate order input, forget, cell, output.
#[derive(Debug)]
pub struct LstmLayer {
    pub name: String,
    pub units: usize,
    pub input_dim: usize,
    kernel_t: DMatrix<f32>,
    recurrent_t: DMatrix<f32>,
    bias: DVector<f32>,
    activation: Activation,
    recurrent_activation: Activation,
    return_sequences: bool,
}

#[derive(Debug)]
pub struct DenseLayer {
    pub name: String,
    pub units: usize,
    pub input_dim: usize,
    kernel_t: DMatrix<f32>,
    bias: DVector<f32>,
    activation: Activation,
}

#[derive(Debug)]
pub enum Layer {
    Lstm(LstmLayer),
    Dense(DenseLayer),
    Dropout { name: String },
    Flatten { name: String },
}

impl Layer {
    pub fn name(&self) -> &str {
        match self {
            Layer::Lstm(l) => &l.name,
            Layer::Dense(l) => &l.name,
            Layer::Dropout { name } | Layer::Flatten { name } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Lstm(_) => "LSTM",
            Layer::Dense(_) => "Dense",
            Layer::Dropout { .. } => "Dropout",
            Layer::Flatten { .. } => "Flatten",
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Layer::Lstm(l) => l.kernel_t.len() + l.recurrent_t.len() + l.bias.len(),
            Layer::Dense(l) => l.kernel_t.len() + l.bias.len(),
            _ => 0,
        }
    }

    /// Builds a layer from its Keras config. Returns `Ok(None)` for layers
    /// that carry no computation (`InputLayer`).
    pub fn from_spec(
        spec: &LayerSpec,
        weights: &HashMap<String, WeightData>,
    ) -> Result<Option<Self>, ArtifactError> {
        let name = spec.name().to_string();
        match spec.class_name.as_str() {
            "InputLayer" => Ok(None),
            "Dropout" => Ok(Some(Layer::Dropout { name })),
            "Flatten" => Ok(Some(Layer::Flatten { name })),
            "Dense" => Ok(Some(Layer::Dense(DenseLayer::from_spec(spec, weights)?))),
            "LSTM" => Ok(Some(Layer::Lstm(LstmLayer::from_spec(spec, weights)?))),
            other => Err(ArtifactError::Format(format!(
                "layer {} has unsupported type {}",
                name, other
            ))),
        }
    }

    pub fn forward(&self, tracker: &Arc<TensorTracker>, input: &Tensor) -> Result<Tensor, String> {
        match self {
            Layer::Lstm(l) => l.forward(tracker, input),
            Layer::Dense(l) => l.forward(tracker, input),
            Layer::Dropout { .. } => {
                Tensor::new(tracker, input.shape().to_vec(), input.data().to_vec())
            }
            Layer::Flatten { .. } => {
                let batch = input.shape().first().copied().unwrap_or(1);
                let rest = input.len() / batch.max(1);
                Tensor::new(tracker, vec![batch, rest], input.data().to_vec())
            }
        }
    }
}

fn config_usize(spec: &LayerSpec, key: &str) -> Result<usize, ArtifactError> {
    spec.config
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| ArtifactError::Format(format!("layer {} is missing {}", spec.name(), key)))
}

fn config_bool(spec: &LayerSpec, key: &str, default: bool) -> bool {
    spec.config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn config_str<'a>(spec: &'a LayerSpec, key: &str) -> Option<&'a str> {
    spec.config.get(key).and_then(Value::as_str)
}

/// Finds `<layer>/<suffix>` or `<layer>/<cell>/<suffix>`.
fn find_weight<'a>(
    weights: &'a HashMap<String, WeightData>,
    layer: &str,
    suffix: &str,
) -> Option<(&'a String, &'a WeightData)> {
    let prefix = format!("{}/", layer);
    let tail = format!("/{}", suffix);
    weights
        .iter()
        .find(|(name, _)| name.starts_with(&prefix) && name.ends_with(&tail))
}

fn take_matrix(
    weights: &HashMap<String, WeightData>,
    layer: &str,
    suffix: &str,
    rows: Option<usize>,
    cols: usize,
) -> Result<DMatrix<f32>, ArtifactError> {
    let (name, data) = find_weight(weights, layer, suffix)
        .ok_or_else(|| ArtifactError::MissingWeight(format!("{}/{}", layer, suffix)))?;
    let ok = data.shape.len() == 2
        && data.shape[1] == cols
        && rows.map_or(true, |r| data.shape[0] == r);
    if !ok {
        return Err(ArtifactError::WeightShape {
            name: name.clone(),
            expected: vec![rows.unwrap_or(0), cols],
            actual: data.shape.clone(),
        });
    }
    check_values(name, data)?;
    Ok(DMatrix::from_row_slice(data.shape[0], data.shape[1], &data.values))
}

fn take_bias(
    weights: &HashMap<String, WeightData>,
    layer: &str,
    len: usize,
    use_bias: bool,
) -> Result<DVector<f32>, ArtifactError> {
    if !use_bias {
        return Ok(DVector::zeros(len));
    }
    let (name, data) = find_weight(weights, layer, "bias")
        .ok_or_else(|| ArtifactError::MissingWeight(format!("{}/bias", layer)))?;
    if data.shape != [len] {
        return Err(ArtifactError::WeightShape {
            name: name.clone(),
            expected: vec![len],
            actual: data.shape.clone(),
        });
    }
    check_values(name, data)?;
    Ok(DVector::from_column_slice(&data.values))
}

fn check_values(name: &str, data: &WeightData) -> Result<(), ArtifactError> {
    if element_count(&data.shape) != Some(data.values.len()) {
        return Err(ArtifactError::Format(format!(
            "weight {} holds {} values for shape {:?}",
            name,
            data.values.len(),
            data.shape
        )));
    }
    Ok(())
}

/// Units and input width must both be positive.
fn check_dims(name: &str, units: usize, input_dim: usize) -> Result<(), ArtifactError> {
    if units == 0 || input_dim == 0 {
        return Err(ArtifactError::Format(format!(
            "layer {} has units {} and input width {}",
            name, units, input_dim
        )));
    }
    Ok(())
}

impl LstmLayer {
    fn from_spec(
        spec: &LayerSpec,
        weights: &HashMap<String, WeightData>,
    ) -> Result<Self, ArtifactError> {
        let name = spec.name().to_string();
        let units = config_usize(spec, "units")?;
        if config_bool(spec, "go_backwards", false) || config_bool(spec, "stateful", false) {
            return Err(ArtifactError::Format(format!(
                "LSTM {} uses go_backwards or stateful, which are not supported",
                name
            )));
        }

        let kernel = take_matrix(weights, &name, "kernel", None, 4 * units)?;
        check_dims(&name, units, kernel.nrows())?;
        let recurrent = take_matrix(weights, &name, "recurrent_kernel", Some(units), 4 * units)?;
        let bias = take_bias(weights, &name, 4 * units, config_bool(spec, "use_bias", true))?;

        Ok(Self {
            units,
            input_dim: kernel.nrows(),
            kernel_t: kernel.transpose(),
            recurrent_t: recurrent.transpose(),
            bias,
            activation: Activation::parse(config_str(spec, "activation").or(Some("tanh")))?,
            recurrent_activation: Activation::parse(
                config_str(spec, "recurrent_activation").or(Some("sigmoid")),
            )?,
            return_sequences: config_bool(spec, "return_sequences", false),
            name,
        })
    }

    fn forward(&self, tracker: &Arc<TensorTracker>, input: &Tensor) -> Result<Tensor, String> {
        let shape = input.shape();
        if shape.len() != 3 || shape[2] != self.input_dim {
            return Err(format!(
                "{} expects input of shape [batch, timesteps, {}], got {:?}",
                self.name, self.input_dim, shape
            ));
        }
        let (batch, steps, features) = (shape[0], shape[1], shape[2]);
        let u = self.units;

        let out_len = if self.return_sequences {
            batch * steps * u
        } else {
            batch * u
        };
        let mut output = Vec::with_capacity(out_len);

        for b in 0..batch {
            let mut h = DVector::<f32>::zeros(u);
            let mut c = DVector::<f32>::zeros(u);
            for t in 0..steps {
                let offset = (b * steps + t) * features;
                let x = DVector::from_column_slice(&input.data()[offset..offset + features]);
                let z = &self.kernel_t * x + &self.recurrent_t * &h + &self.bias;

                for j in 0..u {
                    let i_gate = self.recurrent_activation.apply(z[j]);
                    let f_gate = self.recurrent_activation.apply(z[u + j]);
                    let candidate = self.activation.apply(z[2 * u + j]);
                    let o_gate = self.recurrent_activation.apply(z[3 * u + j]);
                    c[j] = f_gate * c[j] + i_gate * candidate;
                    h[j] = o_gate * self.activation.apply(c[j]);
                }

                if self.return_sequences {
                    output.extend(h.iter().copied());
                }
            }
            if !self.return_sequences {
                output.extend(h.iter().copied());
            }
        }

        let out_shape = if self.return_sequences {
            vec![batch, steps, u]
        } else {
            vec![batch, u]
        };
        Tensor::new(tracker, out_shape, output)
    }
}

impl DenseLayer {
    fn from_spec(
        spec: &LayerSpec,
        weights: &HashMap<String, WeightData>,
    ) -> Result<Self, ArtifactError> {
        let name = spec.name().to_string();
        let units = config_usize(spec, "units")?;
        let kernel = take_matrix(weights, &name, "kernel", None, units)?;
        check_dims(&name, units, kernel.nrows())?;
        let bias = take_bias(weights, &name, units, config_bool(spec, "use_bias", true))?;

        Ok(Self {
            units,
            input_dim: kernel.nrows(),
            kernel_t: kernel.transpose(),
            bias,
            activation: Activation::parse(config_str(spec, "activation"))?,
            name,
        })
    }

    /// Applies to the last axis, so `[batch, steps, in]` maps per step.
    fn forward(&self, tracker: &Arc<TensorTracker>, input: &Tensor) -> Result<Tensor, String> {
        let shape = input.shape();
        if shape.len() < 2 || shape[shape.len() - 1] != self.input_dim {
            return Err(format!(
                "{} expects last dimension {}, got shape {:?}",
                self.name, self.input_dim, shape
            ));
        }
        let rows = input.len() / self.input_dim;
        let mut output = Vec::with_capacity(rows * self.units);

        for row in input.data().chunks_exact(self.input_dim) {
            let x = DVector::from_column_slice(row);
            let y = &self.kernel_t * x + &self.bias;
            output.extend(y.iter().map(|v| self.activation.apply(*v)));
        }

        let mut out_shape = shape.to_vec();
        let last = out_shape.len() - 1;
        out_shape[last] = self.units;
        Tensor::new(tracker, out_shape, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weight(shape: Vec<usize>, values: Vec<f32>) -> WeightData {
        WeightData { shape, values }
    }

    fn spec(class_name: &str, config: Value) -> LayerSpec {
        LayerSpec {
            class_name: class_name.to_string(),
            config,
        }
    }

    #[test]
    fn test_activations() {
        assert_eq!(Activation::Relu.apply(-1.0), 0.0);
        assert_eq!(Activation::HardSigmoid.apply(10.0), 1.0);
        assert_eq!(Activation::HardSigmoid.apply(0.0), 0.5);
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-6);
        assert!(Activation::parse(Some("softmax")).is_err());
        assert_eq!(Activation::parse(None).unwrap(), Activation::Linear);
    }

    #[test]
    fn test_dense_forward() {
        let mut weights = HashMap::new();
        // kernel is [in=2, units=1]
        weights.insert("dense/kernel".to_string(), weight(vec![2, 1], vec![2.0, 3.0]));
        weights.insert("dense/bias".to_string(), weight(vec![1], vec![1.0]));
        let layer = Layer::from_spec(
            &spec("Dense", json!({"name": "dense", "units": 1, "activation": "linear"})),
            &weights,
        )
        .unwrap()
        .unwrap();

        let tracker = TensorTracker::new();
        let input = Tensor::new(&tracker, vec![1, 2], vec![1.0, 1.0]).unwrap();
        let out = layer.forward(&tracker, &input).unwrap();
        assert_eq!(out.shape(), &[1, 1]);
        assert_eq!(out.data(), &[6.0]);
    }

    #[test]
    fn test_lstm_single_step_matches_hand_computation() {
        // units=1, input_dim=1, all kernels 1, bias 0
        let mut weights = HashMap::new();
        weights.insert("lstm/lstm_cell/kernel".to_string(), weight(vec![1, 4], vec![1.0; 4]));
        weights.insert(
            "lstm/lstm_cell/recurrent_kernel".to_string(),
            weight(vec![1, 4], vec![1.0; 4]),
        );
        weights.insert("lstm/lstm_cell/bias".to_string(), weight(vec![4], vec![0.0; 4]));
        let layer = Layer::from_spec(
            &spec("LSTM", json!({"name": "lstm", "units": 1})),
            &weights,
        )
        .unwrap()
        .unwrap();

        let tracker = TensorTracker::new();
        let input = Tensor::new(&tracker, vec![1, 1, 1], vec![1.0]).unwrap();
        let out = layer.forward(&tracker, &input).unwrap();

        let sig = 1.0 / (1.0 + (-1.0f32).exp());
        let c = sig * 1.0f32.tanh();
        let expected = sig * c.tanh();
        assert_eq!(out.shape(), &[1, 1]);
        assert!((out.data()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_lstm_shape_mismatch_is_error() {
        let mut weights = HashMap::new();
        weights.insert("lstm/kernel".to_string(), weight(vec![2, 4], vec![0.0; 8]));
        weights.insert("lstm/recurrent_kernel".to_string(), weight(vec![1, 4], vec![0.0; 4]));
        weights.insert("lstm/bias".to_string(), weight(vec![4], vec![0.0; 4]));
        let layer = Layer::from_spec(
            &spec("LSTM", json!({"name": "lstm", "units": 1})),
            &weights,
        )
        .unwrap()
        .unwrap();

        let tracker = TensorTracker::new();
        let input = Tensor::new(&tracker, vec![1, 100, 1], vec![0.0; 100]).unwrap();
        assert!(layer.forward(&tracker, &input).is_err());
    }

    #[test]
    fn test_missing_and_misshapen_weights() {
        let weights = HashMap::new();
        let err = Layer::from_spec(&spec("Dense", json!({"name": "dense", "units": 1})), &weights)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MissingWeight(_)));

        let mut weights = HashMap::new();
        weights.insert("dense/kernel".to_string(), weight(vec![3, 2], vec![0.0; 6]));
        let err = Layer::from_spec(&spec("Dense", json!({"name": "dense", "units": 1})), &weights)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::WeightShape { .. }));
    }

    #[test]
    fn test_empty_dimensions_rejected_at_load() {
        let dense = spec("Dense", json!({"name": "dense", "units": 1}));

        let mut weights = HashMap::new();
        weights.insert("dense/kernel".to_string(), weight(vec![0, 1], vec![]));
        weights.insert("dense/bias".to_string(), weight(vec![1], vec![0.0]));
        let err = Layer::from_spec(&dense, &weights).unwrap_err();
        assert!(matches!(err, ArtifactError::Format(_)));

        let mut weights = HashMap::new();
        weights.insert("dense/kernel".to_string(), weight(vec![2, 0], vec![]));
        weights.insert("dense/bias".to_string(), weight(vec![0], vec![]));
        let err = Layer::from_spec(
            &spec("Dense", json!({"name": "dense", "units": 0})),
            &weights,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Format(_)));
    }

    #[test]
    fn test_value_count_must_match_shape() {
        let mut weights = HashMap::new();
        weights.insert("dense/kernel".to_string(), weight(vec![2, 1], vec![1.0; 3]));
        weights.insert("dense/bias".to_string(), weight(vec![1], vec![0.0]));
        let err = Layer::from_spec(&spec("Dense", json!({"name": "dense", "units": 1})), &weights)
            .unwrap_err();
        assert!(err.to_string().contains("3 values"));
    }

    #[test]
    fn test_unsupported_layer() {
        let err = Layer::from_spec(&spec("GRU", json!({"name": "gru"})), &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("GRU"));
        assert!(Layer::from_spec(&spec("InputLayer", json!({"name": "in"})), &HashMap::new())
            .unwrap()
            .is_none());
    }
}
