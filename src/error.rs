use thiserror::Error;

use crate::predictor::WINDOW_LEN;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    #[error("expected {expected} numeric values, got {actual}")]
    Validation {
        expected: usize,
        actual: usize,
    },

    #[error("value at position {index} is not a finite number")]
    NonFinite { index: usize },

    #[error("model is not ready")]
    ModelNotReady,

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl PredictError {
    /// Message shown to the user at the view boundary.
    pub fn user_message(&self) -> String {
        match self {
            PredictError::Validation { .. } | PredictError::NonFinite { .. } => {
                format!("Please enter exactly {} numeric values.", WINDOW_LEN)
            }
            PredictError::ModelNotReady => "Model is still loading. Please wait...".to_string(),
            PredictError::ModelLoad(_) => "Failed to load model.".to_string(),
            PredictError::Inference(cause) => format!("Error during prediction: {}", cause),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PredictError::Validation { .. } | PredictError::NonFinite { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Validation { .. } | PredictError::NonFinite { .. } => "validation",
            PredictError::ModelNotReady => "not_ready",
            PredictError::ModelLoad(_) => "load_failed",
            PredictError::Inference(_) => "inference",
        }
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request for {url} failed: {message}")]
    Http {
        url: String,
        message: String,
    },

    #[error("Invalid model JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported model format: {0}")]
    Format(String),

    #[error("Weight {name} has shape {actual:?}, expected {expected:?}")]
    WeightShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Missing weight: {0}")]
    MissingWeight(String),
}

impl From<ArtifactError> for PredictError {
    fn from(err: ArtifactError) -> Self {
        PredictError::ModelLoad(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DashboardError {
    #[error("Unsupported stock symbol: {0}")]
    UnknownSymbol(String),

    #[error("Unsupported prediction horizon: {0} days")]
    InvalidPredictionDays(u32),
}
