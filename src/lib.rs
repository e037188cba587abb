//! Mock stock-price dashboard plus a predictor that runs a pre-trained
//! TensorFlow.js layers model over a 100-price window.

pub mod config;
pub mod error;
pub mod market;
pub mod ml;
pub mod predictor;
pub mod web;

pub use config::Config;
pub use error::{ArtifactError, DashboardError, PredictError};
pub use ml::PredictionEngine;
pub use predictor::{PredictionWindow, WINDOW_LEN};
pub use web::DashboardServer;
