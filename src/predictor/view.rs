use serde::Serialize;
use tracing::warn;

use super::input::PredictionWindow;
use crate::ml::PredictionEngine;

/// Formats an amount as `$1234.57`; negative amounts as `-$1.50`.
pub fn format_currency(value: f64) -> String {
    if value < 0.0 {
        format!("-${:.2}", value.abs())
    } else {
        format!("${:.2}", value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictorView {
    pub input: String,
    pub error: Option<String>,
    pub prediction: Option<f64>,
    pub result_text: Option<String>,
    pub model_loading: bool,
}

/// State behind the predictor form: the raw text, the last prediction and
/// the last error message.
#[derive(Debug, Clone, Default)]
pub struct PredictorState {
    input: String,
    prediction: Option<f64>,
    error: Option<String>,
}

impl PredictorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn prediction(&self) -> Option<f64> {
        self.prediction
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Parses the current input and asks the engine for a prediction. A
    /// failure replaces the error message but keeps the last prediction.
    pub async fn submit(&mut self, engine: &PredictionEngine) {
        let result = async {
            // Readiness is reported ahead of shape problems.
            engine.ensure_available().await?;
            let window = PredictionWindow::try_from(self.input.as_str())?;
            engine.predict(window).await
        }
        .await;

        match result {
            Ok(value) => {
                self.prediction = Some(value);
                self.error = None;
            }
            Err(e) => {
                warn!("Prediction failed: {}", e);
                self.error = Some(e.user_message());
            }
        }
    }

    /// Pure read of the state.
    pub fn render(&self, model_loading: bool) -> PredictorView {
        PredictorView {
            input: self.input.clone(),
            error: self.error.clone(),
            prediction: self.prediction,
            result_text: self
                .prediction
                .map(|p| format!("Predicted Price: {}", format_currency(p))),
            model_loading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::engine::testing::GatedBackend;
    use crate::predictor::WINDOW_LEN;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(163.456), "$163.46");
        assert_eq!(format_currency(-1.5), "-$1.50");
    }

    #[tokio::test]
    async fn test_submit_before_load_reports_loading() {
        let backend = Arc::new(GatedBackend::new(false));
        let engine = PredictionEngine::new(backend, Duration::from_secs(1));

        let mut state = PredictorState::new();
        state.set_input("1,2,3");
        state.submit(&engine).await;

        assert_eq!(state.error(), Some("Model is still loading. Please wait..."));
        assert!(state.render(true).model_loading);
    }

    #[tokio::test]
    async fn test_submit_validation_never_reaches_model() {
        let backend = Arc::new(GatedBackend::new(false));
        let calls = backend.calls.clone();
        backend.release.notify_one();
        let engine = PredictionEngine::new(backend, Duration::from_secs(1));
        engine.load().await.unwrap();

        let mut state = PredictorState::new();
        state.set_input("1,2,abc,4");
        state.submit(&engine).await;

        assert_eq!(state.error(), Some("Please enter exactly 100 numeric values."));
        assert_eq!(state.prediction(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_success_then_failure_keeps_prediction() {
        let backend = Arc::new(GatedBackend::new(false));
        let calls = backend.calls.clone();
        backend.release.notify_one();
        let engine = PredictionEngine::new(backend, Duration::from_secs(1));
        engine.load().await.unwrap();

        let mut state = PredictorState::new();
        state.set_input(vec!["150.5"; WINDOW_LEN].join(", "));
        state.submit(&engine).await;

        assert_eq!(state.error(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let view = state.render(false);
        assert_eq!(view.result_text.as_deref(), Some("Predicted Price: $150.50"));

        state.set_input("oops");
        state.submit(&engine).await;
        let view = state.render(false);
        assert!(view.error.is_some());
        assert_eq!(view.prediction, Some(150.5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
