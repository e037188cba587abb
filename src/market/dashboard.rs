use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use super::series::{
    combined_chart, generate_forecast, generate_history, overlay_predictions, ChartPoint,
    ForecastPoint, PricePoint,
};
use super::summary::{
    format_change, format_percent, format_volume, IndicatorReadings, ModelMetrics, SeriesStats,
    TechnicalIndicators,
};
use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::predictor::format_currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockOption {
    pub symbol: &'static str,
    pub label: &'static str,
}

pub const STOCK_OPTIONS: &[StockOption] = &[StockOption {
    symbol: "AAPL",
    label: "AAPL (Apple)",
}];

pub const PREDICTION_DAY_OPTIONS: &[u32] = &[3, 7, 14, 30];

/// Confidence shown next to every forecast row.
pub const FORECAST_CONFIDENCE: &str = "97%";

pub fn find_stock(symbol: &str) -> Result<&'static StockOption, DashboardError> {
    STOCK_OPTIONS
        .iter()
        .find(|o| o.symbol.eq_ignore_ascii_case(symbol))
        .ok_or_else(|| DashboardError::UnknownSymbol(symbol.to_string()))
}

pub fn check_prediction_days(days: u32) -> Result<u32, DashboardError> {
    if PREDICTION_DAY_OPTIONS.contains(&days) {
        Ok(days)
    } else {
        Err(DashboardError::InvalidPredictionDays(days))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionOptions {
    pub stocks: &'static [StockOption],
    pub prediction_days: &'static [u32],
}

pub fn selection_options() -> SelectionOptions {
    SelectionOptions {
        stocks: STOCK_OPTIONS,
        prediction_days: PREDICTION_DAY_OPTIONS,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryCards {
    pub current_price: Option<f64>,
    pub current_price_text: Option<String>,
    pub current_change: Option<String>,
    pub next_day_prediction: Option<f64>,
    pub next_day_text: Option<String>,
    pub next_day_change: Option<String>,
    pub model_accuracy: String,
    pub rmse: f64,
    pub volume: Option<u64>,
    pub volume_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastRow {
    pub date: NaiveDate,
    pub predicted: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub confidence: &'static str,
    pub highlight: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub symbol: String,
    pub symbol_label: String,
    pub prediction_days: u32,
    pub generated_at: DateTime<Utc>,
    pub summary: SummaryCards,
    pub metrics: ModelMetrics,
    pub indicators: IndicatorReadings,
    pub price_stats: SeriesStats,
    pub chart: Vec<ChartPoint>,
    pub forecast_table: Vec<ForecastRow>,
}

/// Everything the dashboard shows. Setters regenerate the series; the
/// snapshot is a pure read.
#[derive(Debug, Clone)]
pub struct DashboardState {
    config: DashboardConfig,
    symbol: &'static StockOption,
    prediction_days: u32,
    history: Vec<PricePoint>,
    forecast: Vec<ForecastPoint>,
    metrics: ModelMetrics,
    indicators: TechnicalIndicators,
    generated_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new<R: Rng>(
        config: &DashboardConfig,
        today: NaiveDate,
        rng: &mut R,
    ) -> Result<Self, DashboardError> {
        let mut state = Self {
            config: config.clone(),
            symbol: find_stock(&config.default_symbol)?,
            prediction_days: check_prediction_days(config.prediction_days)?,
            history: Vec::new(),
            forecast: Vec::new(),
            metrics: ModelMetrics::default(),
            indicators: TechnicalIndicators::default(),
            generated_at: Utc::now(),
        };
        state.regenerate(today, rng);
        Ok(state)
    }

    pub fn symbol(&self) -> &str {
        self.symbol.symbol
    }

    pub fn prediction_days(&self) -> u32 {
        self.prediction_days
    }

    pub fn history(&self) -> &[PricePoint] {
        &self.history
    }

    pub fn forecast(&self) -> &[ForecastPoint] {
        &self.forecast
    }

    pub fn select_symbol<R: Rng>(
        &mut self,
        symbol: &str,
        today: NaiveDate,
        rng: &mut R,
    ) -> Result<(), DashboardError> {
        self.symbol = find_stock(symbol)?;
        info!("Selected stock {}", self.symbol.symbol);
        self.regenerate(today, rng);
        Ok(())
    }

    pub fn set_prediction_days<R: Rng>(
        &mut self,
        days: u32,
        today: NaiveDate,
        rng: &mut R,
    ) -> Result<(), DashboardError> {
        self.prediction_days = check_prediction_days(days)?;
        info!("Prediction horizon set to {} days", days);
        self.regenerate(today, rng);
        Ok(())
    }

    pub fn regenerate<R: Rng>(&mut self, today: NaiveDate, rng: &mut R) {
        let mut history = generate_history(today, self.config.history_days, rng);
        // Forecast anchors on the last actual before the overlay is applied.
        let last_actual = history.last().map(|p| p.actual).unwrap_or_default();
        let forecast = generate_forecast(
            today,
            last_actual,
            self.prediction_days,
            self.config.confidence_band,
            rng,
        );
        overlay_predictions(&mut history, self.config.overlay_points, rng);

        debug!(
            "Generated {} history points and {} forecast points for {}",
            history.len(),
            forecast.len(),
            self.symbol.symbol
        );

        self.history = history;
        self.forecast = forecast;
        self.generated_at = Utc::now();
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let last = self.history.last();
        let previous = self
            .history
            .len()
            .checked_sub(2)
            .and_then(|i| self.history.get(i));
        let current_price = last.map(|p| p.actual);
        let next_day = self.forecast.first().map(|p| p.predicted);

        let summary = SummaryCards {
            current_price,
            current_price_text: current_price.map(format_currency),
            current_change: match (previous, last) {
                (Some(prev), Some(last)) => format_change(prev.actual, last.actual),
                _ => None,
            },
            next_day_prediction: next_day,
            next_day_text: next_day.map(format_currency),
            next_day_change: match (current_price, next_day) {
                (Some(current), Some(next)) => format_change(current, next),
                _ => None,
            },
            model_accuracy: format_percent(self.metrics.accuracy),
            rmse: self.metrics.rmse,
            volume: last.map(|p| p.volume),
            volume_text: last.map(|p| format_volume(p.volume)),
        };

        let forecast_table = self
            .forecast
            .iter()
            .enumerate()
            .map(|(i, p)| ForecastRow {
                date: p.date,
                predicted: p.predicted,
                confidence_low: p.confidence_low,
                confidence_high: p.confidence_high,
                confidence: FORECAST_CONFIDENCE,
                highlight: i == 0,
            })
            .collect();

        DashboardSnapshot {
            symbol: self.symbol.symbol.to_string(),
            symbol_label: self.symbol.label.to_string(),
            prediction_days: self.prediction_days,
            generated_at: self.generated_at,
            summary,
            metrics: self.metrics.clone(),
            indicators: IndicatorReadings::read(&self.indicators, current_price),
            price_stats: SeriesStats::of_actuals(&self.history),
            chart: combined_chart(&self.history, &self.forecast, self.config.chart_window),
            forecast_table,
        }
    }
}
