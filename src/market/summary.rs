use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::series::{round2, PricePoint};

/// Headline model quality figures shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    pub accuracy: f64,
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self {
            rmse: 4.2,
            mae: 3.1,
            r2: 0.93,
            accuracy: 0.93,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi: f64,
    pub macd: f64,
    pub sma20: f64,
    pub sma50: f64,
}

impl Default for TechnicalIndicators {
    fn default() -> Self {
        Self {
            rsi: 58.7,
            macd: 2.4,
            sma20: 165.34,
            sma50: 158.92,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RsiSignal {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MacdSignal {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SmaPosition {
    Above,
    Below,
}

pub fn rsi_signal(rsi: f64) -> RsiSignal {
    if rsi > 70.0 {
        RsiSignal::Overbought
    } else if rsi < 30.0 {
        RsiSignal::Oversold
    } else {
        RsiSignal::Neutral
    }
}

pub fn macd_signal(macd: f64) -> MacdSignal {
    if macd > 0.0 {
        MacdSignal::Bullish
    } else {
        MacdSignal::Bearish
    }
}

pub fn sma_position(price: Option<f64>, sma: f64) -> SmaPosition {
    match price {
        Some(p) if p > sma => SmaPosition::Above,
        _ => SmaPosition::Below,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorReadings {
    pub rsi: f64,
    pub rsi_signal: RsiSignal,
    pub macd: f64,
    pub macd_signal: MacdSignal,
    pub sma20: f64,
    pub sma20_position: SmaPosition,
    pub sma50: f64,
    pub sma50_position: SmaPosition,
}

impl IndicatorReadings {
    pub fn read(indicators: &TechnicalIndicators, current_price: Option<f64>) -> Self {
        Self {
            rsi: indicators.rsi,
            rsi_signal: rsi_signal(indicators.rsi),
            macd: indicators.macd,
            macd_signal: macd_signal(indicators.macd),
            sma20: indicators.sma20,
            sma20_position: sma_position(current_price, indicators.sma20),
            sma50: indicators.sma50,
            sma50_position: sma_position(current_price, indicators.sma50),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl SeriesStats {
    pub fn of_actuals(history: &[PricePoint]) -> Self {
        if history.is_empty() {
            return Self::default();
        }

        let prices: Vec<f64> = history.iter().map(|p| p.actual).collect();
        let std_dev = if prices.len() > 1 {
            prices.iter().std_dev()
        } else {
            0.0
        };

        Self {
            mean: round2(prices.iter().mean()),
            std_dev: round2(std_dev),
            min: Statistics::min(prices.iter()),
            max: Statistics::max(prices.iter()),
            count: prices.len(),
        }
    }
}

/// `0.93` → `"93.0%"`.
pub fn format_percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// `+2.3%` / `-0.4%` change from `from` to `to`.
pub fn format_change(from: f64, to: f64) -> Option<String> {
    if from == 0.0 {
        return None;
    }
    let change = (to - from) / from * 100.0;
    Some(format!("{:+.1}%", change))
}

/// Share volume in millions, `45_312_000` → `"45.3M"`.
pub fn format_volume(volume: u64) -> String {
    format!("{:.1}M", volume as f64 / 1_000_000.0)
}
