use chrono::{Duration, NaiveDate};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub actual: f64,
    pub volume: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
}

/// One row of the combined history + forecast chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
}

impl From<&PricePoint> for ChartPoint {
    fn from(p: &PricePoint) -> Self {
        Self {
            date: p.date,
            actual: Some(p.actual),
            predicted: p.predicted,
            confidence_low: None,
            confidence_high: None,
            volume: Some(p.volume),
        }
    }
}

impl From<&ForecastPoint> for ChartPoint {
    fn from(p: &ForecastPoint) -> Self {
        Self {
            date: p.date,
            actual: None,
            predicted: Some(p.predicted),
            confidence_low: Some(p.confidence_low),
            confidence_high: Some(p.confidence_high),
            volume: None,
        }
    }
}

pub const BASE_PRICE: f64 = 160.0;
pub const WAVE_AMPLITUDE: f64 = 20.0;
pub const WAVE_PERIOD: f64 = 10.0;
pub const MIN_VOLUME: u64 = 30_000_000;
pub const VOLUME_SPREAD: u64 = 50_000_000;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Centre of the synthetic price wave on day `i`.
pub fn base_price(i: usize) -> f64 {
    BASE_PRICE + (i as f64 / WAVE_PERIOD).sin() * WAVE_AMPLITUDE
}

/// `days` synthetic sessions ending the day before `today`.
pub fn generate_history<R: Rng>(today: NaiveDate, days: usize, rng: &mut R) -> Vec<PricePoint> {
    let noise = Uniform::new(0.0f64, 1.0);

    (0..days)
        .map(|i| {
            let base = base_price(i);
            let mut unit = || noise.sample(rng);
            let actual = base + unit() * 5.0 - 2.5;
            let open = base - 1.0 + unit() * 2.0;
            let high = base + 1.5 + unit() * 2.0;
            let low = base - 2.0 + unit() * 2.0;

            PricePoint {
                date: today - Duration::days((days - i) as i64),
                open: round2(open),
                high: round2(high),
                low: round2(low),
                actual: round2(actual),
                volume: rng.gen_range(MIN_VOLUME..MIN_VOLUME + VOLUME_SPREAD),
                predicted: None,
            }
        })
        .collect()
}

/// `days` forecast points starting tomorrow, drifting up 0.5 per day around
/// `last_actual` with a fixed-fraction band.
pub fn generate_forecast<R: Rng>(
    today: NaiveDate,
    last_actual: f64,
    days: u32,
    band: f64,
    rng: &mut R,
) -> Vec<ForecastPoint> {
    let jitter = Uniform::new(-5.0f64, 5.0);

    (0..days)
        .map(|i| {
            let predicted = round2(last_actual + jitter.sample(rng) + i as f64 * 0.5);
            ForecastPoint {
                date: today + Duration::days(i as i64 + 1),
                predicted,
                confidence_low: round2(predicted - predicted * band),
                confidence_high: round2(predicted + predicted * band),
            }
        })
        .collect()
}

/// Marks the last `count` history points with a noisy "predicted" value so
/// the chart shows both lines overlapping.
pub fn overlay_predictions<R: Rng>(history: &mut [PricePoint], count: usize, rng: &mut R) {
    let jitter = Uniform::new(-2.0f64, 2.0);
    let start = history.len().saturating_sub(count);
    for point in &mut history[start..] {
        point.predicted = Some(round2(point.actual + jitter.sample(rng)));
    }
}

/// Last `window` history points followed by every forecast point.
pub fn combined_chart(history: &[PricePoint], forecast: &[ForecastPoint], window: usize) -> Vec<ChartPoint> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(ChartPoint::from)
        .chain(forecast.iter().map(ChartPoint::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    #[test]
    fn test_history_shape_and_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let history = generate_history(today(), 100, &mut rng);

        assert_eq!(history.len(), 100);
        assert_eq!(history[0].date, NaiveDate::from_ymd_opt(2024, 2, 24).unwrap());
        assert_eq!(history[99].date, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());

        for (i, p) in history.iter().enumerate() {
            let base = base_price(i);
            assert!(p.actual >= round2(base - 2.5) && p.actual <= round2(base + 2.5));
            assert!(p.open >= round2(base - 1.0) && p.open <= round2(base + 1.0));
            assert!(p.high >= round2(base + 1.5) && p.high <= round2(base + 3.5));
            assert!(p.low >= round2(base - 2.0) && p.low <= round2(base));
            assert!(p.volume >= MIN_VOLUME && p.volume < MIN_VOLUME + VOLUME_SPREAD);
            assert_eq!(p.predicted, None);
            assert_eq!(p.actual, round2(p.actual));
        }
    }

    #[test]
    fn test_forecast_band_and_dates() {
        let mut rng = StdRng::seed_from_u64(11);
        let forecast = generate_forecast(today(), 170.0, 14, 0.03, &mut rng);

        assert_eq!(forecast.len(), 14);
        assert_eq!(forecast[0].date, NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
        for (i, p) in forecast.iter().enumerate() {
            let centre = 170.0 + i as f64 * 0.5;
            assert!(p.predicted >= centre - 5.0 && p.predicted <= centre + 5.0);
            assert_eq!(p.confidence_low, round2(p.predicted - p.predicted * 0.03));
            assert_eq!(p.confidence_high, round2(p.predicted + p.predicted * 0.03));
            assert!(p.confidence_low < p.predicted && p.predicted < p.confidence_high);
        }
    }

    #[test]
    fn test_overlay_only_touches_tail() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut history = generate_history(today(), 20, &mut rng);
        overlay_predictions(&mut history, 5, &mut rng);

        assert!(history[..15].iter().all(|p| p.predicted.is_none()));
        for p in &history[15..] {
            let predicted = p.predicted.unwrap();
            assert!((predicted - p.actual).abs() <= 2.01);
        }
    }

    #[test]
    fn test_combined_chart_window() {
        let mut rng = StdRng::seed_from_u64(5);
        let history = generate_history(today(), 100, &mut rng);
        let forecast = generate_forecast(today(), history[99].actual, 7, 0.03, &mut rng);
        let chart = combined_chart(&history, &forecast, 30);

        assert_eq!(chart.len(), 37);
        assert_eq!(chart[0].date, history[70].date);
        assert!(chart[29].actual.is_some());
        assert!(chart[30].actual.is_none());
        assert_eq!(chart[30].predicted, Some(forecast[0].predicted));

        let short = combined_chart(&history[..10], &[], 30);
        assert_eq!(short.len(), 10);
    }

    #[test]
    fn test_same_seed_same_series() {
        let a = generate_history(today(), 50, &mut StdRng::seed_from_u64(1));
        let b = generate_history(today(), 50, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }
}
