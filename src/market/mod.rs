//! Synthetic price history and forecast data for the dashboard.

pub mod dashboard;
pub mod series;
pub mod summary;

pub use dashboard::{
    selection_options, DashboardSnapshot, DashboardState, SelectionOptions, StockOption,
    PREDICTION_DAY_OPTIONS, STOCK_OPTIONS,
};
pub use series::{ChartPoint, ForecastPoint, PricePoint};
pub use summary::{ModelMetrics, SeriesStats, TechnicalIndicators};
