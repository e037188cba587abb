use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: String,
}

/// Where the layers-model artifact lives. `source` is either a filesystem
/// path or an http(s) URL pointing at `model.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    pub source: String,
    pub load_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub default_symbol: String,
    pub prediction_days: u32,
    pub history_days: usize,
    pub chart_window: usize,
    pub overlay_points: usize,
    pub confidence_band: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: "static".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: "static/model.json".to_string(),
            load_timeout_seconds: 30,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            default_symbol: "AAPL".to_string(),
            prediction_days: 7,
            history_days: 100,
            chart_window: 30,
            overlay_points: 5,
            confidence_band: 0.03,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads `path` (optional, TOML) and layers `STOCK_FORECAST__SECTION__KEY`
    /// environment variables on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("STOCK_FORECAST")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dashboard.confidence_band) {
            anyhow::bail!(
                "dashboard.confidence_band must be in [0, 1), got {}",
                self.dashboard.confidence_band
            );
        }
        if self.dashboard.history_days == 0 {
            anyhow::bail!("dashboard.history_days must be positive");
        }
        if self.dashboard.overlay_points > self.dashboard.history_days {
            anyhow::bail!("dashboard.overlay_points cannot exceed dashboard.history_days");
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            anyhow::bail!("logging.level {:?} is not a tracing level", self.logging.level);
        }
        if self.model.load_timeout_seconds == 0 {
            anyhow::bail!("model.load_timeout_seconds must be positive");
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dashboard.prediction_days, 7);
        assert_eq!(config.model.source, "static/model.json");
        assert_eq!(config.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_from_file_reads_toml_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[server]\nport = 9191\n\n[dashboard]\nprediction_days = 14\n\n[logging]\nlevel = \"debug\"\n"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.dashboard.prediction_days, 14);
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbos".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.log_level(), tracing::Level::WARN);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::from_file("/nonexistent/stock-forecast.toml").unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_rejects_bad_band() {
        let mut config = Config::default();
        config.dashboard.confidence_band = 1.5;
        assert!(config.validate().is_err());
    }
}
