//! Configuration management for the collector
//!
//! Loads from config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::normalizer::DEFAULT_TIMESTAMP_COLUMNS;
use crate::persistence::FILTERED_SUFFIX;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub collector: CollectorConfig,
    pub exporter: ExporterConfig,
    pub price_index: PriceIndexConfig,
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Directory holding archived exports, filtered series and metadata
    pub data_dir: String,
    /// Timestamp column names probed in priority order
    pub timestamp_candidates: Vec<String>,
    /// Suffix appended to the stem of filtered CSVs
    pub filtered_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Directory the browser downloads exports into
    pub download_dir: String,
    /// How long to wait for a new export
    pub timeout_secs: u64,
    /// Download directory polling interval
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceIndexConfig {
    /// Fetch spot prices for the cross-check
    pub enabled: bool,
    /// CoinGecko API base URL
    pub base_url: String,
    /// Pause after each request in milliseconds
    pub rate_limit_delay_ms: u64,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Base URL of the market front-end
    pub event_base_url: String,
}

impl ExporterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl PriceIndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let builder = Self::with_defaults(Config::builder())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (UPDOWN__SECTION__KEY)
            .add_source(
                Environment::with_prefix("UPDOWN")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("collector.timestamp_candidates")
                    .try_parsing(true),
            );

        Self::finish(builder)
    }

    /// Defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::finish(Self::with_defaults(Config::builder())?)
    }

    fn with_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>> {
        Ok(builder
            // Collector defaults
            .set_default("collector.data_dir", "./data")?
            .set_default(
                "collector.timestamp_candidates",
                DEFAULT_TIMESTAMP_COLUMNS.to_vec(),
            )?
            .set_default("collector.filtered_suffix", FILTERED_SUFFIX)?
            // Exporter defaults
            .set_default("exporter.download_dir", "./downloads")?
            .set_default("exporter.timeout_secs", 30)?
            .set_default("exporter.poll_interval_ms", 1000)?
            // Price index defaults
            .set_default("price_index.enabled", true)?
            .set_default("price_index.base_url", crate::oracle::COINGECKO_API_URL)?
            .set_default("price_index.rate_limit_delay_ms", 1000)?
            .set_default("price_index.timeout_secs", 15)?
            // Market defaults
            .set_default("market.event_base_url", crate::market::POLYMARKET_URL)?)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject settings the collector cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.collector.timestamp_candidates.is_empty() {
            bail!("collector.timestamp_candidates must name at least one column");
        }
        if self.collector.filtered_suffix.is_empty() {
            bail!("collector.filtered_suffix must not be empty");
        }
        if self.exporter.poll_interval_ms == 0 {
            bail!("exporter.poll_interval_ms must be positive");
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "data_dir={} download_dir={} candidates={:?} price_index={}",
            self.collector.data_dir,
            self.exporter.download_dir,
            self.collector.timestamp_candidates,
            if self.price_index.enabled {
                self.price_index.base_url.as_str()
            } else {
                "disabled"
            }
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
