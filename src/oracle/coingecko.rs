//! CoinGecko REST client
//!
//! Fetches the Bitcoin/USD spot series for a window from
//! `/coins/bitcoin/market_chart/range`. CoinGecko rate limits aggressively,
//! so every call is followed by a fixed pause.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{PriceIndexClient, SpotPrice};
use crate::types::SettlementWindow;

pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Clone, Deserialize)]
struct MarketChartRange {
    /// `[unix_millis, price]` pairs
    #[serde(default)]
    prices: Vec<(f64, f64)>,
}

/// CoinGecko spot price client
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    rate_limit_delay: Duration,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, timeout: Duration, rate_limit_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("updown-collector/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit_delay,
        })
    }

    fn range_url(&self, window: &SettlementWindow) -> String {
        format!(
            "{}/coins/bitcoin/market_chart/range?vs_currency=usd&from={}&to={}",
            self.base_url,
            window.start.timestamp(),
            window.end.timestamp()
        )
    }
}

fn to_spot_prices(body: MarketChartRange) -> Vec<SpotPrice> {
    body.prices
        .into_iter()
        .filter(|(_, price)| price.is_finite())
        .filter_map(|(millis, price)| {
            DateTime::from_timestamp_millis(millis as i64).map(|instant| SpotPrice { instant, price })
        })
        .collect()
}

#[async_trait]
impl PriceIndexClient for CoinGeckoClient {
    fn name(&self) -> &'static str {
        "CoinGecko"
    }

    async fn spot_prices(&self, window: &SettlementWindow) -> Result<Vec<SpotPrice>> {
        let url = self.range_url(window);
        debug!(source = "CoinGecko", url = %url, "Fetching spot range");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("CoinGecko request failed")?
            .error_for_status()
            .context("CoinGecko returned an error status")?;
        let body: MarketChartRange = response
            .json()
            .await
            .context("Failed to parse CoinGecko response")?;

        tokio::time::sleep(self.rate_limit_delay).await;

        Ok(to_spot_prices(body))
    }
}
