//! Oracle module - Bitcoin spot price ground truth
//!
//! Fetches the spot series over a settlement window from a public price
//! index and cross-checks it against the market's final price.

mod coingecko;

pub use coingecko::{CoinGeckoClient, COINGECKO_API_URL};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Direction, NormalizationResult, SettlementWindow};

/// "Up" share price at or above which the market is read as expecting Up
pub const MARKET_UP_THRESHOLD: f64 = 0.5;

/// One spot observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotPrice {
    pub instant: DateTime<Utc>,
    pub price: f64,
}

/// Trait for spot price index clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceIndexClient: Send + Sync {
    /// Get the source name
    fn name(&self) -> &'static str;

    /// Spot prices covering the window, in any order
    async fn spot_prices(&self, window: &SettlementWindow) -> Result<Vec<SpotPrice>>;
}

/// Market outcome implied by the export vs. what spot actually did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotCrossCheck {
    pub source: String,
    pub spot_points: usize,
    pub spot_open: f64,
    pub spot_close: f64,
    pub spot_change_percent: f64,
    pub spot_direction: Direction,
    pub market_last_price: f64,
    pub market_direction: Direction,
    pub agrees: bool,
}

impl SpotCrossCheck {
    /// Compare the spot move over the window with the market's last price.
    ///
    /// Spot open/close are the earliest and latest spot points inside the
    /// window. Returns `None` if either side has no data.
    pub fn evaluate(
        source: &str,
        spot: &[SpotPrice],
        result: &NormalizationResult,
    ) -> Option<Self> {
        let market_last_price = result.last_price?;

        let in_window: Vec<&SpotPrice> = spot
            .iter()
            .filter(|p| result.window.contains(p.instant))
            .collect();
        let open = in_window.iter().min_by_key(|p| p.instant)?;
        let close = in_window.iter().max_by_key(|p| p.instant)?;

        let spot_change_percent = if open.price != 0.0 {
            (close.price - open.price) / open.price * 100.0
        } else {
            0.0
        };
        let spot_direction = Direction::from_move(open.price, close.price);
        let market_direction = if market_last_price >= MARKET_UP_THRESHOLD {
            Direction::Up
        } else {
            Direction::Down
        };

        Some(Self {
            source: source.to_string(),
            spot_points: in_window.len(),
            spot_open: open.price,
            spot_close: close.price,
            spot_change_percent,
            spot_direction,
            market_last_price,
            market_direction,
            agrees: spot_direction == market_direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::WindowNormalizer;
    use crate::types::RawPriceRow;
    use chrono::NaiveDate;

    fn spot(iso: &str, price: f64) -> SpotPrice {
        SpotPrice {
            instant: DateTime::parse_from_rfc3339(iso).unwrap().with_timezone(&Utc),
            price,
        }
    }

    fn market(last_price: &str) -> NormalizationResult {
        let rows = vec![
            RawPriceRow::new()
                .with("Date (UTC)", "2025-07-28 17:00")
                .with("Price", "0.5"),
            RawPriceRow::new()
                .with("Date (UTC)", "2025-07-29 15:59")
                .with("Price", last_price),
        ];
        WindowNormalizer::new()
            .normalize(&rows, NaiveDate::from_ymd_opt(2025, 7, 29).unwrap())
            .unwrap()
    }

    #[test]
    fn uses_time_extremes_inside_window_only() {
        let series = vec![
            spot("2025-07-29T15:00:00Z", 119_000.0),
            spot("2025-07-28T15:00:00Z", 90_000.0),
            spot("2025-07-28T16:00:00Z", 118_000.0),
            spot("2025-07-29T16:00:00Z", 50_000.0),
        ];
        let check = SpotCrossCheck::evaluate("test", &series, &market("0.97")).unwrap();

        assert_eq!(check.spot_points, 2);
        assert_eq!(check.spot_open, 118_000.0);
        assert_eq!(check.spot_close, 119_000.0);
        assert_eq!(check.spot_direction, Direction::Up);
        assert_eq!(check.market_direction, Direction::Up);
        assert!(check.agrees);
    }

    #[test]
    fn disagreement_is_reported() {
        let series = vec![
            spot("2025-07-28T16:00:00Z", 118_000.0),
            spot("2025-07-29T15:00:00Z", 117_000.0),
        ];
        let check = SpotCrossCheck::evaluate("test", &series, &market("0.80")).unwrap();

        assert_eq!(check.spot_direction, Direction::Down);
        assert_eq!(check.market_direction, Direction::Up);
        assert!(!check.agrees);
    }

    #[test]
    fn missing_data_yields_none() {
        assert!(SpotCrossCheck::evaluate("test", &[], &market("0.5")).is_none());

        let empty = WindowNormalizer::new()
            .normalize(&[], NaiveDate::from_ymd_opt(2025, 7, 29).unwrap())
            .unwrap();
        let series = vec![spot("2025-07-28T16:00:00Z", 118_000.0)];
        assert!(SpotCrossCheck::evaluate("test", &series, &empty).is_none());
    }
}
