//! Daily Bitcoin up-or-down market addressing

use chrono::{Datelike, NaiveDate};

pub const POLYMARKET_URL: &str = "https://polymarket.com";

/// Event slug for the market settling on `target_date`,
/// e.g. `bitcoin-up-or-down-on-july-29`
pub fn market_slug(target_date: NaiveDate) -> String {
    format!(
        "bitcoin-up-or-down-on-{}-{}",
        target_date.format("%B").to_string().to_lowercase(),
        target_date.day()
    )
}

/// Event page URL for the market settling on `target_date`
pub fn event_url(base_url: &str, target_date: NaiveDate) -> String {
    format!(
        "{}/event/{}",
        base_url.trim_end_matches('/'),
        market_slug(target_date)
    )
}
