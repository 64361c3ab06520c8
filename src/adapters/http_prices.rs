//! REST price source
//!
//! `GET {base}/prices/{instrument}` for the latest price, with `?at=<rfc3339>`
//! for a historical one. Every failure comes back as `PriceUnavailable`.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{MarketData, PriceTime, PriceUnavailable};
use crate::error::{QuorumError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Base URL of the price service; unset means no live prices
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Deserialize)]
struct PriceBody {
    price: Decimal,
}

pub struct HttpPriceFeed {
    http: Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("quorum-price-client/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| QuorumError::Internal(format!("failed to build price HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn price_url(&self, instrument: &str) -> String {
        format!("{}/prices/{}", self.base_url, instrument)
    }
}

#[async_trait]
impl MarketData for HttpPriceFeed {
    async fn price_at(
        &self,
        instrument: &str,
        at: PriceTime,
    ) -> std::result::Result<Decimal, PriceUnavailable> {
        let unavailable = |reason: String| PriceUnavailable {
            instrument: instrument.to_string(),
            reason,
        };

        let mut req = self.http.get(self.price_url(instrument));
        if let PriceTime::At(ts) = at {
            req = req.query(&[("at", ts.to_rfc3339())]);
        }

        let resp = req.send().await.map_err(|e| unavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status)));
        }
        let body: PriceBody = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("bad price body: {}", e)))?;
        if body.price <= Decimal::ZERO {
            return Err(unavailable(format!("non-positive price {}", body.price)));
        }
        Ok(body.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_url_trims_slash() {
        let feed = HttpPriceFeed::new("http://prices.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(feed.price_url("AAPL"), "http://prices.local/prices/AAPL");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable_not_zero() {
        let feed = HttpPriceFeed::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = feed.price_at("AAPL", PriceTime::Now).await.unwrap_err();
        assert_eq!(err.instrument, "AAPL");
    }
}
