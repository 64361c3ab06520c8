use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{MarketData, PriceTime, PriceUnavailable};

/// Last-known price table, fed by whatever ingestion the deployment runs.
///
/// Historical lookups are answered with the latest price.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceFeed {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl StaticPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, instrument: &str, price: Decimal) {
        self.prices
            .write()
            .await
            .insert(instrument.to_string(), price);
    }

    pub async fn clear(&self, instrument: &str) {
        self.prices.write().await.remove(instrument);
    }
}

#[async_trait]
impl MarketData for StaticPriceFeed {
    async fn price_at(
        &self,
        instrument: &str,
        _at: PriceTime,
    ) -> std::result::Result<Decimal, PriceUnavailable> {
        match self.prices.read().await.get(instrument) {
            Some(p) if *p > Decimal::ZERO => Ok(*p),
            Some(p) => Err(PriceUnavailable {
                instrument: instrument.to_string(),
                reason: format!("non-positive price {}", p),
            }),
            None => Err(PriceUnavailable {
                instrument: instrument.to_string(),
                reason: "no price recorded".to_string(),
            }),
        }
    }
}
