use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::{
    config::Config,
    error::{AppError, Result},
    integrations::CoinGeckoClient,
};

/// USD quotes for pay coins.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn usd_price(&self, symbol: &str) -> Result<Decimal>;
}

/// CoinGecko prices behind a short-lived Redis cache.
#[derive(Clone)]
pub struct PriceService {
    redis: ConnectionManager,
    coingecko: CoinGeckoClient,
    config: Config,
}

fn cache_key(symbol: &str) -> String {
    format!("price:usd:{}", symbol.to_ascii_uppercase())
}

impl PriceService {
    pub fn new(redis: ConnectionManager, config: Config) -> Result<Self> {
        let coingecko = CoinGeckoClient::new(config.coingecko_api_url.clone())?;
        Ok(Self {
            redis,
            coingecko,
            config,
        })
    }

    async fn cached(&self, key: &str) -> Option<Decimal> {
        let mut conn = self.redis.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => Decimal::from_str(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!("Price cache read skipped key={} err={}", key, err);
                None
            }
        }
    }

    async fn store(&self, key: &str, price: Decimal) {
        let mut conn = self.redis.clone();
        let result: std::result::Result<(), redis::RedisError> = conn
            .set_ex(key, price.to_string(), self.config.price_cache_ttl_secs)
            .await;
        if let Err(err) = result {
            tracing::warn!("Price cache write failed key={} err={}", key, err);
        }
    }
}

#[async_trait]
impl PriceSource for PriceService {
    async fn usd_price(&self, symbol: &str) -> Result<Decimal> {
        let key = cache_key(symbol);
        if let Some(price) = self.cached(&key).await {
            return Ok(price);
        }

        let id = self.config.price_id_for(symbol).ok_or_else(|| {
            AppError::BadRequest(format!("No price source configured for {}", symbol))
        })?;
        let price = self.coingecko.usd_price(&id).await?;
        tracing::debug!("Fetched {} price: {} USD", symbol, price);
        self.store(&key, price).await;
        Ok(price)
    }
}
