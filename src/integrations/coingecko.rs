use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::{
    constants::EXTERNAL_API_TIMEOUT_SECS,
    error::{AppError, Result},
};

#[derive(Clone, Debug)]
pub struct CoinGeckoClient {
    api_url: String,
    client: Client,
}

type SimplePrice = HashMap<String, HashMap<String, Decimal>>;

impl CoinGeckoClient {
    pub fn new(api_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(EXTERNAL_API_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// USD price of one CoinGecko id.
    pub async fn usd_price(&self, id: &str) -> Result<Decimal> {
        let url = self.simple_price_url(id)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("CoinGecko request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(AppError::ExternalAPI(format!(
                "CoinGecko returned {}",
                resp.status()
            )));
        }
        let body: SimplePrice = resp
            .json()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Invalid CoinGecko response: {}", e)))?;
        extract_usd(&body, id)
    }

    fn simple_price_url(&self, id: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/simple/price", self.api_url))
            .map_err(|e| AppError::Internal(format!("Invalid CoinGecko URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("ids", id)
            .append_pair("vs_currencies", "usd");
        Ok(url)
    }
}

fn extract_usd(body: &SimplePrice, id: &str) -> Result<Decimal> {
    let price = body
        .get(id)
        .and_then(|quotes| quotes.get("usd"))
        .copied()
        .ok_or_else(|| AppError::ExternalAPI(format!("No USD price for {}", id)))?;
    if price <= Decimal::ZERO {
        return Err(AppError::ExternalAPI(format!("Non-positive USD price for {}", id)));
    }
    Ok(price)
}
