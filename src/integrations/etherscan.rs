use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::{
    constants::EXTERNAL_API_TIMEOUT_SECS,
    error::{AppError, Result},
};

/// Client for Etherscan-compatible account history APIs.
#[derive(Clone, Debug)]
pub struct EtherscanClient {
    api_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtherscanTx {
    pub hash: String,
    pub time_stamp: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub value: String,
    #[serde(default)]
    pub gas_price: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub confirmations: String,
    #[serde(default)]
    pub is_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EtherscanEnvelope {
    status: String,
    message: String,
    result: serde_json::Value,
}

impl EtherscanClient {
    pub fn new(api_url: String, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(EXTERNAL_API_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_url,
            api_key,
            client,
        })
    }

    /// Normal ETH transactions of `address`, newest first.
    pub async fn transactions(&self, address: &str, page: u32, limit: u32) -> Result<Vec<EtherscanTx>> {
        self.account_query("txlist", address, None, page, limit).await
    }

    /// ERC20 transfers of `contract` involving `address`, newest first.
    pub async fn token_transfers(
        &self,
        address: &str,
        contract: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<EtherscanTx>> {
        self.account_query("tokentx", address, Some(contract), page, limit)
            .await
    }

    fn build_url(
        &self,
        action: &str,
        address: &str,
        contract: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| AppError::Internal(format!("Invalid ETHERSCAN_API_URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("module", "account")
                .append_pair("action", action)
                .append_pair("address", address)
                .append_pair("page", &page.max(1).to_string())
                .append_pair("offset", &limit.to_string())
                .append_pair("sort", "desc");
            if let Some(contract) = contract {
                query.append_pair("contractaddress", contract);
            }
            if let Some(key) = &self.api_key {
                query.append_pair("apikey", key);
            }
        }
        Ok(url)
    }

    async fn account_query(
        &self,
        action: &str,
        address: &str,
        contract: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<Vec<EtherscanTx>> {
        let url = self.build_url(action, address, contract, page, limit)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Etherscan request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(AppError::ExternalAPI(format!(
                "Etherscan returned {}",
                resp.status()
            )));
        }
        let envelope: EtherscanEnvelope = resp
            .json()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Invalid Etherscan response: {}", e)))?;
        parse_envelope(envelope)
    }
}

fn parse_envelope(envelope: EtherscanEnvelope) -> Result<Vec<EtherscanTx>> {
    if envelope.status != "1" {
        // Empty history is reported as status 0.
        if envelope.message.starts_with("No transactions found") {
            return Ok(Vec::new());
        }
        return Err(AppError::ExternalAPI(format!(
            "Etherscan error: {} ({})",
            envelope.message, envelope.result
        )));
    }
    serde_json::from_value(envelope.result)
        .map_err(|e| AppError::ExternalAPI(format!("Invalid Etherscan result: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_includes_contract_and_key() {
        let client = EtherscanClient::new(
            "https://api.etherscan.io/api".to_string(),
            Some("KEY".to_string()),
        )
        .unwrap();
        let url = client
            .build_url("tokentx", "0xabc", Some("0xdef"), 2, 10)
            .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("action=tokentx"));
        assert!(query.contains("contractaddress=0xdef"));
        assert!(query.contains("page=2"));
        assert!(query.contains("offset=10"));
        assert!(query.contains("apikey=KEY"));
    }

    #[test]
    fn empty_history_is_not_an_error() {
        let envelope = EtherscanEnvelope {
            status: "0".to_string(),
            message: "No transactions found".to_string(),
            result: serde_json::json!([]),
        };
        assert!(parse_envelope(envelope).unwrap().is_empty());
    }

    #[test]
    fn rate_limit_is_reported() {
        let envelope = EtherscanEnvelope {
            status: "0".to_string(),
            message: "NOTOK".to_string(),
            result: serde_json::json!("Max rate limit reached"),
        };
        assert!(matches!(parse_envelope(envelope), Err(AppError::ExternalAPI(_))));
    }
}
