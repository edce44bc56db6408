use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    config::Config,
    constants::NODE_REQUEST_TIMEOUT_SECS,
    error::{AppError, Result},
};

/// HTTP client for a bcoin full node and its wallet server.
#[derive(Clone, Debug)]
pub struct BcoinClient {
    node_url: String,
    wallet_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BcoinBalance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BcoinAccount {
    receive_address: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BcoinFee {
    rate: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BcoinTxIo {
    #[serde(default)]
    pub value: i64,
    pub address: Option<String>,
    /// Present when the wallet owns the coin.
    pub path: Option<serde_json::Value>,
}

impl BcoinTxIo {
    pub fn is_own(&self) -> bool {
        self.path.as_ref().is_some_and(|p| !p.is_null())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BcoinTx {
    pub hash: String,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub confirmations: i64,
    /// Unix seconds of first sighting.
    pub mtime: Option<i64>,
    #[serde(default)]
    pub inputs: Vec<BcoinTxIo>,
    #[serde(default)]
    pub outputs: Vec<BcoinTxIo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BcoinOutput {
    pub value: u64,
    pub address: String,
}

#[derive(Debug, Serialize)]
struct BcoinCreateWallet<'a> {
    passphrase: &'a str,
    witness: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BcoinWalletInfo {
    pub id: String,
}

#[derive(Debug, Serialize)]
struct BcoinSendRequest<'a> {
    passphrase: &'a str,
    rate: u64,
    outputs: &'a [BcoinOutput],
}

impl BcoinClient {
    pub fn new(node_url: String, wallet_url: String, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(NODE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            node_url: node_url.trim_end_matches('/').to_string(),
            wallet_url: wallet_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.bcoin_node_url.clone(),
            config.bcoin_wallet_url.clone(),
            config.bcoin_api_key.clone(),
        )
    }

    /// Creates an encrypted segwit wallet under `wallet_id`.
    pub async fn create_wallet(&self, wallet_id: &str, passphrase: &str) -> Result<BcoinWalletInfo> {
        let url = format!("{}/wallet/{}", self.wallet_url, wallet_id);
        let mut req = self.client.put(&url).json(&BcoinCreateWallet {
            passphrase,
            witness: true,
        });
        if let Some(key) = &self.api_key {
            req = req.basic_auth("x", Some(key));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AppError::BlockchainRPC(format!("bcoin create wallet failed: {}", e)))?;
        Self::decode(resp).await
    }

    pub async fn balance(&self, wallet_id: &str) -> Result<BcoinBalance> {
        let url = format!("{}/wallet/{}/balance", self.wallet_url, wallet_id);
        self.get_json(&url).await
    }

    pub async fn receive_address(&self, wallet_id: &str) -> Result<String> {
        let url = format!("{}/wallet/{}/account/default", self.wallet_url, wallet_id);
        let account: BcoinAccount = self.get_json(&url).await?;
        Ok(account.receive_address)
    }

    pub async fn history(&self, wallet_id: &str) -> Result<Vec<BcoinTx>> {
        let url = format!("{}/wallet/{}/tx/history", self.wallet_url, wallet_id);
        self.get_json(&url).await
    }

    /// Smart fee estimate in satoshis per kB for confirmation within `blocks`.
    pub async fn fee_rate(&self, blocks: u32) -> Result<u64> {
        let url = format!("{}/fee?blocks={}", self.node_url, blocks);
        let fee: BcoinFee = self.get_json(&url).await?;
        Ok(fee.rate)
    }

    pub async fn send(
        &self,
        wallet_id: &str,
        passphrase: &str,
        rate: u64,
        outputs: &[BcoinOutput],
    ) -> Result<BcoinTx> {
        let url = format!("{}/wallet/{}/send", self.wallet_url, wallet_id);
        let mut req = self.client.post(&url).json(&BcoinSendRequest {
            passphrase,
            rate,
            outputs,
        });
        if let Some(key) = &self.api_key {
            req = req.basic_auth("x", Some(key));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AppError::BlockchainRPC(format!("bcoin send failed: {}", e)))?;
        Self::decode(resp).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let mut req = self.client.get(url);
        if let Some(key) = &self.api_key {
            req = req.basic_auth("x", Some(key));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AppError::BlockchainRPC(format!("bcoin request failed: {}", e)))?;
        Self::decode(resp).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound("bcoin wallet not found".to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::BlockchainRPC(format!(
                "bcoin returned {}: {}",
                status, body
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| AppError::BlockchainRPC(format!("Invalid bcoin response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_io_ownership_follows_path() {
        let own: BcoinTxIo = serde_json::from_value(serde_json::json!({
            "value": 5000,
            "address": "bc1qown",
            "path": { "name": "default", "account": 0 }
        }))
        .unwrap();
        let foreign: BcoinTxIo = serde_json::from_value(serde_json::json!({
            "value": 5000,
            "address": "bc1qother",
            "path": null
        }))
        .unwrap();
        assert!(own.is_own());
        assert!(!foreign.is_own());
    }

    #[test]
    fn new_trims_trailing_slashes() {
        let client = BcoinClient::new(
            "http://node:8332/".to_string(),
            "http://wallet:8334//".to_string(),
            None,
        )
        .unwrap();
        assert_eq!(client.node_url, "http://node:8332");
        assert_eq!(client.wallet_url, "http://wallet:8334");
    }
}
