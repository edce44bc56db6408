//! Coin wallet interfaces.
//!
//! Every supported coin implements [`WalletBase`] so the HTTP layer and the
//! activation pipeline can treat BTC, ETH and ERC20 tokens uniformly. The
//! [`WalletRegistry`] decides which of them a given brand exposes.

pub mod btc;
pub mod erc20;
pub mod eth;
pub mod registry;
pub mod units;

pub use btc::BtcWallet;
pub use erc20::Erc20Wallet;
pub use eth::EthWallet;
pub use registry::{WalletRegistry, WalletSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{
    error::{AppError, Result},
    models::User,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Coin {
    Btc,
    Eth,
    Token(String),
}

impl Coin {
    pub fn symbol(&self) -> &str {
        match self {
            Coin::Btc => "BTC",
            Coin::Eth => "ETH",
            Coin::Token(symbol) => symbol.as_str(),
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Coin {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let symbol = s.trim().to_ascii_uppercase();
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::UnsupportedCoin(s.to_string()));
        }
        Ok(match symbol.as_str() {
            "BTC" => Coin::Btc,
            "ETH" => Coin::Eth,
            _ => Coin::Token(symbol),
        })
    }
}

impl Serialize for Coin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for Coin {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The user-side identifiers a coin wallet needs.
#[derive(Debug, Clone, Default)]
pub struct WalletOwner {
    pub user_id: String,
    pub btc_wallet_id: Option<String>,
    pub eth_address: Option<String>,
}

impl From<&User> for WalletOwner {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            btc_wallet_id: user.btc_wallet_id.clone(),
            eth_address: user.eth_address.clone(),
        }
    }
}

impl WalletOwner {
    pub fn require_btc_wallet(&self) -> Result<&str> {
        self.btc_wallet_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("User has no BTC wallet".to_string()))
    }

    pub fn require_eth_address(&self) -> Result<&str> {
        self.eth_address
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("User has no ETH address".to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub coin: Coin,
    pub confirmed: Decimal,
    pub pending: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxOutput {
    pub address: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeEstimate {
    pub coin: Coin,
    /// Coin the fee is paid in; ERC20 transfers pay gas in ETH.
    pub fee_coin: Coin,
    pub fee: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormattedTransaction {
    pub id: String,
    pub coin: Coin,
    pub direction: TxDirection,
    pub amount: Decimal,
    pub fee: Option<Decimal>,
    pub counterparty: Option<String>,
    pub confirmations: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub link: String,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryPage {
    pub page: u32,
    pub limit: u32,
}

impl HistoryPage {
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }
}

/// Credential used to authorize a spend.
#[derive(Clone, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SpendAuth {
    /// Passphrase of a server-held bcoin wallet.
    Passphrase(String),
    /// Hex private key of an externally owned ETH account.
    PrivateKey(String),
}

impl fmt::Debug for SpendAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpendAuth::Passphrase(_) => f.write_str("SpendAuth::Passphrase(***)"),
            SpendAuth::PrivateKey(_) => f.write_str("SpendAuth::PrivateKey(***)"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub coin: Coin,
    pub tx_ids: Vec<String>,
    pub total_amount: Decimal,
    pub fee: Decimal,
}

/// Capability contract shared by every coin wallet.
#[async_trait]
pub trait WalletBase: Send + Sync {
    fn coin(&self) -> Coin;

    fn decimals(&self) -> u32;

    fn is_valid_address(&self, address: &str) -> bool;

    async fn receive_address(&self, owner: &WalletOwner) -> Result<String>;

    async fn get_balance(&self, owner: &WalletOwner) -> Result<Balance>;

    async fn get_transactions(
        &self,
        owner: &WalletOwner,
        page: HistoryPage,
    ) -> Result<Vec<FormattedTransaction>>;

    async fn estimate_fee(&self, owner: &WalletOwner, outputs: &[TxOutput]) -> Result<FeeEstimate>;

    async fn send(
        &self,
        owner: &WalletOwner,
        outputs: &[TxOutput],
        auth: &SpendAuth,
    ) -> Result<SendReceipt>;
}

/// Checks outputs before any fee estimate or broadcast and returns their sum.
pub fn validate_outputs(wallet: &dyn WalletBase, outputs: &[TxOutput]) -> Result<Decimal> {
    if outputs.is_empty() {
        return Err(AppError::BadRequest("At least one output is required".to_string()));
    }
    let mut total = Decimal::ZERO;
    for output in outputs {
        if !wallet.is_valid_address(&output.address) {
            return Err(AppError::InvalidAddress(format!(
                "{} is not a valid {} address",
                output.address,
                wallet.coin()
            )));
        }
        if output.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(format!(
                "Output amount must be positive, got {}",
                output.amount
            )));
        }
        if output.amount.round_dp(wallet.decimals()) != output.amount {
            return Err(AppError::BadRequest(format!(
                "{} supports at most {} decimals",
                wallet.coin(),
                wallet.decimals()
            )));
        }
        total += output.amount;
    }
    Ok(total)
}

/// Ensures `available` covers `required`, naming the coin in the error.
pub fn ensure_covers(coin: &Coin, available: Decimal, required: Decimal) -> Result<()> {
    if available < required {
        return Err(AppError::InsufficientBalance(format!(
            "need {} {} but only {} is spendable",
            required, coin, available
        )));
    }
    Ok(())
}

/// Error for a multi-output send that stopped part way; keeps what already went out.
pub fn interrupted_send(tx_ids: Vec<String>, err: AppError) -> AppError {
    if tx_ids.is_empty() {
        return err;
    }
    AppError::PartialSend {
        tx_ids,
        message: err.to_string(),
    }
}

pub(crate) fn is_evm_address(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn interrupted_send_reports_broadcast_outputs() {
        let err = interrupted_send(
            vec!["0x01".to_string()],
            AppError::BlockchainRPC("nonce too low".to_string()),
        );
        match err {
            AppError::PartialSend { tx_ids, message } => {
                assert_eq!(tx_ids, vec!["0x01".to_string()]);
                assert!(message.contains("nonce too low"));
            }
            other => panic!("unexpected error {:?}", other),
        }

        let untouched = interrupted_send(Vec::new(), AppError::BlockchainRPC("down".to_string()));
        assert!(matches!(untouched, AppError::BlockchainRPC(_)));
    }

    #[test]
    fn coin_parses_known_and_token_symbols() {
        assert_eq!(Coin::from_str("btc").unwrap(), Coin::Btc);
        assert_eq!(Coin::from_str(" ETH ").unwrap(), Coin::Eth);
        assert_eq!(Coin::from_str("gala").unwrap(), Coin::Token("GALA".to_string()));
        assert!(Coin::from_str("").is_err());
        assert!(Coin::from_str("../etc").is_err());
    }

    #[test]
    fn history_page_offset_is_one_based() {
        assert_eq!(HistoryPage { page: 1, limit: 25 }.offset(), 0);
        assert_eq!(HistoryPage { page: 3, limit: 10 }.offset(), 20);
        assert_eq!(HistoryPage { page: 0, limit: 10 }.offset(), 0);
    }

    #[test]
    fn spend_auth_debug_hides_secret() {
        let auth = SpendAuth::PrivateKey("deadbeef".to_string());
        assert!(!format!("{:?}", auth).contains("deadbeef"));
    }

    #[test]
    fn ensure_covers_reports_shortfall() {
        let err = ensure_covers(&Coin::Btc, Decimal::ONE, Decimal::TWO).unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance(_)));
        assert!(ensure_covers(&Coin::Btc, Decimal::TWO, Decimal::TWO).is_ok());
    }

    #[test]
    fn evm_address_check_requires_prefix_and_length() {
        assert!(is_evm_address("0x1111111111111111111111111111111111111111"));
        assert!(!is_evm_address("1111111111111111111111111111111111111111"));
        assert!(!is_evm_address("0x11"));
    }
}
