use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;

use crate::{
    constants::{
        BTC_DECIMALS, BTC_DEFAULT_FEE_RATE, BTC_ESTIMATED_INPUTS, BTC_FEE_TARGET_BLOCKS,
        BTC_INPUT_SIZE, BTC_MIN_FEE_RATE, BTC_OUTPUT_SIZE, BTC_TX_OVERHEAD,
    },
    error::{AppError, Result},
    integrations::bcoin::{BcoinClient, BcoinOutput, BcoinTx},
};

use super::{
    ensure_covers,
    units::{btc_to_sats, sats_to_btc},
    validate_outputs, Balance, Coin, FeeEstimate, FormattedTransaction, HistoryPage, SendReceipt,
    SpendAuth, TxDirection, TxOutput, WalletBase, WalletOwner,
};

/// Bitcoin wallet backed by per-user bcoin wallets.
pub struct BtcWallet {
    client: BcoinClient,
    explorer_url: String,
    testnet: bool,
}

impl BtcWallet {
    pub fn new(client: BcoinClient, explorer_url: String, testnet: bool) -> Self {
        Self {
            client,
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
            testnet,
        }
    }

    async fn current_fee_rate(&self) -> u64 {
        match self.client.fee_rate(BTC_FEE_TARGET_BLOCKS).await {
            Ok(rate) => effective_fee_rate(rate),
            Err(e) => {
                tracing::warn!("bcoin fee estimate unavailable, using default rate: {}", e);
                BTC_DEFAULT_FEE_RATE
            }
        }
    }
}

/// Applies the relay floor; zero means the node had no estimate.
pub fn effective_fee_rate(node_rate: u64) -> u64 {
    if node_rate == 0 {
        return BTC_DEFAULT_FEE_RATE;
    }
    node_rate.max(BTC_MIN_FEE_RATE)
}

/// Estimated virtual size of a spend with `outputs` recipients plus change.
pub fn estimate_tx_size(inputs: u64, outputs: u64) -> u64 {
    inputs * BTC_INPUT_SIZE + (outputs + 1) * BTC_OUTPUT_SIZE + BTC_TX_OVERHEAD
}

/// Fee in satoshis for `size` bytes at `rate_per_kb`, rounded up.
pub fn fee_for_size(rate_per_kb: u64, size: u64) -> u64 {
    (rate_per_kb * size).div_ceil(1000)
}

pub fn looks_like_btc_address(value: &str, testnet: bool) -> bool {
    let normalized = value.trim();
    if normalized.len() < 26 || normalized.len() > 90 {
        return false;
    }
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    let lower = normalized.to_ascii_lowercase();
    if testnet {
        lower.starts_with("tb1")
            || lower.starts_with("bcrt1")
            || normalized.starts_with('m')
            || normalized.starts_with('n')
            || normalized.starts_with('2')
    } else {
        lower.starts_with("bc1") || normalized.starts_with('1') || normalized.starts_with('3')
    }
}

/// Reduces a bcoin wallet transaction to the wallet-relative view shown to users.
pub fn format_bcoin_tx(tx: &BcoinTx, explorer_url: &str) -> FormattedTransaction {
    let spent_own_coins = tx.inputs.iter().any(|input| input.is_own());

    let (direction, value, counterparty) = if spent_own_coins {
        let external: Vec<_> = tx.outputs.iter().filter(|o| !o.is_own()).collect();
        let value: i64 = external.iter().map(|o| o.value).sum();
        let counterparty = external.first().and_then(|o| o.address.clone());
        (TxDirection::Sent, value, counterparty)
    } else {
        let value: i64 = tx.outputs.iter().filter(|o| o.is_own()).map(|o| o.value).sum();
        let counterparty = tx.inputs.iter().find_map(|i| i.address.clone());
        (TxDirection::Received, value, counterparty)
    };

    FormattedTransaction {
        id: tx.hash.clone(),
        coin: Coin::Btc,
        direction,
        amount: sats_to_btc(value),
        fee: match direction {
            TxDirection::Sent => Some(sats_to_btc(tx.fee)),
            TxDirection::Received => None,
        },
        counterparty,
        confirmations: tx.confirmations.max(0) as u64,
        timestamp: tx.mtime.and_then(|secs| DateTime::from_timestamp(secs, 0)),
        link: format!("{}/{}", explorer_url, tx.hash),
    }
}

#[async_trait]
impl WalletBase for BtcWallet {
    fn coin(&self) -> Coin {
        Coin::Btc
    }

    fn decimals(&self) -> u32 {
        BTC_DECIMALS
    }

    fn is_valid_address(&self, address: &str) -> bool {
        looks_like_btc_address(address, self.testnet)
    }

    async fn receive_address(&self, owner: &WalletOwner) -> Result<String> {
        let wallet_id = owner.require_btc_wallet()?;
        self.client.receive_address(wallet_id).await
    }

    async fn get_balance(&self, owner: &WalletOwner) -> Result<Balance> {
        let wallet_id = owner.require_btc_wallet()?;
        let balance = self.client.balance(wallet_id).await?;
        Ok(Balance {
            coin: Coin::Btc,
            confirmed: sats_to_btc(balance.confirmed),
            pending: sats_to_btc(balance.unconfirmed - balance.confirmed),
        })
    }

    async fn get_transactions(
        &self,
        owner: &WalletOwner,
        page: HistoryPage,
    ) -> Result<Vec<FormattedTransaction>> {
        let wallet_id = owner.require_btc_wallet()?;
        let mut history = self.client.history(wallet_id).await?;
        history.sort_by(|a, b| b.mtime.cmp(&a.mtime));

        Ok(history
            .iter()
            .skip(page.offset())
            .take(page.limit as usize)
            .map(|tx| format_bcoin_tx(tx, &self.explorer_url))
            .collect())
    }

    async fn estimate_fee(&self, _owner: &WalletOwner, outputs: &[TxOutput]) -> Result<FeeEstimate> {
        let total = validate_outputs(self, outputs)?;
        let rate = self.current_fee_rate().await;
        let size = estimate_tx_size(BTC_ESTIMATED_INPUTS, outputs.len() as u64);
        let fee_sats = fee_for_size(rate, size);

        Ok(FeeEstimate {
            coin: Coin::Btc,
            fee_coin: Coin::Btc,
            fee: sats_to_btc(fee_sats as i64),
            total_amount: total,
        })
    }

    async fn send(
        &self,
        owner: &WalletOwner,
        outputs: &[TxOutput],
        auth: &SpendAuth,
    ) -> Result<SendReceipt> {
        let SpendAuth::Passphrase(passphrase) = auth else {
            return Err(AppError::BadRequest(
                "BTC spends require the wallet passphrase".to_string(),
            ));
        };
        let wallet_id = owner.require_btc_wallet()?;
        let total = validate_outputs(self, outputs)?;

        let rate = self.current_fee_rate().await;
        let fee_sats = fee_for_size(rate, estimate_tx_size(BTC_ESTIMATED_INPUTS, outputs.len() as u64));
        let balance = self.client.balance(wallet_id).await?;
        ensure_covers(
            &Coin::Btc,
            sats_to_btc(balance.confirmed),
            total + sats_to_btc(fee_sats as i64),
        )?;

        let bcoin_outputs = outputs
            .iter()
            .map(|output| {
                Ok(BcoinOutput {
                    value: btc_to_sats(output.amount)?,
                    address: output.address.trim().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let tx = self
            .client
            .send(wallet_id, passphrase, rate, &bcoin_outputs)
            .await?;

        tracing::info!(
            "BTC sent: user={}, tx={}, outputs={}, total={}",
            owner.user_id,
            tx.hash,
            bcoin_outputs.len(),
            total
        );

        Ok(SendReceipt {
            coin: Coin::Btc,
            tx_ids: vec![tx.hash],
            total_amount: total,
            fee: sats_to_btc(tx.fee),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn tx_from(value: serde_json::Value) -> BcoinTx {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn fee_uses_size_estimate_and_rounds_up() {
        // 2 inputs, 1 recipient + change
        assert_eq!(estimate_tx_size(2, 1), 2 * 148 + 2 * 34 + 10);
        assert_eq!(fee_for_size(1_000, 374), 374);
        assert_eq!(fee_for_size(1_500, 3), 5);
    }

    #[test]
    fn effective_fee_rate_applies_floor_and_default() {
        assert_eq!(effective_fee_rate(0), BTC_DEFAULT_FEE_RATE);
        assert_eq!(effective_fee_rate(10), BTC_MIN_FEE_RATE);
        assert_eq!(effective_fee_rate(50_000), 50_000);
    }

    #[test]
    fn address_check_is_network_aware() {
        assert!(looks_like_btc_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", false));
        assert!(!looks_like_btc_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", true));
        assert!(looks_like_btc_address("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx", true));
        assert!(!looks_like_btc_address("0x1111111111111111111111111111111111111111", false));
        assert!(!looks_like_btc_address("1short", false));
    }

    #[test]
    fn format_sent_tx_excludes_change() {
        let tx = tx_from(serde_json::json!({
            "hash": "abc",
            "fee": 2260,
            "confirmations": 3,
            "mtime": 1_700_000_000,
            "inputs": [{ "value": 100_000, "address": "bc1qmine", "path": { "account": 0 } }],
            "outputs": [
                { "value": 60_000, "address": "bc1qfriend", "path": null },
                { "value": 37_740, "address": "bc1qchange", "path": { "account": 0, "change": true } }
            ]
        }));
        let formatted = format_bcoin_tx(&tx, "https://mempool.space/tx");
        assert_eq!(formatted.direction, TxDirection::Sent);
        assert_eq!(formatted.amount, Decimal::from_str("0.0006").unwrap());
        assert_eq!(formatted.fee, Some(Decimal::from_str("0.0000226").unwrap()));
        assert_eq!(formatted.counterparty.as_deref(), Some("bc1qfriend"));
        assert_eq!(formatted.confirmations, 3);
        assert_eq!(formatted.link, "https://mempool.space/tx/abc");
    }

    #[test]
    fn format_received_tx_sums_own_outputs() {
        let tx = tx_from(serde_json::json!({
            "hash": "def",
            "fee": 1000,
            "confirmations": 0,
            "inputs": [{ "value": 500_000, "address": "bc1qsender", "path": null }],
            "outputs": [
                { "value": 250_000, "address": "bc1qmine", "path": { "account": 0 } },
                { "value": 249_000, "address": "bc1qsenderchange", "path": null }
            ]
        }));
        let formatted = format_bcoin_tx(&tx, "https://mempool.space/tx");
        assert_eq!(formatted.direction, TxDirection::Received);
        assert_eq!(formatted.amount, Decimal::from_str("0.0025").unwrap());
        assert_eq!(formatted.fee, None);
        assert_eq!(formatted.counterparty.as_deref(), Some("bc1qsender"));
        assert!(formatted.timestamp.is_none());
    }
}
