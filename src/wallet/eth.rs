use async_trait::async_trait;
use chrono::DateTime;
use ethers::types::U256;
use rust_decimal::Decimal;

use crate::{
    constants::{ETH_DECIMALS, ETH_TRANSFER_GAS_LIMIT},
    error::{AppError, Result},
    integrations::etherscan::{EtherscanClient, EtherscanTx},
    services::onchain::{ensure_key_matches, parse_address, send_value, OnchainReader},
};

use super::{
    ensure_covers, interrupted_send, is_evm_address,
    units::{eth_to_wei, from_base_units, wei_to_eth},
    validate_outputs, Balance, Coin, FeeEstimate, FormattedTransaction, HistoryPage, SendReceipt,
    SpendAuth, TxDirection, TxOutput, WalletBase, WalletOwner,
};

/// Native ether wallet. Keys stay with the user; spends are signed per request.
pub struct EthWallet {
    reader: OnchainReader,
    etherscan: EtherscanClient,
    explorer_url: String,
}

impl EthWallet {
    pub fn new(reader: OnchainReader, etherscan: EtherscanClient, explorer_url: String) -> Self {
        Self {
            reader,
            etherscan,
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
        }
    }

    /// Gas cost in wei for `transfers` transactions of `gas_limit` each.
    pub async fn gas_cost(&self, gas_limit: u64, transfers: usize) -> Result<U256> {
        let gas_price = self.reader.gas_price().await?;
        Ok(gas_cost_wei(gas_price, gas_limit, transfers))
    }
}

pub fn gas_cost_wei(gas_price: U256, gas_limit: u64, transfers: usize) -> U256 {
    gas_price * U256::from(gas_limit) * U256::from(transfers)
}

/// Formats an explorer row from the point of view of `owner_address`.
pub(crate) fn format_etherscan_tx(
    tx: &EtherscanTx,
    owner_address: &str,
    coin: Coin,
    decimals: u32,
    explorer_url: &str,
) -> Result<FormattedTransaction> {
    let sent = tx.from.eq_ignore_ascii_case(owner_address);
    let raw_value = U256::from_dec_str(&tx.value)
        .map_err(|e| AppError::ExternalAPI(format!("Invalid tx value {}: {}", tx.value, e)))?;

    let fee = if sent {
        let gas_price = U256::from_dec_str(&tx.gas_price).unwrap_or_default();
        let gas_used = U256::from_dec_str(&tx.gas_used).unwrap_or_default();
        Some(wei_to_eth(gas_price * gas_used)?)
    } else {
        None
    };

    Ok(FormattedTransaction {
        id: tx.hash.clone(),
        coin,
        direction: if sent {
            TxDirection::Sent
        } else {
            TxDirection::Received
        },
        amount: from_base_units(raw_value, decimals)?,
        fee,
        counterparty: Some(if sent { tx.to.clone() } else { tx.from.clone() }),
        confirmations: tx.confirmations.parse().unwrap_or(0),
        timestamp: tx
            .time_stamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        link: format!("{}/{}", explorer_url, tx.hash),
    })
}

#[async_trait]
impl WalletBase for EthWallet {
    fn coin(&self) -> Coin {
        Coin::Eth
    }

    fn decimals(&self) -> u32 {
        ETH_DECIMALS
    }

    fn is_valid_address(&self, address: &str) -> bool {
        is_evm_address(address)
    }

    async fn receive_address(&self, owner: &WalletOwner) -> Result<String> {
        Ok(owner.require_eth_address()?.to_string())
    }

    async fn get_balance(&self, owner: &WalletOwner) -> Result<Balance> {
        let address = parse_address(owner.require_eth_address()?)?;
        let (latest, pending) = tokio::try_join!(
            self.reader.balance(address, false),
            self.reader.balance(address, true)
        )?;
        let confirmed = wei_to_eth(latest)?;
        Ok(Balance {
            coin: Coin::Eth,
            confirmed,
            pending: wei_to_eth(pending)? - confirmed,
        })
    }

    async fn get_transactions(
        &self,
        owner: &WalletOwner,
        page: HistoryPage,
    ) -> Result<Vec<FormattedTransaction>> {
        let address = owner.require_eth_address()?;
        let rows = self
            .etherscan
            .transactions(address, page.page, page.limit)
            .await?;
        rows.iter()
            .filter(|tx| tx.is_error.as_deref() != Some("1"))
            .map(|tx| format_etherscan_tx(tx, address, Coin::Eth, ETH_DECIMALS, &self.explorer_url))
            .collect()
    }

    async fn estimate_fee(&self, _owner: &WalletOwner, outputs: &[TxOutput]) -> Result<FeeEstimate> {
        let total = validate_outputs(self, outputs)?;
        let fee = self.gas_cost(ETH_TRANSFER_GAS_LIMIT, outputs.len()).await?;
        Ok(FeeEstimate {
            coin: Coin::Eth,
            fee_coin: Coin::Eth,
            fee: wei_to_eth(fee)?,
            total_amount: total,
        })
    }

    async fn send(
        &self,
        owner: &WalletOwner,
        outputs: &[TxOutput],
        auth: &SpendAuth,
    ) -> Result<SendReceipt> {
        let SpendAuth::PrivateKey(private_key) = auth else {
            return Err(AppError::BadRequest(
                "ETH spends require the account private key".to_string(),
            ));
        };
        let from = owner.require_eth_address()?;
        ensure_key_matches(private_key, from)?;
        let total = validate_outputs(self, outputs)?;

        let fee = wei_to_eth(self.gas_cost(ETH_TRANSFER_GAS_LIMIT, outputs.len()).await?)?;
        let balance = wei_to_eth(self.reader.balance(parse_address(from)?, false).await?)?;
        ensure_covers(&Coin::Eth, balance, total + fee)?;

        let transfers = outputs
            .iter()
            .map(|output| Ok((parse_address(&output.address)?, eth_to_wei(output.amount)?)))
            .collect::<Result<Vec<_>>>()?;

        let client = self.reader.signer(private_key)?;
        let mut tx_ids = Vec::with_capacity(transfers.len());
        for (to, value) in transfers {
            match send_value(&client, to, value).await {
                Ok(hash) => tx_ids.push(hash),
                Err(e) => {
                    tracing::error!(
                        "ETH send interrupted for {} after {:?}: {}",
                        owner.user_id,
                        tx_ids,
                        e
                    );
                    return Err(interrupted_send(tx_ids, e));
                }
            }
        }

        tracing::info!("ETH sent: user={}, txs={:?}, total={}", owner.user_id, tx_ids, total);

        Ok(SendReceipt {
            coin: Coin::Eth,
            tx_ids,
            total_amount: total,
            fee,
        })
    }
}
