use async_trait::async_trait;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;

use crate::{
    config::Erc20TokenConfig,
    constants::{ERC20_TRANSFER_GAS_LIMIT, ETH_DECIMALS},
    error::{AppError, Result},
    integrations::etherscan::EtherscanClient,
    services::onchain::{ensure_key_matches, parse_address, Erc20, OnchainReader},
};

use super::{
    ensure_covers,
    eth::{format_etherscan_tx, gas_cost_wei},
    interrupted_send, is_evm_address,
    units::{from_base_units, to_base_units, wei_to_eth},
    validate_outputs, Balance, Coin, FeeEstimate, FormattedTransaction, HistoryPage, SendReceipt,
    SpendAuth, TxOutput, WalletBase, WalletOwner,
};

/// ERC20 token wallet; gas is paid from the owner's ETH balance.
pub struct Erc20Wallet {
    token: Erc20TokenConfig,
    contract_address: Address,
    reader: OnchainReader,
    etherscan: EtherscanClient,
    explorer_url: String,
}

impl Erc20Wallet {
    pub fn new(
        token: Erc20TokenConfig,
        reader: OnchainReader,
        etherscan: EtherscanClient,
        explorer_url: String,
    ) -> Result<Self> {
        let contract_address = parse_address(&token.address)?;
        Ok(Self {
            token,
            contract_address,
            reader,
            etherscan,
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
        })
    }

    async fn token_balance(&self, owner: Address) -> Result<U256> {
        let contract = Erc20::new(self.contract_address, self.reader.provider());
        contract
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| AppError::BlockchainRPC(e.to_string()))
    }

    /// Gas estimate for one transfer; falls back to a fixed limit when the node cannot simulate it.
    async fn transfer_gas(&self, from: Address, to: Address, amount: U256) -> u64 {
        let contract = Erc20::new(self.contract_address, self.reader.provider());
        match contract.transfer(to, amount).from(from).estimate_gas().await {
            Ok(gas) if gas <= U256::from(u64::MAX) => gas.as_u64(),
            Ok(_) => ERC20_TRANSFER_GAS_LIMIT,
            Err(e) => {
                tracing::debug!("{} transfer gas estimate failed: {}", self.token.symbol, e);
                ERC20_TRANSFER_GAS_LIMIT
            }
        }
    }

    async fn fee_for(&self, owner: &WalletOwner, outputs: &[TxOutput]) -> Result<Decimal> {
        let gas_price = self.reader.gas_price().await?;
        let from = owner
            .eth_address
            .as_deref()
            .and_then(|addr| parse_address(addr).ok())
            .unwrap_or_default();

        let mut total_gas = U256::zero();
        for output in outputs {
            let to = parse_address(&output.address)?;
            let amount = to_base_units(output.amount, self.token.decimals)?;
            total_gas += gas_cost_wei(gas_price, self.transfer_gas(from, to, amount).await, 1);
        }
        wei_to_eth(total_gas)
    }
}

#[async_trait]
impl WalletBase for Erc20Wallet {
    fn coin(&self) -> Coin {
        Coin::Token(self.token.symbol.clone())
    }

    fn decimals(&self) -> u32 {
        self.token.decimals
    }

    fn is_valid_address(&self, address: &str) -> bool {
        is_evm_address(address)
    }

    async fn receive_address(&self, owner: &WalletOwner) -> Result<String> {
        Ok(owner.require_eth_address()?.to_string())
    }

    async fn get_balance(&self, owner: &WalletOwner) -> Result<Balance> {
        let address = parse_address(owner.require_eth_address()?)?;
        let raw = self.token_balance(address).await?;
        Ok(Balance {
            coin: self.coin(),
            confirmed: from_base_units(raw, self.token.decimals)?,
            pending: Decimal::ZERO,
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
            .token_transfers(address, &self.token.address, page.page, page.limit)
            .await?;
        rows.iter()
            .map(|tx| {
                format_etherscan_tx(
                    tx,
                    address,
                    self.coin(),
                    self.token.decimals,
                    &self.explorer_url,
                )
            })
            .collect()
    }

    async fn estimate_fee(&self, owner: &WalletOwner, outputs: &[TxOutput]) -> Result<FeeEstimate> {
        let total = validate_outputs(self, outputs)?;
        let fee = self.fee_for(owner, outputs).await?;
        Ok(FeeEstimate {
            coin: self.coin(),
            fee_coin: Coin::Eth,
            fee,
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
            return Err(AppError::BadRequest(format!(
                "{} spends require the account private key",
                self.token.symbol
            )));
        };
        let from = owner.require_eth_address()?;
        ensure_key_matches(private_key, from)?;
        let total = validate_outputs(self, outputs)?;
        let from_address = parse_address(from)?;

        let token_balance = from_base_units(self.token_balance(from_address).await?, self.token.decimals)?;
        ensure_covers(&self.coin(), token_balance, total)?;

        let fee = self.fee_for(owner, outputs).await?;
        let eth_balance = from_base_units(self.reader.balance(from_address, false).await?, ETH_DECIMALS)?;
        ensure_covers(&Coin::Eth, eth_balance, fee)?;

        let transfers = outputs
            .iter()
            .map(|output| {
                Ok((
                    parse_address(&output.address)?,
                    to_base_units(output.amount, self.token.decimals)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let client = self.reader.signer(private_key)?;
        let contract = Erc20::new(self.contract_address, client);
        let mut tx_ids = Vec::with_capacity(transfers.len());
        for (to, amount) in transfers {
            let call = contract.transfer(to, amount);
            match call.send().await {
                Ok(pending) => tx_ids.push(format!("{:#x}", pending.tx_hash())),
                Err(e) => {
                    tracing::error!(
                        "{} send interrupted for {} after {:?}: {}",
                        self.token.symbol,
                        owner.user_id,
                        tx_ids,
                        e
                    );
                    return Err(interrupted_send(
                        tx_ids,
                        AppError::BlockchainRPC(e.to_string()),
                    ));
                }
            };
        }

        tracing::info!(
            "{} sent: user={}, txs={:?}, total={}",
            self.token.symbol,
            owner.user_id,
            tx_ids,
            total
        );

        Ok(SendReceipt {
            coin: self.coin(),
            tx_ids,
            total_amount: total,
            fee,
        })
    }
}
