use ethers::{
    middleware::{NonceManagerMiddleware, SignerMiddleware},
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, BlockId, BlockNumber, TransactionRequest, U256},
};
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    config::Config,
    error::{AppError, Result},
};

/// Signing client: nonces are tracked locally so back-to-back sends do not collide.
pub type SignerClient = NonceManagerMiddleware<SignerMiddleware<Arc<Provider<Http>>, LocalWallet>>;

ethers::contract::abigen!(
    Erc20,
    r#"[
        function balanceOf(address) view returns (uint256)
        function decimals() view returns (uint8)
        function transfer(address to, uint256 amount) returns (bool)
    ]"#
);

/// Read access to the Ethereum node.
#[derive(Clone, Debug)]
pub struct OnchainReader {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl OnchainReader {
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.ethereum_rpc_url.as_str())
            .map_err(|e| AppError::Internal(format!("Invalid RPC URL: {}", e)))?;
        Ok(Self {
            provider: Arc::new(provider),
            chain_id: config.ethereum_chain_id,
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    pub async fn gas_price(&self) -> Result<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| AppError::BlockchainRPC(e.to_string()))
    }

    pub async fn balance(&self, address: Address, pending: bool) -> Result<U256> {
        let block = if pending {
            BlockNumber::Pending
        } else {
            BlockNumber::Latest
        };
        self.provider
            .get_balance(address, Some(BlockId::Number(block)))
            .await
            .map_err(|e| AppError::BlockchainRPC(e.to_string()))
    }

    /// Builds a signing client for `private_key` on the configured chain.
    pub fn signer(&self, private_key: &str) -> Result<Arc<SignerClient>> {
        let wallet = parse_wallet(private_key)?.with_chain_id(self.chain_id);
        let address = wallet.address();
        let signer = SignerMiddleware::new(self.provider.clone(), wallet);
        Ok(Arc::new(NonceManagerMiddleware::new(signer, address)))
    }
}

/// Broadcasts a plain value transfer and returns its hash without waiting for inclusion.
pub async fn send_value(client: &SignerClient, to: Address, value: U256) -> Result<String> {
    let tx = TransactionRequest::new().to(to).value(value);
    let pending = client
        .send_transaction(tx, None)
        .await
        .map_err(|e| AppError::BlockchainRPC(e.to_string()))?;
    Ok(format!("{:#x}", pending.tx_hash()))
}

pub fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value.trim())
        .map_err(|_| AppError::InvalidAddress(format!("{} is not an EVM address", value)))
}

pub fn parse_wallet(private_key: &str) -> Result<LocalWallet> {
    let trimmed = private_key.trim();
    let key = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    LocalWallet::from_str(key).map_err(|_| AppError::AuthError("Invalid private key".to_string()))
}

/// Verifies that a spending key controls the expected address.
pub fn ensure_key_matches(private_key: &str, expected: &str) -> Result<()> {
    let wallet = parse_wallet(private_key)?;
    let expected = parse_address(expected)?;
    if wallet.address() != expected {
        return Err(AppError::AuthError(
            "Private key does not match the wallet address".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hardhat's first development account.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn parse_wallet_accepts_prefixed_and_bare_keys() {
        assert!(parse_wallet(DEV_KEY).is_ok());
        assert!(parse_wallet(&DEV_KEY[2..]).is_ok());
        assert!(parse_wallet("not-a-key").is_err());
    }

    #[test]
    fn ensure_key_matches_compares_derived_address() {
        assert!(ensure_key_matches(DEV_KEY, DEV_ADDRESS).is_ok());
        let err = ensure_key_matches(DEV_KEY, "0x1111111111111111111111111111111111111111").unwrap_err();
        assert!(matches!(err, AppError::AuthError(_)));
    }

    #[test]
    fn parse_address_rejects_garbage() {
        assert!(parse_address(DEV_ADDRESS).is_ok());
        assert!(matches!(parse_address("0x12"), Err(AppError::InvalidAddress(_))));
    }
}
