use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    brand::Brand,
    config::Config,
    error::{AppError, Result},
    integrations::{bcoin::BcoinClient, etherscan::EtherscanClient},
    services::onchain::OnchainReader,
};

use super::{BtcWallet, Coin, Erc20Wallet, EthWallet, WalletBase};

/// Composition root for coin wallets: one shared instance per coin,
/// handed out per request according to the brand behind the request origin.
pub struct WalletRegistry {
    wallets: HashMap<Coin, Arc<dyn WalletBase>>,
}

/// Coin wallets available to one brand.
#[derive(Clone)]
pub struct WalletSet {
    pub brand: Brand,
    wallets: Vec<Arc<dyn WalletBase>>,
}

impl WalletRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let reader = OnchainReader::from_config(config)?;
        let etherscan = EtherscanClient::new(
            config.etherscan_api_url.clone(),
            config.etherscan_api_key.clone(),
        )?;

        let mut wallets: HashMap<Coin, Arc<dyn WalletBase>> = HashMap::new();
        wallets.insert(
            Coin::Btc,
            Arc::new(BtcWallet::new(
                BcoinClient::from_config(config)?,
                config.btc_explorer_url.clone(),
                config.is_testnet(),
            )),
        );
        wallets.insert(
            Coin::Eth,
            Arc::new(EthWallet::new(
                reader.clone(),
                etherscan.clone(),
                config.eth_explorer_url.clone(),
            )),
        );
        for token in config.erc20_tokens.values() {
            let wallet = Erc20Wallet::new(
                token.clone(),
                reader.clone(),
                etherscan.clone(),
                config.eth_explorer_url.clone(),
            )?;
            wallets.insert(Coin::Token(token.symbol.clone()), Arc::new(wallet));
        }

        Ok(Self::from_wallets(wallets))
    }

    pub fn from_wallets(wallets: HashMap<Coin, Arc<dyn WalletBase>>) -> Self {
        Self { wallets }
    }

    /// Coins a brand exposes, in display order, limited to configured wallets.
    pub fn coins_for(&self, brand: Brand) -> Vec<Coin> {
        let mut coins = vec![Coin::Btc, Coin::Eth];
        coins.extend(
            brand
                .token_symbols()
                .iter()
                .map(|symbol| Coin::Token(symbol.to_string())),
        );
        coins
            .into_iter()
            .filter(|coin| {
                let known = self.wallets.contains_key(coin);
                if !known {
                    tracing::warn!("{} wallet is not configured for brand {}", coin, brand);
                }
                known
            })
            .collect()
    }

    pub fn for_brand(&self, brand: Brand) -> WalletSet {
        let wallets = self
            .coins_for(brand)
            .iter()
            .filter_map(|coin| self.wallets.get(coin).cloned())
            .collect();
        WalletSet { brand, wallets }
    }

    /// Maps a request origin (hostname) to the brand's wallet set.
    pub fn for_origin(&self, host: &str) -> WalletSet {
        self.for_brand(Brand::from_host(host))
    }
}

impl WalletSet {
    pub fn coins(&self) -> Vec<Coin> {
        self.wallets.iter().map(|wallet| wallet.coin()).collect()
    }

    pub fn get(&self, coin: &Coin) -> Result<Arc<dyn WalletBase>> {
        self.wallets
            .iter()
            .find(|wallet| &wallet.coin() == coin)
            .cloned()
            .ok_or_else(|| {
                AppError::UnsupportedCoin(format!("{} (brand {})", coin, self.brand))
            })
    }
}
