use serde::Deserialize;
use std::collections::HashMap;
use std::env;

/// ERC20 contract known to the backend, keyed by symbol.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Erc20TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis
    pub redis_url: String,

    // Bitcoin (bcoin node + wallet HTTP servers)
    pub bcoin_node_url: String,
    pub bcoin_wallet_url: String,
    pub bcoin_api_key: Option<String>,
    pub btc_explorer_url: String,

    // Ethereum
    pub ethereum_rpc_url: String,
    pub ethereum_chain_id: u64,
    pub etherscan_api_url: String,
    pub etherscan_api_key: Option<String>,
    pub eth_explorer_url: String,
    pub erc20_tokens: HashMap<String, Erc20TokenConfig>,

    // Reward distribution
    pub reward_distributor_private_key: Option<String>,
    pub game_items_contract_address: Option<String>,
    pub ledger_currencies: Vec<String>,

    // Auth
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub admin_api_key: Option<String>,

    // External APIs
    pub sendgrid_api_key: Option<String>,
    pub email_from: String,
    pub bitly_access_token: Option<String>,
    pub coingecko_api_url: String,
    pub price_ids: HashMap<String, String>,
    pub price_cache_ttl_secs: u64,

    // CORS
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            bcoin_node_url: env::var("BCOIN_NODE_URL")
                .unwrap_or_else(|_| "http://localhost:8332".to_string()),
            bcoin_wallet_url: env::var("BCOIN_WALLET_URL")
                .unwrap_or_else(|_| "http://localhost:8334".to_string()),
            bcoin_api_key: env::var("BCOIN_API_KEY").ok(),
            btc_explorer_url: env::var("BTC_EXPLORER_URL")
                .unwrap_or_else(|_| "https://mempool.space/tx".to_string()),

            ethereum_rpc_url: env::var("ETHEREUM_RPC_URL")?,
            ethereum_chain_id: env::var("ETHEREUM_CHAIN_ID")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            etherscan_api_url: env::var("ETHERSCAN_API_URL")
                .unwrap_or_else(|_| "https://api.etherscan.io/api".to_string()),
            etherscan_api_key: env::var("ETHERSCAN_API_KEY").ok(),
            eth_explorer_url: env::var("ETH_EXPLORER_URL")
                .unwrap_or_else(|_| "https://etherscan.io/tx".to_string()),
            erc20_tokens: parse_erc20_tokens(&env::var("ERC20_TOKENS").unwrap_or_default())?,

            reward_distributor_private_key: env::var("REWARD_DISTRIBUTOR_PRIVATE_KEY").ok(),
            game_items_contract_address: env::var("GAME_ITEMS_CONTRACT_ADDRESS").ok(),
            ledger_currencies: env::var("LEDGER_CURRENCIES")
                .unwrap_or_else(|_| "POINTS".to_string())
                .split(',')
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),

            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            admin_api_key: env::var("ADMIN_API_KEY").ok(),

            sendgrid_api_key: env::var("SENDGRID_API_KEY").ok(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "no-reply@wallet.local".to_string()),
            bitly_access_token: env::var("BITLY_ACCESS_TOKEN").ok(),
            coingecko_api_url: env::var("COINGECKO_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            price_ids: parse_price_ids(&env::var("PRICE_IDS").unwrap_or_default()),
            price_cache_ttl_secs: env::var("PRICE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL is empty");
        }
        if self.ethereum_rpc_url.trim().is_empty() {
            anyhow::bail!("ETHEREUM_RPC_URL is empty");
        }
        if self.jwt_secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET is empty");
        }

        if self.bcoin_api_key.is_none() {
            tracing::warn!("BCOIN_API_KEY not set; bcoin requests are unauthenticated");
        }
        if self.reward_distributor_private_key.is_none() {
            tracing::warn!("REWARD_DISTRIBUTOR_PRIVATE_KEY not set; on-chain rewards stay unclaimed");
        }
        if self.sendgrid_api_key.is_none() {
            tracing::warn!("SENDGRID_API_KEY not set; emails are skipped");
        }
        if self.jwt_secret.contains("super_secret") {
            tracing::warn!("Detected dev credentials in config");
        }
        for token in self.erc20_tokens.values() {
            if token.address.starts_with("0x0000") {
                tracing::warn!("Using placeholder {} token address", token.symbol);
            }
        }
        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }

        Ok(())
    }

    pub fn is_testnet(&self) -> bool {
        if self.environment == "development" || self.environment == "testnet" {
            return true;
        }
        self.ethereum_chain_id != 1
    }

    /// CoinGecko id for a coin symbol; BTC and ETH are always known.
    pub fn price_id_for(&self, symbol: &str) -> Option<String> {
        let symbol = symbol.to_ascii_uppercase();
        if let Some(id) = self.price_ids.get(&symbol) {
            return Some(id.clone());
        }
        match symbol.as_str() {
            "BTC" => Some("bitcoin".to_string()),
            "ETH" => Some("ethereum".to_string()),
            _ => None,
        }
    }
}

/// Parses `SYMBOL=0xaddress:decimals` entries separated by commas.
pub fn parse_erc20_tokens(raw: &str) -> anyhow::Result<HashMap<String, Erc20TokenConfig>> {
    let mut tokens = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (symbol, rest) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid ERC20_TOKENS entry: {}", entry))?;
        let (address, decimals) = rest
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Missing decimals in ERC20_TOKENS entry: {}", entry))?;
        let symbol = symbol.trim().to_ascii_uppercase();
        tokens.insert(
            symbol.clone(),
            Erc20TokenConfig {
                symbol,
                address: address.trim().to_string(),
                decimals: decimals.trim().parse()?,
            },
        );
    }
    Ok(tokens)
}

fn parse_price_ids(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| entry.split_once('='))
        .map(|(symbol, id)| (symbol.trim().to_ascii_uppercase(), id.trim().to_string()))
        .filter(|(symbol, id)| !symbol.is_empty() && !id.is_empty())
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        host: "0.0.0.0".to_string(),
        port: 4000,
        environment: "development".to_string(),
        database_url: "postgres://localhost/wallet".to_string(),
        database_max_connections: 1,
        redis_url: "redis://localhost:6379".to_string(),
        bcoin_node_url: "http://localhost:8332".to_string(),
        bcoin_wallet_url: "http://localhost:8334".to_string(),
        bcoin_api_key: None,
        btc_explorer_url: "https://mempool.space/tx".to_string(),
        ethereum_rpc_url: "http://localhost:8545".to_string(),
        ethereum_chain_id: 5,
        etherscan_api_url: "https://api-goerli.etherscan.io/api".to_string(),
        etherscan_api_key: None,
        eth_explorer_url: "https://goerli.etherscan.io/tx".to_string(),
        erc20_tokens: parse_erc20_tokens(
            "GREEN=0x1111111111111111111111111111111111111111:8,GALA=0x2222222222222222222222222222222222222222:8",
        )
        .unwrap(),
        reward_distributor_private_key: None,
        game_items_contract_address: Some("0x3333333333333333333333333333333333333333".to_string()),
        ledger_currencies: vec!["POINTS".to_string()],
        jwt_secret: "test_secret".to_string(),
        jwt_expiry_hours: 24,
        admin_api_key: Some("admin".to_string()),
        sendgrid_api_key: None,
        email_from: "no-reply@wallet.local".to_string(),
        bitly_access_token: None,
        coingecko_api_url: "https://api.coingecko.com/api/v3".to_string(),
        price_ids: parse_price_ids("GALA=gala"),
        price_cache_ttl_secs: 60,
        cors_allowed_origins: "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_erc20_tokens_reads_symbol_address_and_decimals() {
        let tokens = parse_erc20_tokens(" gala=0xabc:8 , GREEN=0xdef:18").unwrap();
        assert_eq!(tokens.len(), 2);
        let gala = &tokens["GALA"];
        assert_eq!(gala.address, "0xabc");
        assert_eq!(gala.decimals, 8);
        assert_eq!(tokens["GREEN"].decimals, 18);
    }

    #[test]
    fn parse_erc20_tokens_rejects_missing_decimals() {
        assert!(parse_erc20_tokens("GALA=0xabc").is_err());
    }

    #[test]
    fn price_id_falls_back_to_builtin_coins() {
        let config = test_config();
        assert_eq!(config.price_id_for("btc").as_deref(), Some("bitcoin"));
        assert_eq!(config.price_id_for("GALA").as_deref(), Some("gala"));
        assert_eq!(config.price_id_for("GREEN"), None);
    }
}
