pub mod bcoin;
pub mod bitly;
pub mod coingecko;
pub mod etherscan;
pub mod sendgrid;

pub use bcoin::BcoinClient;
pub use bitly::BitlyClient;
pub use coingecko::CoinGeckoClient;
pub use etherscan::EtherscanClient;
pub use sendgrid::SendGridClient;
