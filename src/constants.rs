/// Application constants

// Coin precision
pub const BTC_DECIMALS: u32 = 8;
pub const ETH_DECIMALS: u32 = 18;

// Bitcoin fee estimation (sizes in bytes, rates in satoshis per kB)
pub const BTC_INPUT_SIZE: u64 = 148;
pub const BTC_OUTPUT_SIZE: u64 = 34;
pub const BTC_TX_OVERHEAD: u64 = 10;
pub const BTC_MIN_FEE_RATE: u64 = 1_000;
pub const BTC_DEFAULT_FEE_RATE: u64 = 20_000;
pub const BTC_FEE_TARGET_BLOCKS: u32 = 2;
pub const BTC_ESTIMATED_INPUTS: u64 = 2;

// Ethereum gas limits
pub const ETH_TRANSFER_GAS_LIMIT: u64 = 21_000;
pub const ERC20_TRANSFER_GAS_LIMIT: u64 = 65_000;

// Transaction history paging
pub const HISTORY_DEFAULT_LIMIT: u32 = 25;
pub const HISTORY_MAX_LIMIT: u32 = 100;

// Rewards
pub const GAME_ITEM_PREFIX: &str = "ITEM:";
pub const ACTIVATION_REWARD_REASON: &str = "share_activation";

// Referral codes
pub const REFERRAL_CODE_BYTES: usize = 4;

// API version
pub const API_VERSION: &str = "v1";

// Background service intervals
pub const UNCLAIMED_REWARD_RETRY_INTERVAL_SECS: u64 = 300;
pub const UNCLAIMED_REWARD_RETRY_BATCH: i64 = 50;
pub const UNCLAIMED_REWARD_BACKOFF_SECS: i64 = 300;
pub const UNCLAIMED_REWARD_MAX_BACKOFF_SECS: i64 = 86_400;

// Leases on rows reserved by an in-flight activation or claim
pub const ACTIVATION_SLOT_LEASE_SECS: i64 = 900;
pub const UNCLAIMED_REWARD_LEASE_SECS: i64 = 600;

// External request timeouts
pub const NODE_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const EXTERNAL_API_TIMEOUT_SECS: u64 = 10;
