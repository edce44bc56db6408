// src/models/mod.rs
pub mod user;

pub use user::{
    Activation,
    AffiliateLink,
    ApiResponse,
    LedgerBalance,
    RewardSpec,
    UnclaimedReward,
    User,
    WalletConfig,
    ACTIVATION_ACTIVATED,
    ACTIVATION_PARTIAL,
    ACTIVATION_PENDING,
};
