// All service modules
pub mod email_service;
pub mod onchain;
pub mod price_service;
pub mod reward_distributor;
pub mod share_activate;
pub mod share_link;

// Re-export for convenience
pub use email_service::EmailService;
pub use price_service::{PriceService, PriceSource};
pub use reward_distributor::RewardDistributor;
pub use share_activate::ShareActivate;
pub use share_link::ShareLinkService;

use std::sync::Arc;

use crate::utils::env_flag;

/// Start all background services
pub async fn start_background_services(distributor: Arc<RewardDistributor>) {
    tracing::info!("Starting background services...");

    if env_flag("ENABLE_REWARD_RETRY", true) {
        distributor.start().await;
    } else {
        tracing::warn!("Unclaimed reward retry disabled via ENABLE_REWARD_RETRY");
    }

    tracing::info!("All background services started successfully");
}
