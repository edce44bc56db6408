use axum::{
    extract::State,
    http::{HeaderMap, HeaderName},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AppState;
use crate::{
    brand::Brand,
    config::Config,
    db::WalletConfigInput,
    error::{AppError, Result},
    models::{AffiliateLink, ApiResponse, RewardSpec, WalletConfig},
    services::reward_distributor::route,
    wallet::Coin,
};

const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Deserialize)]
pub struct WalletConfigRequest {
    pub brand: String,
    pub reward_type: String,
    pub pay_coin: String,
    pub activation_cost_usd: Decimal,
    pub referrer_reward_usd: Decimal,
    pub company_address: String,
    pub shares_per_activation: i32,
    pub shares_per_soft_node: i32,
    #[serde(default)]
    pub secondary_rewards: Vec<RewardSpec>,
    pub activation_email_template: Option<String>,
    pub referrer_email_template: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct GrantSoftNodesRequest {
    pub user_id: String,
    pub count: i32,
}

#[derive(Debug, Serialize)]
pub struct GrantSoftNodesResponse {
    pub user_id: String,
    pub soft_node_licenses: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateAffiliateLinkRequest {
    pub brand: String,
    pub label: Option<String>,
    pub target_url: String,
}

fn require_admin_key(headers: &HeaderMap, state: &AppState) -> Result<()> {
    let expected = state
        .config
        .admin_api_key
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest(
                "ADMIN_API_KEY is not configured on backend. Admin endpoints are disabled."
                    .to_string(),
            )
        })?;

    let header_name = HeaderName::from_static(ADMIN_KEY_HEADER);
    let provided = headers
        .get(&header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::AuthError(format!(
                "Missing admin key. Send header '{}' to access this endpoint.",
                ADMIN_KEY_HEADER
            ))
        })?;

    if provided != expected {
        return Err(AppError::AuthError("Invalid admin key".to_string()));
    }
    Ok(())
}

fn validate_wallet_config(config: &Config, req: WalletConfigRequest) -> Result<WalletConfigInput> {
    let brand = Brand::from_str(&req.brand)?;
    let pay_coin = Coin::from_str(&req.pay_coin)?;
    let reward_type = req.reward_type.trim().to_ascii_uppercase();
    if reward_type.is_empty() {
        return Err(AppError::BadRequest("reward_type is required".to_string()));
    }
    if req.activation_cost_usd <= Decimal::ZERO {
        return Err(AppError::BadRequest("activation_cost_usd must be positive".to_string()));
    }
    if req.referrer_reward_usd < Decimal::ZERO {
        return Err(AppError::BadRequest("referrer_reward_usd cannot be negative".to_string()));
    }
    if req.shares_per_activation < 0 || req.shares_per_soft_node < 0 {
        return Err(AppError::BadRequest("share counts cannot be negative".to_string()));
    }
    if req.company_address.trim().is_empty() {
        return Err(AppError::InvalidAddress("company_address is required".to_string()));
    }
    for reward in &req.secondary_rewards {
        if reward.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(format!(
                "Reward amount for {} must be positive",
                reward.currency
            )));
        }
        route(config, &reward.currency)?;
    }

    Ok(WalletConfigInput {
        brand: brand.as_str().to_string(),
        reward_type,
        pay_coin: pay_coin.symbol().to_string(),
        activation_cost_usd: req.activation_cost_usd,
        referrer_reward_usd: req.referrer_reward_usd,
        company_address: req.company_address.trim().to_string(),
        shares_per_activation: req.shares_per_activation,
        shares_per_soft_node: req.shares_per_soft_node,
        secondary_rewards: req.secondary_rewards,
        activation_email_template: req.activation_email_template,
        referrer_email_template: req.referrer_email_template,
        enabled: req.enabled.unwrap_or(true),
    })
}

/// PUT /api/v1/admin/wallet-config
pub async fn upsert_wallet_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WalletConfigRequest>,
) -> Result<Json<ApiResponse<WalletConfig>>> {
    require_admin_key(&headers, &state)?;
    let input = validate_wallet_config(&state.config, req)?;

    let brand = Brand::from_str(&input.brand)?;
    let coin = Coin::from_str(&input.pay_coin)?;
    let wallet = state.wallets.for_brand(brand).get(&coin)?;
    if !wallet.is_valid_address(&input.company_address) {
        return Err(AppError::InvalidAddress(format!(
            "{} is not a valid {} address",
            input.company_address, coin
        )));
    }

    let saved = state.db.upsert_wallet_config(&input).await?;
    tracing::info!(
        "Wallet config saved: brand={}, reward_type={}, pay_coin={}",
        saved.brand,
        saved.reward_type,
        saved.pay_coin
    );
    Ok(Json(ApiResponse::success(saved)))
}

/// POST /api/v1/admin/soft-nodes
pub async fn grant_soft_nodes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GrantSoftNodesRequest>,
) -> Result<Json<ApiResponse<GrantSoftNodesResponse>>> {
    require_admin_key(&headers, &state)?;
    if req.count <= 0 {
        return Err(AppError::BadRequest("count must be positive".to_string()));
    }
    let total = state
        .db
        .add_soft_node_licenses(&req.user_id, req.count)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!("Soft nodes granted: user={}, count={}, total={}", req.user_id, req.count, total);
    Ok(Json(ApiResponse::success(GrantSoftNodesResponse {
        user_id: req.user_id,
        soft_node_licenses: total,
    })))
}

/// POST /api/v1/admin/affiliate-links
pub async fn create_affiliate_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAffiliateLinkRequest>,
) -> Result<Json<ApiResponse<AffiliateLink>>> {
    require_admin_key(&headers, &state)?;
    let brand = Brand::from_str(&req.brand)?;
    let target = url::Url::parse(req.target_url.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid target_url: {}", e)))?;
    let link = state
        .share_links
        .create_affiliate_link(brand, req.label.as_deref(), target.as_str())
        .await?;
    Ok(Json(ApiResponse::success(link)))
}
