use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{Activation, ApiResponse, User},
    services::reward_distributor::ClaimSummary,
    wallet::is_evm_address,
};

use super::{require_user, AppState};

const MAX_DISPLAY_NAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct SyncProfileRequest {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub referral_code: Option<String>,
    pub affiliate_code: Option<String>,
    /// Creates the server-held BTC wallet on first sync.
    pub btc_passphrase: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetEthAddressRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
    pub activations: Vec<Activation>,
}

#[derive(Debug, Serialize)]
pub struct EthAddressResponse {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed: Option<ClaimSummary>,
}

/// bcoin wallet ids are restricted to a safe character set.
fn btc_wallet_id(user_id: &str) -> String {
    let cleaned: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    format!("user_{}", cleaned.to_ascii_lowercase())
}

fn normalize_display_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "display_name must be 1-{} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::BadRequest("Invalid email".to_string())),
    }
}

async fn load_profile(state: &AppState, user_id: &str) -> Result<ProfileResponse> {
    let user = state
        .db
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    let activations = state.db.list_activations(user_id).await?;
    Ok(ProfileResponse { user, activations })
}

/// POST /api/v1/profile/sync
pub async fn sync_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SyncProfileRequest>,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let user = require_user(&headers, &state).await?;

    let email = req.email.as_deref().map(normalize_email).transpose()?;
    let display_name = req
        .display_name
        .as_deref()
        .map(normalize_display_name)
        .transpose()?;
    state
        .db
        .update_profile(&user.id, email.as_deref(), display_name.as_deref())
        .await?;

    state
        .share_links
        .apply_codes(&user, req.referral_code.as_deref(), req.affiliate_code.as_deref())
        .await?;

    if user.btc_wallet_id.is_none() {
        if let Some(passphrase) = req.btc_passphrase.as_deref().filter(|p| !p.is_empty()) {
            let wallet_id = btc_wallet_id(&user.id);
            let info = state.bcoin.create_wallet(&wallet_id, passphrase).await?;
            state.db.set_btc_wallet_id(&user.id, &info.id).await?;
            tracing::info!("BTC wallet created: user={}, wallet={}", user.id, info.id);
        }
    }

    Ok(Json(ApiResponse::success(load_profile(&state, &user.id).await?)))
}

/// GET /api/v1/profile/me
pub async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let user = require_user(&headers, &state).await?;
    Ok(Json(ApiResponse::success(load_profile(&state, &user.id).await?)))
}

/// PUT /api/v1/profile/eth-address
pub async fn set_eth_address(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SetEthAddressRequest>,
) -> Result<Json<ApiResponse<EthAddressResponse>>> {
    let user = require_user(&headers, &state).await?;
    let address = req.address.trim().to_string();
    if !is_evm_address(&address) {
        return Err(AppError::InvalidAddress(format!(
            "{} is not an EVM address",
            address
        )));
    }
    state.db.set_eth_address(&user.id, &address).await?;

    let user = User {
        eth_address: Some(address.clone()),
        ..user
    };
    let user_id = user.id.clone();
    let claimed = match state.distributor.clone().claim_detached(user).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::warn!("Claim after address update failed for user={}: {}", user_id, e);
            None
        }
    };

    Ok(Json(ApiResponse::success(EthAddressResponse { address, claimed })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_wallet_id_strips_unsafe_characters() {
        assert_eq!(btc_wallet_id("Abc/12.3|x"), "user_abc123x");
        assert_eq!(btc_wallet_id("firebase-UID_9"), "user_firebase-uid_9");
    }

    #[test]
    fn display_name_is_trimmed_and_bounded() {
        assert_eq!(normalize_display_name("  Satoshi ").unwrap(), "Satoshi");
        assert!(normalize_display_name("   ").is_err());
        assert!(normalize_display_name(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn email_requires_domain() {
        assert_eq!(normalize_email(" A@B.io ").unwrap(), "a@b.io");
        assert!(normalize_email("nobody").is_err());
        assert!(normalize_email("a@localhost").is_err());
    }
}
