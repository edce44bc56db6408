use axum::{extract::State, http::HeaderMap, Json};

use crate::{
    error::Result,
    models::{ApiResponse, LedgerBalance, UnclaimedReward},
    services::reward_distributor::ClaimSummary,
};

use super::{require_user, AppState};

/// GET /api/v1/rewards/unclaimed
pub async fn get_unclaimed(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<UnclaimedReward>>>> {
    let user = require_user(&headers, &state).await?;
    let rewards = state.db.list_unclaimed_rewards(&user.id).await?;
    Ok(Json(ApiResponse::success(rewards)))
}

/// POST /api/v1/rewards/claim
pub async fn claim(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ClaimSummary>>> {
    let user = require_user(&headers, &state).await?;
    let summary = state.distributor.clone().claim_detached(user).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// GET /api/v1/rewards/ledger
pub async fn get_ledger(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<LedgerBalance>>>> {
    let user = require_user(&headers, &state).await?;
    let balances = state.db.ledger_balances(&user.id).await?;
    Ok(Json(ApiResponse::success(balances)))
}
