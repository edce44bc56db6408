use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    models::ApiResponse,
    services::share_activate::{ActivationQuote, ActivationReceipt, ShareStats},
    wallet::SpendAuth,
};

use super::{request_host, require_user, AppState};

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub reward_type: String,
    pub auth: SpendAuth,
}

#[derive(Debug, Serialize)]
pub struct ShareLinkResponse {
    pub referral_code: String,
    pub url: String,
    pub long_url: String,
}

/// GET /api/v1/share/config/{reward_type}
pub async fn get_quote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reward_type): Path<String>,
) -> Result<Json<ApiResponse<ActivationQuote>>> {
    let quote = state
        .share_activate
        .quote(&request_host(&headers), &reward_type)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// GET /api/v1/share/stats/{reward_type}
pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reward_type): Path<String>,
) -> Result<Json<ApiResponse<ShareStats>>> {
    let user = require_user(&headers, &state).await?;
    let stats = state
        .share_activate
        .share_stats(&user, &request_host(&headers), &reward_type)
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// POST /api/v1/share/activate
pub async fn activate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<ApiResponse<ActivationReceipt>>> {
    let user = require_user(&headers, &state).await?;
    let receipt = state
        .share_activate
        .clone()
        .activate_detached(
            user,
            request_host(&headers),
            req.reward_type.trim().to_string(),
            req.auth,
        )
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}

/// GET /api/v1/share/link
pub async fn get_link(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ShareLinkResponse>>> {
    let user = require_user(&headers, &state).await?;
    let link = state
        .share_links
        .share_link(&user, &request_host(&headers))
        .await?;
    Ok(Json(ApiResponse::success(ShareLinkResponse {
        referral_code: user.referral_code,
        url: link.short_url.unwrap_or_else(|| link.target_url.clone()),
        long_url: link.target_url,
    })))
}
