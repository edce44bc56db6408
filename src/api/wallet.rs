use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    brand::Brand,
    error::Result,
    models::ApiResponse,
    utils::ensure_page_limit,
    wallet::{
        Balance, Coin, FeeEstimate, FormattedTransaction, HistoryPage, SendReceipt, SpendAuth,
        TxOutput, WalletBase, WalletOwner,
    },
};

use super::{request_host, require_user, AppState};

#[derive(Debug, Serialize)]
pub struct CoinsResponse {
    pub brand: Brand,
    pub coins: Vec<Coin>,
}

#[derive(Debug, Serialize)]
pub struct ReceiveAddressResponse {
    pub coin: Coin,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EstimateFeeRequest {
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub outputs: Vec<TxOutput>,
    pub auth: SpendAuth,
}

fn wallet_for(state: &AppState, headers: &HeaderMap, coin: &str) -> Result<Arc<dyn WalletBase>> {
    let coin = Coin::from_str(coin)?;
    state.wallets.for_origin(&request_host(headers)).get(&coin)
}

/// GET /api/v1/wallet/coins
pub async fn get_coins(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<CoinsResponse>>> {
    let set = state.wallets.for_origin(&request_host(&headers));
    Ok(Json(ApiResponse::success(CoinsResponse {
        brand: set.brand,
        coins: set.coins(),
    })))
}

/// GET /api/v1/wallet/{coin}/address
pub async fn get_receive_address(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(coin): Path<String>,
) -> Result<Json<ApiResponse<ReceiveAddressResponse>>> {
    let user = require_user(&headers, &state).await?;
    let wallet = wallet_for(&state, &headers, &coin)?;
    let address = wallet.receive_address(&WalletOwner::from(&user)).await?;
    Ok(Json(ApiResponse::success(ReceiveAddressResponse {
        coin: wallet.coin(),
        address,
    })))
}

/// GET /api/v1/wallet/{coin}/balance
pub async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(coin): Path<String>,
) -> Result<Json<ApiResponse<Balance>>> {
    let user = require_user(&headers, &state).await?;
    let wallet = wallet_for(&state, &headers, &coin)?;
    let balance = wallet.get_balance(&WalletOwner::from(&user)).await?;
    Ok(Json(ApiResponse::success(balance)))
}

/// GET /api/v1/wallet/{coin}/transactions
pub async fn get_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(coin): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<FormattedTransaction>>>> {
    let user = require_user(&headers, &state).await?;
    let wallet = wallet_for(&state, &headers, &coin)?;
    let page = HistoryPage {
        page: query.page.unwrap_or(1).max(1),
        limit: ensure_page_limit(query.limit)?,
    };
    let history = wallet
        .get_transactions(&WalletOwner::from(&user), page)
        .await?;
    Ok(Json(ApiResponse::success(history)))
}

/// POST /api/v1/wallet/{coin}/estimate-fee
pub async fn estimate_fee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(coin): Path<String>,
    Json(req): Json<EstimateFeeRequest>,
) -> Result<Json<ApiResponse<FeeEstimate>>> {
    let user = require_user(&headers, &state).await?;
    let wallet = wallet_for(&state, &headers, &coin)?;
    let estimate = wallet
        .estimate_fee(&WalletOwner::from(&user), &req.outputs)
        .await?;
    Ok(Json(ApiResponse::success(estimate)))
}

/// POST /api/v1/wallet/{coin}/send
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(coin): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<Json<ApiResponse<SendReceipt>>> {
    let user = require_user(&headers, &state).await?;
    let wallet = wallet_for(&state, &headers, &coin)?;
    tracing::info!(
        "Send requested: user={}, coin={}, outputs={}",
        user.id,
        wallet.coin(),
        req.outputs.len()
    );
    let receipt = wallet
        .send(&WalletOwner::from(&user), &req.outputs, &req.auth)
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}
