// src/api/mod.rs

pub mod admin;
pub mod auth;
pub mod health;
pub mod profile;
pub mod rewards;
pub mod share;
pub mod wallet;

use axum::http::{
    header::{AUTHORIZATION, HOST, ORIGIN},
    HeaderMap,
};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::{
    brand::Brand,
    config::Config,
    db::Database,
    error::{AppError, Result},
    integrations::BcoinClient,
    models::User,
    services::{share_link::generate_referral_code, RewardDistributor, ShareActivate, ShareLinkService},
    utils::normalize_host,
    wallet::WalletRegistry,
};

const FORWARDED_HOST: &str = "x-forwarded-host";

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub redis: ConnectionManager,
    pub config: Config,
    pub wallets: Arc<WalletRegistry>,
    pub bcoin: BcoinClient,
    pub share_activate: Arc<ShareActivate>,
    pub distributor: Arc<RewardDistributor>,
    pub share_links: Arc<ShareLinkService>,
}

/// Hostname the request was made from: Origin first, then the proxied or direct Host.
pub fn request_host(headers: &HeaderMap) -> String {
    [ORIGIN.as_str(), FORWARDED_HOST, HOST.as_str()]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(normalize_host)
        .find(|host| !host.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::AuthError("Missing Authorization header".to_string()))?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::AuthError("Invalid Authorization header".to_string()))?;
    auth_str
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::AuthError("Invalid Authorization scheme".to_string()))
}

/// Authenticates the caller, creating the user record on first sight.
pub async fn require_user(headers: &HeaderMap, state: &AppState) -> Result<User> {
    let token = bearer_token(headers)?;
    let user_id = auth::extract_user_from_token(token, &state.config.jwt_secret)?;

    if state.db.get_user(&user_id).await?.is_none() {
        let brand = Brand::from_host(&request_host(headers));
        state
            .db
            .create_user(&user_id, brand.as_str(), &generate_referral_code(), None)
            .await?;
        tracing::info!("User created: id={}, brand={}", user_id, brand);
    }
    state.db.update_last_active(&user_id).await?;

    state
        .db
        .get_user(&user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}
