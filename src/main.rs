use axum::http::HeaderValue;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod brand;
mod config;
mod constants;
mod db;
mod error;
mod integrations;
mod models;
mod services;
mod utils;
mod wallet;

use config::Config;
use constants::API_VERSION;
use db::Database;
use integrations::{BcoinClient, BitlyClient};
use services::{EmailService, PriceService, RewardDistributor, ShareActivate, ShareLinkService};
use wallet::WalletRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wallet_rewards_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // reqwest and redis both build TLS clients on top of rustls
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Starting wallet rewards backend");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("API Version: {}", API_VERSION);

    // Initialize database
    let db = Database::new(&config).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db.run_migrations().await?;

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    let redis_manager = redis::aio::ConnectionManager::new(redis).await?;

    // Wallets and reward pipeline
    let wallets = Arc::new(WalletRegistry::from_config(&config)?);
    let distributor = Arc::new(RewardDistributor::new(db.clone(), config.clone())?);
    let prices = Arc::new(PriceService::new(redis_manager.clone(), config.clone())?);
    let share_activate = Arc::new(ShareActivate::new(
        db.clone(),
        wallets.clone(),
        prices,
        distributor.clone(),
        EmailService::new(&config)?,
    ));
    let share_links = Arc::new(ShareLinkService::new(
        db.clone(),
        BitlyClient::new(config.bitly_access_token.clone())?,
    ));

    let app_state = api::AppState {
        db: db.clone(),
        redis: redis_manager,
        config: config.clone(),
        wallets,
        bcoin: BcoinClient::from_config(&config)?,
        share_activate,
        distributor: distributor.clone(),
        share_links,
    };

    // Build router
    let app = build_router(app_state);

    // Start background services
    tokio::spawn(services::start_background_services(distributor));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: api::AppState) -> Router {
    // CORS configuration
    let cors = cors_from_config(&state.config);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        // Authentication & profile
        .route("/api/v1/auth/refresh", post(api::auth::refresh_token))
        .route("/api/v1/profile/sync", post(api::profile::sync_profile))
        .route("/api/v1/profile/me", get(api::profile::get_profile))
        .route(
            "/api/v1/profile/eth-address",
            put(api::profile::set_eth_address),
        )
        // Wallet
        .route("/api/v1/wallet/coins", get(api::wallet::get_coins))
        .route(
            "/api/v1/wallet/{coin}/address",
            get(api::wallet::get_receive_address),
        )
        .route(
            "/api/v1/wallet/{coin}/balance",
            get(api::wallet::get_balance),
        )
        .route(
            "/api/v1/wallet/{coin}/transactions",
            get(api::wallet::get_transactions),
        )
        .route(
            "/api/v1/wallet/{coin}/estimate-fee",
            post(api::wallet::estimate_fee),
        )
        .route("/api/v1/wallet/{coin}/send", post(api::wallet::send))
        // Share activation
        .route(
            "/api/v1/share/config/{reward_type}",
            get(api::share::get_quote),
        )
        .route(
            "/api/v1/share/stats/{reward_type}",
            get(api::share::get_stats),
        )
        .route("/api/v1/share/activate", post(api::share::activate))
        .route("/api/v1/share/link", get(api::share::get_link))
        // Rewards
        .route(
            "/api/v1/rewards/unclaimed",
            get(api::rewards::get_unclaimed),
        )
        .route("/api/v1/rewards/claim", post(api::rewards::claim))
        .route("/api/v1/rewards/ledger", get(api::rewards::get_ledger))
        // Admin
        .route(
            "/api/v1/admin/wallet-config",
            put(api::admin::upsert_wallet_config),
        )
        .route(
            "/api/v1/admin/soft-nodes",
            post(api::admin::grant_soft_nodes),
        )
        .route(
            "/api/v1/admin/affiliate-links",
            post(api::admin::create_affiliate_link),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_from_config(config: &Config) -> CorsLayer {
    let raw = config.cors_allowed_origins.trim();
    if raw.is_empty() || raw == "*" {
        return CorsLayer::very_permissive();
    }

    let allowed: Vec<HeaderValue> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if allowed.is_empty() {
        tracing::warn!("No valid CORS origins parsed; falling back to permissive");
        return CorsLayer::very_permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

