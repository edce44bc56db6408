use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Blockchain RPC error: {0}")]
    BlockchainRPC(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Coin {0} is not supported for this wallet")]
    UnsupportedCoin(String),

    #[error("Unsupported reward currency: {0}")]
    UnsupportedRewardCurrency(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Already activated: {0}")]
    AlreadyActivated(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payment interrupted after broadcasting {tx_ids:?}: {message}")]
    PartialSend { tx_ids: Vec<String>, message: String },

    #[error("External API error: {0}")]
    ExternalAPI(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Redis(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CACHE_ERROR"),
            AppError::BlockchainRPC(_) => (StatusCode::BAD_GATEWAY, "BLOCKCHAIN_RPC_ERROR"),
            AppError::AuthError(_) => (StatusCode::UNAUTHORIZED, "AUTH_ERROR"),
            AppError::InsufficientBalance(_) => (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE"),
            AppError::UnsupportedCoin(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_COIN"),
            AppError::UnsupportedRewardCurrency(_) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_REWARD_CURRENCY")
            }
            AppError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            AppError::AlreadyActivated(_) => (StatusCode::CONFLICT, "ALREADY_ACTIVATED"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::PartialSend { .. } => (StatusCode::BAD_GATEWAY, "PARTIAL_SEND"),
            AppError::ExternalAPI(_) => (StatusCode::BAD_GATEWAY, "EXTERNAL_API_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let details = match &self {
            AppError::PartialSend { tx_ids, .. } => Some(serde_json::json!({ "tx_ids": tx_ids })),
            _ => None,
        };

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_activated_maps_to_conflict() {
        let (status, code) = AppError::AlreadyActivated("green".to_string()).status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "ALREADY_ACTIVATED");
    }

    #[test]
    fn partial_send_keeps_broadcast_hashes() {
        let err = AppError::PartialSend {
            tx_ids: vec!["0xaaa".to_string()],
            message: "nonce too low".to_string(),
        };
        assert_eq!(err.status_and_code(), (StatusCode::BAD_GATEWAY, "PARTIAL_SEND"));
        assert!(err.to_string().contains("0xaaa"));
    }

    #[test]
    fn insufficient_balance_is_client_error() {
        let response = AppError::InsufficientBalance("need 1 BTC".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
