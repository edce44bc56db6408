use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};

// ==================== USER ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub brand: String,
    pub referral_code: String,
    pub referrer_id: Option<String>,
    pub btc_wallet_id: Option<String>,
    pub eth_address: Option<String>,
    pub soft_node_licenses: i32,
    pub created_at: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
}

// ==================== ACTIVATION ====================
pub const ACTIVATION_PENDING: &str = "pending";
pub const ACTIVATION_PARTIAL: &str = "partial";
pub const ACTIVATION_ACTIVATED: &str = "activated";

/// One row per (user, brand, reward type); the unique key enforces single activation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Activation {
    pub id: i64,
    pub user_id: String,
    pub brand: String,
    pub reward_type: String,
    pub status: String, // pending/partial/activated
    pub pay_coin: String,
    pub tx_ids: Vec<String>,
    pub company_amount: Decimal,
    pub referrer_id: Option<String>,
    pub referrer_amount: Decimal,
    pub referrer_rewarded: bool,
    pub created_at: DateTime<Utc>,
    pub reserved_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Activation {
    pub fn is_activated(&self) -> bool {
        self.status == ACTIVATION_ACTIVATED
    }

    pub fn is_partial(&self) -> bool {
        self.status == ACTIVATION_PARTIAL
    }
}

// ==================== WALLET CONFIG ====================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSpec {
    pub currency: String,
    pub amount: Decimal,
}

/// Per-brand parameters of a share activation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletConfig {
    pub brand: String,
    pub reward_type: String,
    pub pay_coin: String,
    pub activation_cost_usd: Decimal,
    pub referrer_reward_usd: Decimal,
    pub company_address: String,
    pub shares_per_activation: i32,
    pub shares_per_soft_node: i32,
    pub secondary_rewards: Json<Vec<RewardSpec>>,
    pub activation_email_template: Option<String>,
    pub referrer_email_template: Option<String>,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

// ==================== REWARDS ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UnclaimedReward {
    pub id: i64,
    pub user_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub tx_id: Option<String>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerBalance {
    pub currency: String,
    pub total: Decimal,
}

// ==================== AFFILIATE ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AffiliateLink {
    pub id: i64,
    pub code: String,
    pub brand: String,
    pub owner_user_id: Option<String>,
    pub label: Option<String>,
    pub target_url: String,
    pub short_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==================== API RESPONSE ====================
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_success_sets_flag() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert_eq!(response.data, "ok");
    }

    #[test]
    fn reward_spec_reads_json_amounts() {
        let specs: Vec<RewardSpec> = serde_json::from_value(serde_json::json!([
            { "currency": "GALA", "amount": 100 },
            { "currency": "ITEM:42", "amount": 1 }
        ]))
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].amount, Decimal::from(100));
        assert_eq!(specs[1].currency, "ITEM:42");
    }
}
