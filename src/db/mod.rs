use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};

use crate::{config::Config, error::Result, models::*};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Fields accepted when upserting a wallet config.
#[derive(Debug, Clone)]
pub struct WalletConfigInput {
    pub brand: String,
    pub reward_type: String,
    pub pay_coin: String,
    pub activation_cost_usd: Decimal,
    pub referrer_reward_usd: Decimal,
    pub company_address: String,
    pub shares_per_activation: i32,
    pub shares_per_soft_node: i32,
    pub secondary_rewards: Vec<RewardSpec>,
    pub activation_email_template: Option<String>,
    pub referrer_email_template: Option<String>,
    pub enabled: bool,
}

/// Outcome of a finished activation payment.
#[derive(Debug, Clone)]
pub struct ActivationRecord<'a> {
    pub user_id: &'a str,
    pub brand: &'a str,
    pub reward_type: &'a str,
    pub tx_ids: &'a [String],
    pub company_amount: Decimal,
    pub referrer_id: Option<&'a str>,
    pub referrer_amount: Decimal,
    pub referrer_rewarded: bool,
}

impl Database {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ==================== USER QUERIES ====================
impl Database {
    pub async fn create_user(
        &self,
        id: &str,
        brand: &str,
        referral_code: &str,
        email: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, brand, referral_code, email) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(brand)
        .bind(referral_code)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn update_last_active(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_active = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_profile(
        &self,
        id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET email = COALESCE($2, email), display_name = COALESCE($3, display_name)
             WHERE id = $1",
        )
        .bind(id)
        .bind(email)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sets the referrer only once and never to the user itself.
    pub async fn set_referrer_if_empty(&self, id: &str, referrer_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET referrer_id = $2
             WHERE id = $1 AND referrer_id IS NULL AND id <> $2",
        )
        .bind(id)
        .bind(referrer_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_eth_address(&self, id: &str, address: &str) -> Result<()> {
        sqlx::query("UPDATE users SET eth_address = $2 WHERE id = $1")
            .bind(id)
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_btc_wallet_id(&self, id: &str, wallet_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET btc_wallet_id = $2 WHERE id = $1 AND btc_wallet_id IS NULL")
            .bind(id)
            .bind(wallet_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_soft_node_licenses(&self, id: &str, count: i32) -> Result<Option<i32>> {
        let total: Option<i32> = sqlx::query_scalar(
            "UPDATE users SET soft_node_licenses = soft_node_licenses + $2
             WHERE id = $1 RETURNING soft_node_licenses",
        )
        .bind(id)
        .bind(count)
        .fetch_optional(&self.pool)
        .await?;
        Ok(total)
    }
}

// ==================== ACTIVATION QUERIES ====================
impl Database {
    pub async fn get_activation(
        &self,
        user_id: &str,
        brand: &str,
        reward_type: &str,
    ) -> Result<Option<Activation>> {
        let activation = sqlx::query_as::<_, Activation>(
            "SELECT * FROM activations WHERE user_id = $1 AND brand = $2 AND reward_type = $3",
        )
        .bind(user_id)
        .bind(brand)
        .bind(reward_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(activation)
    }

    pub async fn list_activations(&self, user_id: &str) -> Result<Vec<Activation>> {
        let rows = sqlx::query_as::<_, Activation>(
            "SELECT * FROM activations WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Reserves the (user, brand, reward type) slot.
    ///
    /// A `pending` row that broadcast nothing and whose lease is older than
    /// `lease_secs` is taken over. Returns false when the slot is held.
    pub async fn claim_activation_slot(
        &self,
        user_id: &str,
        brand: &str,
        reward_type: &str,
        pay_coin: &str,
        lease_secs: i64,
    ) -> Result<bool> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO activations (user_id, brand, reward_type, pay_coin, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, brand, reward_type) DO UPDATE
            SET pay_coin = EXCLUDED.pay_coin,
                reserved_at = NOW()
            WHERE activations.status = $5
              AND cardinality(activations.tx_ids) = 0
              AND activations.reserved_at < NOW() - make_interval(secs => $6)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(brand)
        .bind(reward_type)
        .bind(pay_coin)
        .bind(ACTIVATION_PENDING)
        .bind(lease_secs as f64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.is_some())
    }

    /// Drops a slot that never broadcast anything.
    pub async fn release_activation_slot(
        &self,
        user_id: &str,
        brand: &str,
        reward_type: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM activations
             WHERE user_id = $1 AND brand = $2 AND reward_type = $3
               AND status = $4 AND cardinality(tx_ids) = 0",
        )
        .bind(user_id)
        .bind(brand)
        .bind(reward_type)
        .bind(ACTIVATION_PENDING)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Keeps the slot of a payment that was only partly broadcast.
    pub async fn mark_activation_partial(
        &self,
        user_id: &str,
        brand: &str,
        reward_type: &str,
        tx_ids: &[String],
    ) -> Result<()> {
        sqlx::query(
            "UPDATE activations SET status = $4, tx_ids = $5
             WHERE user_id = $1 AND brand = $2 AND reward_type = $3 AND status = $6",
        )
        .bind(user_id)
        .bind(brand)
        .bind(reward_type)
        .bind(ACTIVATION_PARTIAL)
        .bind(tx_ids)
        .bind(ACTIVATION_PENDING)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_activation(&self, record: &ActivationRecord<'_>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE activations
            SET status = $4,
                tx_ids = $5,
                company_amount = $6,
                referrer_id = $7,
                referrer_amount = $8,
                referrer_rewarded = $9,
                activated_at = NOW()
            WHERE user_id = $1 AND brand = $2 AND reward_type = $3
            "#,
        )
        .bind(record.user_id)
        .bind(record.brand)
        .bind(record.reward_type)
        .bind(ACTIVATION_ACTIVATED)
        .bind(record.tx_ids)
        .bind(record.company_amount)
        .bind(record.referrer_id)
        .bind(record.referrer_amount)
        .bind(record.referrer_rewarded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Shares a referrer has already consumed for a brand's reward type.
    pub async fn count_used_shares(
        &self,
        referrer_id: &str,
        brand: &str,
        reward_type: &str,
    ) -> Result<i64> {
        let used: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activations
             WHERE referrer_id = $1 AND brand = $2 AND reward_type = $3
               AND referrer_rewarded = true",
        )
        .bind(referrer_id)
        .bind(brand)
        .bind(reward_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(used)
    }
}

// ==================== WALLET CONFIG QUERIES ====================
impl Database {
    pub async fn get_wallet_config(&self, brand: &str, reward_type: &str) -> Result<Option<WalletConfig>> {
        let config = sqlx::query_as::<_, WalletConfig>(
            "SELECT * FROM wallet_configs WHERE brand = $1 AND reward_type = $2",
        )
        .bind(brand)
        .bind(reward_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config)
    }

    pub async fn upsert_wallet_config(&self, input: &WalletConfigInput) -> Result<WalletConfig> {
        let config = sqlx::query_as::<_, WalletConfig>(
            r#"
            INSERT INTO wallet_configs
                (brand, reward_type, pay_coin, activation_cost_usd, referrer_reward_usd,
                 company_address, shares_per_activation, shares_per_soft_node,
                 secondary_rewards, activation_email_template, referrer_email_template, enabled)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            ON CONFLICT (brand, reward_type) DO UPDATE
            SET pay_coin = EXCLUDED.pay_coin,
                activation_cost_usd = EXCLUDED.activation_cost_usd,
                referrer_reward_usd = EXCLUDED.referrer_reward_usd,
                company_address = EXCLUDED.company_address,
                shares_per_activation = EXCLUDED.shares_per_activation,
                shares_per_soft_node = EXCLUDED.shares_per_soft_node,
                secondary_rewards = EXCLUDED.secondary_rewards,
                activation_email_template = EXCLUDED.activation_email_template,
                referrer_email_template = EXCLUDED.referrer_email_template,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&input.brand)
        .bind(&input.reward_type)
        .bind(&input.pay_coin)
        .bind(input.activation_cost_usd)
        .bind(input.referrer_reward_usd)
        .bind(&input.company_address)
        .bind(input.shares_per_activation)
        .bind(input.shares_per_soft_node)
        .bind(Json(&input.secondary_rewards))
        .bind(&input.activation_email_template)
        .bind(&input.referrer_email_template)
        .bind(input.enabled)
        .fetch_one(&self.pool)
        .await?;
        Ok(config)
    }
}

// ==================== REWARD QUERIES ====================
impl Database {
    pub async fn insert_unclaimed_reward(
        &self,
        user_id: &str,
        currency: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO unclaimed_rewards (user_id, currency, amount, reason)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(user_id)
        .bind(currency)
        .bind(amount)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_unclaimed_rewards(&self, user_id: &str) -> Result<Vec<UnclaimedReward>> {
        let rows = sqlx::query_as::<_, UnclaimedReward>(
            "SELECT * FROM unclaimed_rewards
             WHERE user_id = $1 AND claimed_at IS NULL
             ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Leases an open reward to one claimer. Returns false while another lease is live.
    pub async fn reserve_unclaimed_reward(&self, id: i64, lease_secs: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE unclaimed_rewards SET reserved_at = NOW()
             WHERE id = $1 AND claimed_at IS NULL
               AND (reserved_at IS NULL OR reserved_at < NOW() - make_interval(secs => $2))",
        )
        .bind(id)
        .bind(lease_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ends a failed attempt and records it for backoff.
    pub async fn release_unclaimed_reward(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE unclaimed_rewards
             SET reserved_at = NULL, attempts = attempts + 1, last_attempt_at = NOW(), last_error = $2
             WHERE id = $1 AND claimed_at IS NULL",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_reward_paid(&self, id: i64, tx_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE unclaimed_rewards
             SET tx_id = $2, claimed_at = NOW(), reserved_at = NULL, last_error = NULL
             WHERE id = $1",
        )
        .bind(id)
        .bind(tx_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Closes an open reward and credits it to the ledger in one statement.
    /// Returns false when the reward was already closed.
    pub async fn settle_reward_to_ledger(&self, id: i64, ledger_currency: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            WITH settled AS (
                UPDATE unclaimed_rewards
                SET claimed_at = NOW(), reserved_at = NULL, last_error = NULL
                WHERE id = $1 AND claimed_at IS NULL
                RETURNING user_id, amount, reason
            )
            INSERT INTO reward_ledger (user_id, currency, amount, reason)
            SELECT user_id, $2, amount, reason FROM settled
            "#,
        )
        .bind(id)
        .bind(ledger_currency)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Users with open rewards that are due for a retry, least recently tried first.
    ///
    /// A reward that failed `n` times waits `min(backoff * 2^(n-1), max_backoff)` seconds.
    pub async fn users_with_claimable_rewards(
        &self,
        limit: i64,
        backoff_secs: i64,
        max_backoff_secs: i64,
        lease_secs: i64,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.user_id FROM unclaimed_rewards r
            JOIN users u ON u.id = r.user_id
            WHERE r.claimed_at IS NULL
              AND u.eth_address IS NOT NULL
              AND (r.reserved_at IS NULL OR r.reserved_at < NOW() - make_interval(secs => $4))
              AND (
                  r.last_attempt_at IS NULL
                  OR r.last_attempt_at <= NOW() - make_interval(
                      secs => LEAST($2 * POWER(2, GREATEST(r.attempts - 1, 0)), $3)
                  )
              )
            GROUP BY r.user_id
            ORDER BY MIN(COALESCE(r.last_attempt_at, '-infinity'::timestamptz)) ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(backoff_secs as f64)
        .bind(max_backoff_secs as f64)
        .bind(lease_secs as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn credit_ledger(
        &self,
        user_id: &str,
        currency: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO reward_ledger (user_id, currency, amount, reason) VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(currency)
        .bind(amount)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ledger_balances(&self, user_id: &str) -> Result<Vec<LedgerBalance>> {
        let rows = sqlx::query_as::<_, LedgerBalance>(
            "SELECT currency, COALESCE(SUM(amount), 0) AS total FROM reward_ledger
             WHERE user_id = $1 GROUP BY currency ORDER BY currency ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ==================== AFFILIATE QUERIES ====================
impl Database {
    pub async fn get_affiliate_link_by_code(&self, code: &str) -> Result<Option<AffiliateLink>> {
        let link = sqlx::query_as::<_, AffiliateLink>("SELECT * FROM affiliate_links WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(link)
    }

    pub async fn get_user_share_link(&self, user_id: &str, brand: &str) -> Result<Option<AffiliateLink>> {
        let link = sqlx::query_as::<_, AffiliateLink>(
            "SELECT * FROM affiliate_links WHERE owner_user_id = $1 AND brand = $2",
        )
        .bind(user_id)
        .bind(brand)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    pub async fn insert_affiliate_link(
        &self,
        code: &str,
        brand: &str,
        owner_user_id: Option<&str>,
        label: Option<&str>,
        target_url: &str,
        short_url: Option<&str>,
    ) -> Result<AffiliateLink> {
        let link = sqlx::query_as::<_, AffiliateLink>(
            "INSERT INTO affiliate_links (code, brand, owner_user_id, label, target_url, short_url)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(code)
        .bind(brand)
        .bind(owner_user_id)
        .bind(label)
        .bind(target_url)
        .bind(short_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(link)
    }

    pub async fn add_affiliate_link_user(&self, link_id: i64, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO affiliate_link_users (link_id, user_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(link_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn database_new_returns_error_on_invalid_url() {
        let mut config = crate::config::test_config();
        config.database_url = "not-a-url".to_string();
        let result = Database::new(&config).await;
        assert!(result.is_err());
    }

    #[sqlx::test]
    async fn activation_slots_are_scoped_by_brand(pool: sqlx::PgPool) {
        let db = Database::from_pool(pool);
        db.create_user("alice", "green", "CODEALICE", None).await.unwrap();

        assert!(db.claim_activation_slot("alice", "green", "GREEN", "GREEN", 900).await.unwrap());
        assert!(!db.claim_activation_slot("alice", "green", "GREEN", "GREEN", 900).await.unwrap());
        assert!(db.claim_activation_slot("alice", "connect", "GREEN", "GREEN", 900).await.unwrap());

        db.release_activation_slot("alice", "green", "GREEN").await.unwrap();
        assert!(db.get_activation("alice", "green", "GREEN").await.unwrap().is_none());
        assert!(db.get_activation("alice", "connect", "GREEN").await.unwrap().is_some());
    }

    #[sqlx::test]
    async fn partial_slot_is_never_released(pool: sqlx::PgPool) {
        let db = Database::from_pool(pool);
        db.create_user("bob", "arcade", "CODEBOB", None).await.unwrap();
        assert!(db.claim_activation_slot("bob", "arcade", "GALA", "GALA", 0).await.unwrap());

        let tx_ids = vec!["0xabc".to_string()];
        db.mark_activation_partial("bob", "arcade", "GALA", &tx_ids).await.unwrap();
        db.release_activation_slot("bob", "arcade", "GALA").await.unwrap();
        // Lease 0 would reclaim a stale pending row, but not a partial one.
        assert!(!db.claim_activation_slot("bob", "arcade", "GALA", "GALA", 0).await.unwrap());

        let row = db.get_activation("bob", "arcade", "GALA").await.unwrap().unwrap();
        assert!(row.is_partial());
        assert_eq!(row.tx_ids, tx_ids);
    }
}
