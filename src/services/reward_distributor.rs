use chrono::{DateTime, Utc};
use ethers::{
    providers::Middleware,
    signers::Signer,
    types::{Address, Bytes, U256},
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::{
    config::{Config, Erc20TokenConfig},
    constants::{
        GAME_ITEM_PREFIX, UNCLAIMED_REWARD_BACKOFF_SECS, UNCLAIMED_REWARD_LEASE_SECS,
        UNCLAIMED_REWARD_MAX_BACKOFF_SECS, UNCLAIMED_REWARD_RETRY_BATCH,
        UNCLAIMED_REWARD_RETRY_INTERVAL_SECS,
    },
    db::Database,
    error::{AppError, Result},
    models::{UnclaimedReward, User},
    services::onchain::{parse_address, parse_wallet, Erc20, OnchainReader},
    wallet::units::to_base_units,
};

ethers::contract::abigen!(
    GameItems,
    r#"[
        function safeTransferFrom(address from, address to, uint256 id, uint256 amount, bytes data)
    ]"#
);

/// Payout mechanism for a reward currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardRoute {
    GameItem { item_id: U256 },
    Erc20(Erc20TokenConfig),
    Ledger(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DistributionOutcome {
    Paid { tx_id: String },
    Credited,
    Unclaimed { reward_id: i64, reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClaimSummary {
    pub claimed: Vec<i64>,
    pub ledger_credited: Vec<i64>,
    pub still_unclaimed: Vec<i64>,
}

/// Resolves a reward currency string to its payout mechanism.
///
/// `ITEM:<id>` selects an ERC1155 game item, a configured ERC20 symbol an
/// on-chain token transfer, and a configured ledger currency an internal credit.
pub fn route(config: &Config, currency: &str) -> Result<RewardRoute> {
    let currency = currency.trim();
    let upper = currency.to_ascii_uppercase();

    if let Some(raw_id) = upper.strip_prefix(GAME_ITEM_PREFIX) {
        if config.game_items_contract_address.is_none() {
            return Err(AppError::UnsupportedRewardCurrency(format!(
                "{} (game items contract not configured)",
                currency
            )));
        }
        let item_id = U256::from_dec_str(raw_id.trim())
            .map_err(|_| AppError::UnsupportedRewardCurrency(currency.to_string()))?;
        return Ok(RewardRoute::GameItem { item_id });
    }

    if let Some(token) = config.erc20_tokens.get(&upper) {
        return Ok(RewardRoute::Erc20(token.clone()));
    }

    if config.ledger_currencies.iter().any(|c| c == &upper) {
        return Ok(RewardRoute::Ledger(upper));
    }

    Err(AppError::UnsupportedRewardCurrency(currency.to_string()))
}

/// Seconds a reward waits after its `attempts`-th failure.
pub fn retry_backoff_secs(attempts: i32, base_secs: i64, max_secs: i64) -> i64 {
    if attempts <= 0 {
        return 0;
    }
    let exponent = (attempts - 1).min(32) as u32;
    base_secs.saturating_mul(2_i64.saturating_pow(exponent)).min(max_secs)
}

/// Whether the background loop should try a reward again at `now`.
pub fn retry_due(reward: &UnclaimedReward, now: DateTime<Utc>) -> bool {
    if reward.claimed_at.is_some() {
        return false;
    }
    if reward
        .reserved_at
        .is_some_and(|at| (now - at).num_seconds() < UNCLAIMED_REWARD_LEASE_SECS)
    {
        return false;
    }
    match reward.last_attempt_at {
        None => true,
        Some(last) => {
            let wait = retry_backoff_secs(
                reward.attempts,
                UNCLAIMED_REWARD_BACKOFF_SECS,
                UNCLAIMED_REWARD_MAX_BACKOFF_SECS,
            );
            (now - last).num_seconds() >= wait
        }
    }
}

enum Settlement {
    Paid(String),
    Credited,
    AlreadyClosed,
}

/// Game items are granted in whole units.
fn item_quantity(amount: Decimal) -> Result<U256> {
    if amount <= Decimal::ZERO || amount.fract() != Decimal::ZERO {
        return Err(AppError::BadRequest(format!(
            "Game item quantity must be a positive whole number, got {}",
            amount
        )));
    }
    to_base_units(amount, 0)
}

pub struct RewardDistributor {
    db: Database,
    reader: OnchainReader,
    config: Config,
}

impl RewardDistributor {
    pub fn new(db: Database, config: Config) -> Result<Self> {
        let reader = OnchainReader::from_config(&config)?;
        Ok(Self { db, reader, config })
    }

    /// Pays out one reward. On-chain rewards that cannot be delivered now are
    /// parked as unclaimed rewards instead of failing the caller.
    pub async fn distribute(
        &self,
        user: &User,
        currency: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<DistributionOutcome> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("Reward amount must be positive".to_string()));
        }
        let route = route(&self.config, currency)?;

        if let RewardRoute::Ledger(ledger_currency) = &route {
            self.db
                .credit_ledger(&user.id, ledger_currency, amount, reason)
                .await?;
            tracing::info!(
                "Ledger credited: user={}, currency={}, amount={}",
                user.id,
                ledger_currency,
                amount
            );
            return Ok(DistributionOutcome::Credited);
        }

        match self.transfer(&route, user.eth_address.as_deref(), amount).await {
            Ok(tx_id) => {
                tracing::info!(
                    "Reward paid: user={}, currency={}, amount={}, tx={}",
                    user.id,
                    currency,
                    amount,
                    tx_id
                );
                Ok(DistributionOutcome::Paid { tx_id })
            }
            Err(e) => {
                tracing::warn!(
                    "Reward for user={} currency={} parked as unclaimed: {}",
                    user.id,
                    currency,
                    e
                );
                let reward_id = self
                    .db
                    .insert_unclaimed_reward(&user.id, currency, amount, reason)
                    .await?;
                Ok(DistributionOutcome::Unclaimed {
                    reward_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Retries every open reward of a user.
    pub async fn claim_unclaimed(&self, user: &User) -> Result<ClaimSummary> {
        self.claim_matching(user, |_| true).await
    }

    /// Runs [`RewardDistributor::claim_unclaimed`] on its own task, so a dropped
    /// request cannot leave a reward leased mid-transfer.
    pub async fn claim_detached(self: Arc<Self>, user: User) -> Result<ClaimSummary> {
        tokio::spawn(async move { self.claim_unclaimed(&user).await })
            .await
            .map_err(|e| AppError::Internal(format!("Claim task failed: {}", e)))?
    }

    async fn claim_matching<F>(&self, user: &User, wanted: F) -> Result<ClaimSummary>
    where
        F: Fn(&UnclaimedReward) -> bool,
    {
        let rewards = self.db.list_unclaimed_rewards(&user.id).await?;
        let mut summary = ClaimSummary::default();

        for reward in rewards.into_iter().filter(|reward| wanted(reward)) {
            if !self
                .db
                .reserve_unclaimed_reward(reward.id, UNCLAIMED_REWARD_LEASE_SECS)
                .await?
            {
                continue;
            }
            match self.settle(user, &reward).await {
                Ok(Settlement::Paid(tx_id)) => {
                    self.db.mark_reward_paid(reward.id, &tx_id).await?;
                    summary.claimed.push(reward.id);
                }
                Ok(Settlement::Credited) => summary.ledger_credited.push(reward.id),
                Ok(Settlement::AlreadyClosed) => {}
                Err(e) => {
                    tracing::warn!("Unclaimed reward {} still pending: {}", reward.id, e);
                    self.db
                        .release_unclaimed_reward(reward.id, &e.to_string())
                        .await?;
                    summary.still_unclaimed.push(reward.id);
                }
            }
        }

        if !summary.claimed.is_empty() || !summary.ledger_credited.is_empty() {
            tracing::info!(
                "Claimed rewards for user={}: onchain={:?}, ledger={:?}",
                user.id,
                summary.claimed,
                summary.ledger_credited
            );
        }
        Ok(summary)
    }

    /// Start the unclaimed-reward retry loop
    pub async fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(UNCLAIMED_REWARD_RETRY_INTERVAL_SECS));

            loop {
                ticker.tick().await;

                if let Err(e) = self.retry_claimable().await {
                    tracing::error!("Unclaimed reward retry error: {}", e);
                }
            }
        });
    }

    async fn retry_claimable(&self) -> Result<()> {
        let user_ids = self
            .db
            .users_with_claimable_rewards(
                UNCLAIMED_REWARD_RETRY_BATCH,
                UNCLAIMED_REWARD_BACKOFF_SECS,
                UNCLAIMED_REWARD_MAX_BACKOFF_SECS,
                UNCLAIMED_REWARD_LEASE_SECS,
            )
            .await?;

        for user_id in user_ids {
            let Some(user) = self.db.get_user(&user_id).await? else {
                continue;
            };
            let now = Utc::now();
            if let Err(e) = self.claim_matching(&user, |reward| retry_due(reward, now)).await {
                tracing::warn!("Retry for user={} failed: {}", user_id, e);
            }
        }
        Ok(())
    }

    async fn settle(&self, user: &User, reward: &UnclaimedReward) -> Result<Settlement> {
        let route = route(&self.config, &reward.currency)?;
        if let RewardRoute::Ledger(ledger_currency) = &route {
            let credited = self
                .db
                .settle_reward_to_ledger(reward.id, ledger_currency)
                .await?;
            return Ok(if credited {
                Settlement::Credited
            } else {
                Settlement::AlreadyClosed
            });
        }
        self.transfer(&route, user.eth_address.as_deref(), reward.amount)
            .await
            .map(Settlement::Paid)
    }

    async fn transfer(&self, route: &RewardRoute, to: Option<&str>, amount: Decimal) -> Result<String> {
        let to = to.ok_or_else(|| {
            AppError::InvalidAddress("User has no ETH address for on-chain rewards".to_string())
        })?;
        let to = parse_address(to)?;
        let key = self
            .config
            .reward_distributor_private_key
            .as_deref()
            .ok_or_else(|| AppError::Internal("Reward distributor key not configured".to_string()))?;
        let client = self.reader.signer(key)?;

        match route {
            RewardRoute::GameItem { item_id } => {
                let contract_address = self
                    .config
                    .game_items_contract_address
                    .as_deref()
                    .ok_or_else(|| {
                        AppError::Internal("Game items contract not configured".to_string())
                    })?;
                let from = parse_wallet(key)?.address();
                let contract = GameItems::new(parse_address(contract_address)?, client);
                grant_item(&contract, from, to, *item_id, item_quantity(amount)?).await
            }
            RewardRoute::Erc20(token) => {
                let contract = Erc20::new(parse_address(&token.address)?, client);
                let call = contract.transfer(to, to_base_units(amount, token.decimals)?);
                let pending = call
                    .send()
                    .await
                    .map_err(|e| AppError::BlockchainRPC(e.to_string()))?;
                Ok(format!("{:#x}", pending.tx_hash()))
            }
            RewardRoute::Ledger(currency) => Err(AppError::Internal(format!(
                "{} is a ledger currency",
                currency
            ))),
        }
    }
}

/// Grants an ERC1155 item. The call is simulated first; a grant that would
/// revert returns an error and is never broadcast.
async fn grant_item<M: Middleware + 'static>(
    contract: &GameItems<M>,
    from: Address,
    to: Address,
    item_id: U256,
    quantity: U256,
) -> Result<String> {
    let call = contract
        .safe_transfer_from(from, to, item_id, quantity, Bytes::default())
        .from(from);
    let gas = call
        .estimate_gas()
        .await
        .map_err(|e| AppError::BlockchainRPC(format!("Game item grant would revert: {}", e)))?;
    let call = call.gas(gas);
    let pending = call
        .send()
        .await
        .map_err(|e| AppError::BlockchainRPC(e.to_string()))?;
    Ok(format!("{:#x}", pending.tx_hash()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use chrono::Duration as ChronoDuration;
    use ethers::providers::{JsonRpcError, MockResponse, Provider};
    use sqlx::PgPool;
    use std::str::FromStr;

    const RECEIVER: &str = "0x000000000000000000000000000000000000dEaD";

    fn open_reward(attempts: i32, last_attempt_at: Option<DateTime<Utc>>) -> UnclaimedReward {
        UnclaimedReward {
            id: 1,
            user_id: "u1".to_string(),
            currency: "GALA".to_string(),
            amount: Decimal::from(10),
            reason: "share_activation".to_string(),
            created_at: Utc::now(),
            claimed_at: None,
            tx_id: None,
            reserved_at: None,
            attempts,
            last_attempt_at,
            last_error: None,
        }
    }

    async fn seed_user(db: &Database, id: &str, eth_address: Option<&str>) -> User {
        db.create_user(id, "arcade", &format!("CODE{}", id.to_ascii_uppercase()), None)
            .await
            .unwrap();
        if let Some(address) = eth_address {
            db.set_eth_address(id, address).await.unwrap();
        }
        db.get_user(id).await.unwrap().unwrap()
    }

    async fn reward_row(db: &Database, id: i64) -> UnclaimedReward {
        sqlx::query_as::<_, UnclaimedReward>("SELECT * FROM unclaimed_rewards WHERE id = $1")
            .bind(id)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[test]
    fn route_detects_game_items() {
        let config = test_config();
        assert_eq!(
            route(&config, "ITEM:42").unwrap(),
            RewardRoute::GameItem {
                item_id: U256::from(42)
            }
        );
        assert_eq!(
            route(&config, "item:7").unwrap(),
            RewardRoute::GameItem {
                item_id: U256::from(7)
            }
        );
    }

    #[test]
    fn route_rejects_malformed_item_id() {
        let config = test_config();
        assert!(matches!(
            route(&config, "ITEM:sword"),
            Err(AppError::UnsupportedRewardCurrency(_))
        ));
    }

    #[test]
    fn route_requires_game_items_contract() {
        let mut config = test_config();
        config.game_items_contract_address = None;
        assert!(matches!(
            route(&config, "ITEM:1"),
            Err(AppError::UnsupportedRewardCurrency(_))
        ));
    }

    #[test]
    fn route_maps_tokens_and_ledger_currencies() {
        let config = test_config();
        match route(&config, "gala").unwrap() {
            RewardRoute::Erc20(token) => assert_eq!(token.symbol, "GALA"),
            other => panic!("unexpected route {:?}", other),
        }
        assert_eq!(
            route(&config, "points").unwrap(),
            RewardRoute::Ledger("POINTS".to_string())
        );
    }

    #[test]
    fn route_rejects_unknown_currency() {
        let config = test_config();
        let err = route(&config, "DOGE").unwrap_err();
        assert!(matches!(err, AppError::UnsupportedRewardCurrency(c) if c == "DOGE"));
    }

    #[test]
    fn item_quantity_must_be_whole() {
        assert_eq!(item_quantity(Decimal::from(3)).unwrap(), U256::from(3));
        assert!(item_quantity(Decimal::from_str("1.5").unwrap()).is_err());
        assert!(item_quantity(Decimal::ZERO).is_err());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(DistributionOutcome::Paid {
            tx_id: "0xabc".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "paid");
        assert_eq!(json["tx_id"], "0xabc");
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(retry_backoff_secs(0, 300, 86_400), 0);
        assert_eq!(retry_backoff_secs(1, 300, 86_400), 300);
        assert_eq!(retry_backoff_secs(3, 300, 86_400), 1_200);
        assert_eq!(retry_backoff_secs(40, 300, 86_400), 86_400);
    }

    #[test]
    fn retry_due_waits_out_the_backoff() {
        let now = Utc::now();
        assert!(retry_due(&open_reward(0, None), now));
        assert!(!retry_due(&open_reward(1, Some(now - ChronoDuration::seconds(60))), now));
        assert!(retry_due(&open_reward(1, Some(now - ChronoDuration::seconds(301))), now));

        let mut leased = open_reward(0, None);
        leased.reserved_at = Some(now);
        assert!(!retry_due(&leased, now));
        leased.reserved_at = Some(now - ChronoDuration::hours(1));
        assert!(retry_due(&leased, now));
    }

    #[tokio::test]
    async fn game_item_grant_stops_when_simulation_reverts() {
        let (provider, mock) = Provider::mocked();
        mock.push_response(MockResponse::Error(JsonRpcError {
            code: 3,
            message: "execution reverted: ERC1155: insufficient balance for transfer".to_string(),
            data: None,
        }));
        let contract = GameItems::new(Address::repeat_byte(0x33), Arc::new(provider));

        let err = grant_item(
            &contract,
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            U256::from(42),
            U256::one(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BlockchainRPC(ref message) if message.contains("revert")));
    }

    #[sqlx::test]
    async fn ledger_reward_is_credited_once(pool: PgPool) {
        let db = Database::from_pool(pool);
        let distributor = RewardDistributor::new(db.clone(), test_config()).unwrap();
        let user = seed_user(&db, "alice", None).await;
        let id = db
            .insert_unclaimed_reward(&user.id, "POINTS", Decimal::from(5), "share_activation")
            .await
            .unwrap();

        let first = distributor.claim_unclaimed(&user).await.unwrap();
        assert_eq!(first.ledger_credited, vec![id]);
        let second = distributor.claim_unclaimed(&user).await.unwrap();
        assert!(second.ledger_credited.is_empty());

        let balances = db.ledger_balances(&user.id).await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].total, Decimal::from(5));
        assert!(reward_row(&db, id).await.claimed_at.is_some());
    }

    #[sqlx::test]
    async fn failed_claim_is_released_and_backed_off(pool: PgPool) {
        let db = Database::from_pool(pool);
        // No distributor key configured, so every on-chain transfer fails.
        let distributor = RewardDistributor::new(db.clone(), test_config()).unwrap();
        let user = seed_user(&db, "bob", Some(RECEIVER)).await;
        let id = db
            .insert_unclaimed_reward(&user.id, "GALA", Decimal::from(10), "share_activation")
            .await
            .unwrap();

        let summary = distributor.claim_unclaimed(&user).await.unwrap();
        assert_eq!(summary.still_unclaimed, vec![id]);

        let row = reward_row(&db, id).await;
        assert!(row.claimed_at.is_none());
        assert!(row.reserved_at.is_none());
        assert_eq!(row.attempts, 1);
        assert!(row.last_error.is_some());

        let due = db.users_with_claimable_rewards(50, 300, 86_400, 600).await.unwrap();
        assert!(due.is_empty());
        let due_now = db.users_with_claimable_rewards(50, 0, 0, 600).await.unwrap();
        assert_eq!(due_now, vec![user.id.clone()]);
    }

    #[sqlx::test]
    async fn live_lease_blocks_a_second_claimer(pool: PgPool) {
        let db = Database::from_pool(pool);
        let distributor = RewardDistributor::new(db.clone(), test_config()).unwrap();
        let user = seed_user(&db, "carol", None).await;
        let id = db
            .insert_unclaimed_reward(&user.id, "POINTS", Decimal::from(2), "share_activation")
            .await
            .unwrap();

        assert!(db.reserve_unclaimed_reward(id, 600).await.unwrap());
        let blocked = distributor.claim_unclaimed(&user).await.unwrap();
        assert!(blocked.ledger_credited.is_empty());
        assert!(blocked.still_unclaimed.is_empty());

        // A lease left behind by a dropped claimer expires.
        sqlx::query("UPDATE unclaimed_rewards SET reserved_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
        let recovered = distributor.claim_unclaimed(&user).await.unwrap();
        assert_eq!(recovered.ledger_credited, vec![id]);
    }

    #[sqlx::test]
    async fn retry_batch_prefers_least_recently_tried_users(pool: PgPool) {
        let db = Database::from_pool(pool);
        let stuck = seed_user(&db, "stuck", Some(RECEIVER)).await;
        let fresh = seed_user(&db, "fresh", Some(RECEIVER)).await;
        let stuck_id = db
            .insert_unclaimed_reward(&stuck.id, "DOGE", Decimal::ONE, "share_activation")
            .await
            .unwrap();
        db.insert_unclaimed_reward(&fresh.id, "GALA", Decimal::ONE, "share_activation")
            .await
            .unwrap();
        sqlx::query(
            "UPDATE unclaimed_rewards SET attempts = 3, last_attempt_at = NOW() - INTERVAL '2 days'
             WHERE id = $1",
        )
        .bind(stuck_id)
        .execute(db.pool())
        .await
        .unwrap();

        let batch = db.users_with_claimable_rewards(1, 300, 86_400, 600).await.unwrap();
        assert_eq!(batch, vec![fresh.id.clone()]);
    }
}
