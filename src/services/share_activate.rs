use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    brand::Brand,
    constants::{ACTIVATION_REWARD_REASON, ACTIVATION_SLOT_LEASE_SECS},
    db::{ActivationRecord, Database},
    error::{AppError, Result},
    models::{RewardSpec, User, WalletConfig},
    services::{
        email_service::EmailService,
        price_service::PriceSource,
        reward_distributor::{DistributionOutcome, RewardDistributor},
    },
    wallet::{
        units::truncate_to_decimals, Coin, SendReceipt, SpendAuth, TxOutput, WalletBase,
        WalletOwner, WalletRegistry,
    },
};

/// How an activation payment is divided, in pay-coin units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentSplit {
    pub total: Decimal,
    pub company: Decimal,
    pub referrer: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareStats {
    pub reward_type: String,
    pub earned: i64,
    pub used: i64,
    pub available: i64,
    pub activated: bool,
}

impl ShareStats {
    pub fn is_eligible(&self) -> bool {
        self.earned > self.used
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationQuote {
    pub brand: Brand,
    pub reward_type: String,
    pub pay_coin: Coin,
    pub cost_usd: Decimal,
    pub price_usd: Decimal,
    pub total_amount: Decimal,
    pub secondary_rewards: Vec<RewardSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RewardResult {
    pub currency: String,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DistributionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReceipt {
    pub reward_type: String,
    pub coin: Coin,
    pub tx_ids: Vec<String>,
    pub split: PaymentSplit,
    pub referrer_id: Option<String>,
    pub referrer_rewarded: bool,
    pub rewards: Vec<RewardResult>,
}

/// Referrer resolved for one activation.
struct ReferrerPayout {
    user: User,
    address: Option<String>,
    eligible: bool,
}

/// Splits the USD activation cost into pay-coin amounts.
///
/// Amounts are truncated to the coin's precision. The referrer share is capped
/// at the total, and is zero unless the referrer is eligible.
pub fn payment_split(
    cost_usd: Decimal,
    referrer_reward_usd: Decimal,
    price_usd: Decimal,
    decimals: u32,
    eligible: bool,
) -> Result<PaymentSplit> {
    if price_usd <= Decimal::ZERO {
        return Err(AppError::ExternalAPI("Pay coin price must be positive".to_string()));
    }
    if cost_usd <= Decimal::ZERO {
        return Err(AppError::BadRequest("Activation cost must be positive".to_string()));
    }
    if referrer_reward_usd < Decimal::ZERO {
        return Err(AppError::BadRequest("Referrer reward cannot be negative".to_string()));
    }

    let total = truncate_to_decimals(cost_usd / price_usd, decimals);
    if total <= Decimal::ZERO {
        return Err(AppError::BadRequest(
            "Activation cost rounds to zero in the pay coin".to_string(),
        ));
    }
    let referrer = if eligible {
        truncate_to_decimals(referrer_reward_usd / price_usd, decimals).min(total)
    } else {
        Decimal::ZERO
    };

    Ok(PaymentSplit {
        total,
        company: total - referrer,
        referrer,
    })
}

/// Wallet outputs for a split; zero amounts are dropped and a shared address is paid once.
pub fn build_outputs(
    company_address: &str,
    referrer_address: Option<&str>,
    split: &PaymentSplit,
) -> Vec<TxOutput> {
    let mut outputs: Vec<TxOutput> = Vec::with_capacity(2);
    let mut push = |address: &str, amount: Decimal| {
        if amount <= Decimal::ZERO {
            return;
        }
        match outputs.iter_mut().find(|o| o.address == address) {
            Some(existing) => existing.amount += amount,
            None => outputs.push(TxOutput {
                address: address.to_string(),
                amount,
            }),
        }
    };

    push(company_address, split.company);
    if let Some(address) = referrer_address {
        push(address, split.referrer);
    }
    outputs
}

pub fn compute_share_stats(
    config: &WalletConfig,
    soft_node_licenses: i32,
    activated: bool,
    used: i64,
) -> ShareStats {
    let mut earned = i64::from(soft_node_licenses.max(0)) * i64::from(config.shares_per_soft_node);
    if activated {
        earned += i64::from(config.shares_per_activation);
    }
    ShareStats {
        reward_type: config.reward_type.clone(),
        earned,
        used,
        available: (earned - used).max(0),
        activated,
    }
}

/// Sends the activation payment through the pay coin's wallet.
pub async fn submit_payment(
    wallet: &dyn WalletBase,
    owner: &WalletOwner,
    company_address: &str,
    referrer_address: Option<&str>,
    split: &PaymentSplit,
    auth: &SpendAuth,
) -> Result<SendReceipt> {
    if !wallet.is_valid_address(company_address) {
        return Err(AppError::Internal(format!(
            "Company address for {} is invalid",
            wallet.coin()
        )));
    }
    let outputs = build_outputs(company_address, referrer_address, split);
    if outputs.is_empty() {
        return Err(AppError::BadRequest("Nothing to pay".to_string()));
    }
    wallet.send(owner, &outputs, auth).await
}

pub struct ShareActivate {
    db: Database,
    wallets: Arc<WalletRegistry>,
    prices: Arc<dyn PriceSource>,
    distributor: Arc<RewardDistributor>,
    email: EmailService,
}

impl ShareActivate {
    pub fn new(
        db: Database,
        wallets: Arc<WalletRegistry>,
        prices: Arc<dyn PriceSource>,
        distributor: Arc<RewardDistributor>,
        email: EmailService,
    ) -> Self {
        Self {
            db,
            wallets,
            prices,
            distributor,
            email,
        }
    }

    async fn wallet_config(&self, brand: Brand, reward_type: &str) -> Result<WalletConfig> {
        let reward_type = reward_type.trim().to_ascii_uppercase();
        let config = self
            .db
            .get_wallet_config(brand.as_str(), &reward_type)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No {} activation configured for {}", reward_type, brand))
            })?;
        if !config.enabled {
            return Err(AppError::BadRequest(format!(
                "{} activation is disabled for {}",
                reward_type, brand
            )));
        }
        Ok(config)
    }

    pub async fn share_stats(&self, user: &User, host: &str, reward_type: &str) -> Result<ShareStats> {
        let config = self.wallet_config(Brand::from_host(host), reward_type).await?;
        self.stats_for(user, &config).await
    }

    async fn stats_for(&self, user: &User, config: &WalletConfig) -> Result<ShareStats> {
        let activated = self
            .db
            .get_activation(&user.id, &config.brand, &config.reward_type)
            .await?
            .is_some_and(|a| a.is_activated());
        let used = self
            .db
            .count_used_shares(&user.id, &config.brand, &config.reward_type)
            .await?;
        Ok(compute_share_stats(config, user.soft_node_licenses, activated, used))
    }

    pub async fn quote(&self, host: &str, reward_type: &str) -> Result<ActivationQuote> {
        let brand = Brand::from_host(host);
        let config = self.wallet_config(brand, reward_type).await?;
        let coin = Coin::from_str(&config.pay_coin)?;
        let wallet = self.wallets.for_brand(brand).get(&coin)?;
        let price_usd = self.prices.usd_price(coin.symbol()).await?;
        let split = payment_split(
            config.activation_cost_usd,
            config.referrer_reward_usd,
            price_usd,
            wallet.decimals(),
            false,
        )?;
        Ok(ActivationQuote {
            brand,
            reward_type: config.reward_type,
            pay_coin: coin,
            cost_usd: config.activation_cost_usd,
            price_usd,
            total_amount: split.total,
            secondary_rewards: config.secondary_rewards.0,
        })
    }

    /// Runs [`ShareActivate::activate`] on its own task, so a dropped request
    /// cannot stop the pipeline between the slot claim and the recorded payment.
    pub async fn activate_detached(
        self: Arc<Self>,
        user: User,
        host: String,
        reward_type: String,
        auth: SpendAuth,
    ) -> Result<ActivationReceipt> {
        tokio::spawn(async move { self.activate(&user, &host, &reward_type, &auth).await })
            .await
            .map_err(|e| AppError::Internal(format!("Activation task failed: {}", e)))?
    }

    /// Runs a share activation end to end.
    ///
    /// # Arguments
    /// * `user` - the activating user; must own the spending wallet.
    /// * `host` - request origin, selects the brand and its wallet config.
    /// * `auth` - spending authorization for the pay coin.
    ///
    /// # Returns
    /// * `Ok(ActivationReceipt)` once the payment is broadcast and recorded.
    /// * `Err(AppError::AlreadyActivated)` when the reward type was activated before
    ///   on this brand, or another activation holds the slot.
    /// * `Err(AppError::PartialSend)` when only part of the payment went out; the
    ///   slot stays taken with the broadcast hashes.
    ///
    /// # Notes
    /// * Secondary rewards and emails run after the payment; their failures are
    ///   reported in the receipt and logs only.
    pub async fn activate(
        &self,
        user: &User,
        host: &str,
        reward_type: &str,
        auth: &SpendAuth,
    ) -> Result<ActivationReceipt> {
        let brand = Brand::from_host(host);
        let config = self.wallet_config(brand, reward_type).await?;
        let reward_type = config.reward_type.as_str();
        let brand_key = config.brand.as_str();

        if let Some(existing) = self.db.get_activation(&user.id, brand_key, reward_type).await? {
            if existing.is_activated() {
                return Err(AppError::AlreadyActivated(format!(
                    "{} already activated",
                    reward_type
                )));
            }
            if existing.is_partial() {
                return Err(AppError::AlreadyActivated(format!(
                    "{} payment was partially broadcast ({:?})",
                    reward_type, existing.tx_ids
                )));
            }
        }

        let coin = Coin::from_str(&config.pay_coin)?;
        let wallet = self.wallets.for_brand(brand).get(&coin)?;

        if !self
            .db
            .claim_activation_slot(
                &user.id,
                brand_key,
                reward_type,
                coin.symbol(),
                ACTIVATION_SLOT_LEASE_SECS,
            )
            .await?
        {
            return Err(AppError::AlreadyActivated(format!(
                "{} activation in progress",
                reward_type
            )));
        }

        let (split, referrer, receipt) = match self.pay(user, &config, wallet.as_ref(), auth).await {
            Ok(paid) => paid,
            Err(e) => {
                let slot_update = match &e {
                    AppError::PartialSend { tx_ids, .. } => {
                        tracing::error!(
                            "Activation partially paid: user={}, brand={}, type={}, txs={:?}",
                            user.id,
                            brand_key,
                            reward_type,
                            tx_ids
                        );
                        self.db
                            .mark_activation_partial(&user.id, brand_key, reward_type, tx_ids)
                            .await
                    }
                    _ => {
                        self.db
                            .release_activation_slot(&user.id, brand_key, reward_type)
                            .await
                    }
                };
                if let Err(slot_err) = slot_update {
                    tracing::error!(
                        "Failed to update activation slot user={} type={}: {}",
                        user.id,
                        reward_type,
                        slot_err
                    );
                }
                return Err(e);
            }
        };

        let referrer_rewarded = referrer
            .as_ref()
            .is_some_and(|r| r.eligible && split.referrer > Decimal::ZERO);
        let referrer_id = referrer.as_ref().map(|r| r.user.id.clone());

        self.db
            .complete_activation(&ActivationRecord {
                user_id: &user.id,
                brand: brand_key,
                reward_type,
                tx_ids: &receipt.tx_ids,
                company_amount: split.company,
                referrer_id: referrer_id.as_deref(),
                referrer_amount: if referrer_rewarded { split.referrer } else { Decimal::ZERO },
                referrer_rewarded,
            })
            .await
            .inspect_err(|e| {
                tracing::error!(
                    "Activation paid but not recorded: user={}, type={}, txs={:?}: {}",
                    user.id,
                    reward_type,
                    receipt.tx_ids,
                    e
                );
            })?;

        tracing::info!(
            "Share activated: user={}, brand={}, type={}, total={} {}, referrer={:?}, rewarded={}",
            user.id,
            brand,
            reward_type,
            split.total,
            coin,
            referrer_id,
            referrer_rewarded
        );

        let rewards = self.distribute_secondary(user, &config).await;
        self.send_emails(user, &config, &coin, &split, &receipt, referrer.as_ref(), referrer_rewarded)
            .await;

        Ok(ActivationReceipt {
            reward_type: reward_type.to_string(),
            coin,
            tx_ids: receipt.tx_ids,
            split,
            referrer_id,
            referrer_rewarded,
            rewards,
        })
    }

    async fn pay(
        &self,
        user: &User,
        config: &WalletConfig,
        wallet: &dyn WalletBase,
        auth: &SpendAuth,
    ) -> Result<(PaymentSplit, Option<ReferrerPayout>, SendReceipt)> {
        let price_usd = self.prices.usd_price(wallet.coin().symbol()).await?;
        let referrer = self.resolve_referrer(user, config, wallet).await?;
        let eligible = referrer
            .as_ref()
            .is_some_and(|r| r.eligible && r.address.is_some());

        let split = payment_split(
            config.activation_cost_usd,
            config.referrer_reward_usd,
            price_usd,
            wallet.decimals(),
            eligible,
        )?;
        let referrer_address = referrer
            .as_ref()
            .filter(|_| eligible)
            .and_then(|r| r.address.as_deref());

        let receipt = submit_payment(
            wallet,
            &WalletOwner::from(user),
            &config.company_address,
            referrer_address,
            &split,
            auth,
        )
        .await?;
        Ok((split, referrer, receipt))
    }

    async fn resolve_referrer(
        &self,
        user: &User,
        config: &WalletConfig,
        wallet: &dyn WalletBase,
    ) -> Result<Option<ReferrerPayout>> {
        let Some(referrer_id) = user.referrer_id.as_deref() else {
            return Ok(None);
        };
        let Some(referrer) = self.db.get_user(referrer_id).await? else {
            tracing::warn!("Referrer {} of user {} not found", referrer_id, user.id);
            return Ok(None);
        };

        let stats = self.stats_for(&referrer, config).await?;
        let address = match wallet.receive_address(&WalletOwner::from(&referrer)).await {
            Ok(address) => Some(address),
            Err(e) => {
                tracing::info!(
                    "Referrer {} has no {} address: {}",
                    referrer.id,
                    wallet.coin(),
                    e
                );
                None
            }
        };
        Ok(Some(ReferrerPayout {
            user: referrer,
            address,
            eligible: stats.is_eligible(),
        }))
    }

    async fn distribute_secondary(&self, user: &User, config: &WalletConfig) -> Vec<RewardResult> {
        let mut results = Vec::with_capacity(config.secondary_rewards.len());
        for spec in config.secondary_rewards.iter() {
            let result = self
                .distributor
                .distribute(user, &spec.currency, spec.amount, ACTIVATION_REWARD_REASON)
                .await;
            results.push(match result {
                Ok(outcome) => RewardResult {
                    currency: spec.currency.clone(),
                    amount: spec.amount,
                    outcome: Some(outcome),
                    error: None,
                },
                Err(e) => {
                    tracing::error!(
                        "Secondary reward failed: user={}, currency={}, amount={}: {}",
                        user.id,
                        spec.currency,
                        spec.amount,
                        e
                    );
                    RewardResult {
                        currency: spec.currency.clone(),
                        amount: spec.amount,
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            });
        }
        results
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_emails(
        &self,
        user: &User,
        config: &WalletConfig,
        coin: &Coin,
        split: &PaymentSplit,
        receipt: &SendReceipt,
        referrer: Option<&ReferrerPayout>,
        referrer_rewarded: bool,
    ) {
        if let Err(e) = self
            .email
            .send_activation(user, config, coin, split.total, &receipt.tx_ids)
            .await
        {
            tracing::warn!("Activation email failed for user={}: {}", user.id, e);
        }

        if let Some(referrer) = referrer.filter(|_| referrer_rewarded) {
            if let Err(e) = self
                .email
                .send_referrer_reward(&referrer.user, user, config, coin, split.referrer)
                .await
            {
                tracing::warn!("Referrer email failed for user={}: {}", referrer.user.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        db::WalletConfigInput,
        models::ACTIVATION_PARTIAL,
        wallet::{
            interrupted_send, registry::tests::FakeWallet, Balance, FeeEstimate,
            FormattedTransaction, HistoryPage,
        },
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use sqlx::{types::Json, PgPool};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const HOST: &str = "arcade.example.com";

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn wallet_config() -> WalletConfig {
        WalletConfig {
            brand: "arcade".to_string(),
            reward_type: "GALA".to_string(),
            pay_coin: "GALA".to_string(),
            activation_cost_usd: dec("50"),
            referrer_reward_usd: dec("10"),
            company_address: "company".to_string(),
            shares_per_activation: 1,
            shares_per_soft_node: 3,
            secondary_rewards: Json(vec![]),
            activation_email_template: None,
            referrer_email_template: None,
            enabled: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn split_pays_referrer_when_eligible() {
        let split = payment_split(dec("50"), dec("10"), dec("0.03"), 8, true).unwrap();
        assert_eq!(split.total, dec("1666.66666666"));
        assert_eq!(split.referrer, dec("333.33333333"));
        assert_eq!(split.company, split.total - split.referrer);
    }

    #[test]
    fn split_gives_company_everything_when_ineligible() {
        let split = payment_split(dec("50"), dec("10"), dec("25000"), 8, false).unwrap();
        assert_eq!(split.total, dec("0.002"));
        assert_eq!(split.referrer, Decimal::ZERO);
        assert_eq!(split.company, dec("0.002"));
    }

    #[test]
    fn split_caps_referrer_at_total() {
        let split = payment_split(dec("5"), dec("10"), dec("1"), 8, true).unwrap();
        assert_eq!(split.referrer, dec("5"));
        assert_eq!(split.company, Decimal::ZERO);
    }

    #[test]
    fn split_rejects_bad_inputs() {
        assert!(matches!(
            payment_split(dec("5"), dec("1"), Decimal::ZERO, 8, true),
            Err(AppError::ExternalAPI(_))
        ));
        assert!(payment_split(Decimal::ZERO, dec("1"), dec("1"), 8, true).is_err());
        // Half a unit truncates to nothing at zero decimals.
        assert!(payment_split(dec("0.5"), Decimal::ZERO, dec("1"), 0, false).is_err());
    }

    #[test]
    fn build_outputs_drops_zero_and_merges_same_address() {
        let split = PaymentSplit {
            total: dec("3"),
            company: dec("2"),
            referrer: dec("1"),
        };
        let outputs = build_outputs("company", Some("referrer"), &split);
        assert_eq!(outputs.len(), 2);

        let merged = build_outputs("company", Some("company"), &split);
        assert_eq!(
            merged,
            vec![TxOutput {
                address: "company".to_string(),
                amount: dec("3")
            }]
        );

        let company_only = PaymentSplit {
            total: dec("3"),
            company: dec("3"),
            referrer: Decimal::ZERO,
        };
        assert_eq!(build_outputs("company", Some("referrer"), &company_only).len(), 1);

        let referrer_only = PaymentSplit {
            total: dec("3"),
            company: Decimal::ZERO,
            referrer: dec("3"),
        };
        let outputs = build_outputs("company", Some("referrer"), &referrer_only);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].address, "referrer");
    }

    #[test]
    fn share_stats_count_soft_nodes_and_activation() {
        let config = wallet_config();
        let stats = compute_share_stats(&config, 2, true, 4);
        assert_eq!(stats.earned, 7);
        assert_eq!(stats.available, 3);
        assert!(stats.is_eligible());

        let exhausted = compute_share_stats(&config, 0, true, 1);
        assert_eq!(exhausted.available, 0);
        assert!(!exhausted.is_eligible());

        let fresh = compute_share_stats(&config, 0, false, 0);
        assert_eq!(fresh.earned, 0);
        assert!(!fresh.is_eligible());
    }

    #[tokio::test]
    async fn submit_payment_sends_split_outputs() {
        let wallet = FakeWallet {
            coin: Coin::Token("GALA".to_string()),
        };
        let owner = WalletOwner {
            user_id: "u1".to_string(),
            ..Default::default()
        };
        let split = payment_split(dec("50"), dec("10"), dec("0.05"), 8, true).unwrap();
        let receipt = submit_payment(
            &wallet,
            &owner,
            "company",
            Some("referrer"),
            &split,
            &SpendAuth::PrivateKey("key".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(receipt.total_amount, dec("1000"));
        assert_eq!(receipt.tx_ids, vec!["fake-tx".to_string()]);
    }

    #[tokio::test]
    async fn submit_payment_rejects_invalid_company_address() {
        let wallet = FakeWallet { coin: Coin::Btc };
        let owner = WalletOwner::default();
        let split = payment_split(dec("50"), Decimal::ZERO, dec("50000"), 8, false).unwrap();
        let err = submit_payment(
            &wallet,
            &owner,
            "",
            None,
            &split,
            &SpendAuth::Passphrase("pw".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    struct FixedPrice(Decimal);

    #[async_trait]
    impl PriceSource for FixedPrice {
        async fn usd_price(&self, _symbol: &str) -> Result<Decimal> {
            Ok(self.0)
        }
    }

    /// GALA wallet that records every broadcast output and can fail on a chosen output.
    #[derive(Default)]
    struct ScriptedWallet {
        fail_at_output: Mutex<Option<usize>>,
        no_address: Vec<String>,
        sent: Mutex<Vec<TxOutput>>,
    }

    impl ScriptedWallet {
        fn failing_at(&self, output: Option<usize>) {
            *self.fail_at_output.lock().unwrap() = output;
        }

        fn sent_to(&self, address: &str) -> Vec<Decimal> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.address == address)
                .map(|o| o.amount)
                .collect()
        }
    }

    #[async_trait]
    impl WalletBase for ScriptedWallet {
        fn coin(&self) -> Coin {
            Coin::Token("GALA".to_string())
        }

        fn decimals(&self) -> u32 {
            8
        }

        fn is_valid_address(&self, address: &str) -> bool {
            !address.is_empty()
        }

        async fn receive_address(&self, owner: &WalletOwner) -> Result<String> {
            if self.no_address.contains(&owner.user_id) {
                return Err(AppError::InvalidAddress("no ETH address".to_string()));
            }
            Ok(format!("addr-{}", owner.user_id))
        }

        async fn get_balance(&self, _owner: &WalletOwner) -> Result<Balance> {
            Ok(Balance {
                coin: self.coin(),
                confirmed: Decimal::ZERO,
                pending: Decimal::ZERO,
            })
        }

        async fn get_transactions(
            &self,
            _owner: &WalletOwner,
            _page: HistoryPage,
        ) -> Result<Vec<FormattedTransaction>> {
            Ok(Vec::new())
        }

        async fn estimate_fee(&self, _owner: &WalletOwner, outputs: &[TxOutput]) -> Result<FeeEstimate> {
            Ok(FeeEstimate {
                coin: self.coin(),
                fee_coin: Coin::Eth,
                fee: Decimal::ZERO,
                total_amount: outputs.iter().map(|o| o.amount).sum(),
            })
        }

        async fn send(
            &self,
            _owner: &WalletOwner,
            outputs: &[TxOutput],
            _auth: &SpendAuth,
        ) -> Result<SendReceipt> {
            let fail_at = *self.fail_at_output.lock().unwrap();
            let mut tx_ids = Vec::new();
            for (index, output) in outputs.iter().enumerate() {
                if fail_at == Some(index) {
                    return Err(interrupted_send(
                        tx_ids,
                        AppError::BlockchainRPC("nonce too low".to_string()),
                    ));
                }
                let mut sent = self.sent.lock().unwrap();
                sent.push(output.clone());
                tx_ids.push(format!("0xtx{}", sent.len()));
            }
            Ok(SendReceipt {
                coin: self.coin(),
                tx_ids,
                total_amount: outputs.iter().map(|o| o.amount).sum(),
                fee: Decimal::ZERO,
            })
        }
    }

    async fn pipeline(pool: PgPool, wallet: Arc<ScriptedWallet>) -> (Database, ShareActivate) {
        let db = Database::from_pool(pool);
        let config = test_config();
        db.upsert_wallet_config(&WalletConfigInput {
            brand: "arcade".to_string(),
            reward_type: "GALA".to_string(),
            pay_coin: "GALA".to_string(),
            activation_cost_usd: dec("50"),
            referrer_reward_usd: dec("10"),
            company_address: "company".to_string(),
            shares_per_activation: 0,
            shares_per_soft_node: 1,
            secondary_rewards: vec![RewardSpec {
                currency: "POINTS".to_string(),
                amount: dec("5"),
            }],
            activation_email_template: None,
            referrer_email_template: None,
            enabled: true,
        })
        .await
        .unwrap();

        let mut wallets: HashMap<Coin, Arc<dyn WalletBase>> = HashMap::new();
        wallets.insert(Coin::Token("GALA".to_string()), wallet as Arc<dyn WalletBase>);
        let distributor = Arc::new(RewardDistributor::new(db.clone(), config.clone()).unwrap());
        let service = ShareActivate::new(
            db.clone(),
            Arc::new(WalletRegistry::from_wallets(wallets)),
            Arc::new(FixedPrice(dec("0.05"))),
            distributor,
            EmailService::new(&config).unwrap(),
        );
        (db, service)
    }

    async fn seed_user(db: &Database, id: &str, referrer: Option<&str>) -> User {
        db.create_user(id, "arcade", &format!("CODE{}", id.to_ascii_uppercase()), None)
            .await
            .unwrap();
        if let Some(referrer) = referrer {
            assert!(db.set_referrer_if_empty(id, referrer).await.unwrap());
        }
        db.get_user(id).await.unwrap().unwrap()
    }

    fn key() -> SpendAuth {
        SpendAuth::PrivateKey("key".to_string())
    }

    #[sqlx::test]
    async fn activation_pays_once_and_credits_secondary_rewards(pool: PgPool) {
        let wallet = Arc::new(ScriptedWallet::default());
        let (db, service) = pipeline(pool, wallet.clone()).await;
        seed_user(&db, "ref", None).await;
        let alice = seed_user(&db, "alice", Some("ref")).await;

        let receipt = service.activate(&alice, HOST, "gala", &key()).await.unwrap();
        assert_eq!(receipt.tx_ids.len(), 1);
        assert_eq!(receipt.split.company, dec("1000"));
        assert!(!receipt.referrer_rewarded);
        assert_eq!(receipt.rewards[0].outcome, Some(DistributionOutcome::Credited));

        let again = service.activate(&alice, HOST, "GALA", &key()).await;
        assert!(matches!(again, Err(AppError::AlreadyActivated(_))));
        assert_eq!(wallet.sent_to("company"), vec![dec("1000")]);

        let balances = db.ledger_balances(&alice.id).await.unwrap();
        assert_eq!(balances[0].total, dec("5"));
    }

    #[sqlx::test]
    async fn eligible_referrer_is_paid_and_uses_a_share(pool: PgPool) {
        let wallet = Arc::new(ScriptedWallet::default());
        let (db, service) = pipeline(pool, wallet.clone()).await;
        seed_user(&db, "ref", None).await;
        db.add_soft_node_licenses("ref", 1).await.unwrap();
        let alice = seed_user(&db, "alice", Some("ref")).await;
        let bob = seed_user(&db, "bob", Some("ref")).await;

        let first = service.activate(&alice, HOST, "GALA", &key()).await.unwrap();
        assert!(first.referrer_rewarded);
        assert_eq!(first.split.referrer, dec("200"));
        assert_eq!(wallet.sent_to("addr-ref"), vec![dec("200")]);
        assert_eq!(db.count_used_shares("ref", "arcade", "GALA").await.unwrap(), 1);

        // One soft node earns one share, already spent on alice.
        let second = service.activate(&bob, HOST, "GALA", &key()).await.unwrap();
        assert!(!second.referrer_rewarded);
        assert_eq!(second.split.referrer, Decimal::ZERO);
        assert_eq!(second.split.company, dec("1000"));
        assert_eq!(db.count_used_shares("ref", "arcade", "GALA").await.unwrap(), 1);
    }

    #[sqlx::test]
    async fn referrer_without_address_gets_nothing(pool: PgPool) {
        let wallet = Arc::new(ScriptedWallet {
            no_address: vec!["ref".to_string()],
            ..Default::default()
        });
        let (db, service) = pipeline(pool, wallet.clone()).await;
        seed_user(&db, "ref", None).await;
        db.add_soft_node_licenses("ref", 1).await.unwrap();
        let alice = seed_user(&db, "alice", Some("ref")).await;

        let receipt = service.activate(&alice, HOST, "GALA", &key()).await.unwrap();
        assert!(!receipt.referrer_rewarded);
        assert_eq!(receipt.split.referrer, Decimal::ZERO);
        assert_eq!(wallet.sent_to("company"), vec![dec("1000")]);
        assert_eq!(db.count_used_shares("ref", "arcade", "GALA").await.unwrap(), 0);
    }

    #[sqlx::test]
    async fn failed_send_releases_the_slot(pool: PgPool) {
        let wallet = Arc::new(ScriptedWallet::default());
        let (db, service) = pipeline(pool, wallet.clone()).await;
        let alice = seed_user(&db, "alice", None).await;

        wallet.failing_at(Some(0));
        let err = service.activate(&alice, HOST, "GALA", &key()).await.unwrap_err();
        assert!(matches!(err, AppError::BlockchainRPC(_)));
        assert!(db.get_activation("alice", "arcade", "GALA").await.unwrap().is_none());

        wallet.failing_at(None);
        service.activate(&alice, HOST, "GALA", &key()).await.unwrap();
        assert_eq!(wallet.sent_to("company").len(), 1);
    }

    #[sqlx::test]
    async fn partial_broadcast_keeps_the_slot(pool: PgPool) {
        let wallet = Arc::new(ScriptedWallet::default());
        let (db, service) = pipeline(pool, wallet.clone()).await;
        seed_user(&db, "ref", None).await;
        db.add_soft_node_licenses("ref", 1).await.unwrap();
        let alice = seed_user(&db, "alice", Some("ref")).await;

        // Company output goes out, referrer output fails.
        wallet.failing_at(Some(1));
        let err = service.activate(&alice, HOST, "GALA", &key()).await.unwrap_err();
        match err {
            AppError::PartialSend { tx_ids, .. } => assert_eq!(tx_ids.len(), 1),
            other => panic!("unexpected error {:?}", other),
        }

        let row = db.get_activation("alice", "arcade", "GALA").await.unwrap().unwrap();
        assert_eq!(row.status, ACTIVATION_PARTIAL);
        assert_eq!(row.tx_ids.len(), 1);

        wallet.failing_at(None);
        let retry = service.activate(&alice, HOST, "GALA", &key()).await;
        assert!(matches!(retry, Err(AppError::AlreadyActivated(_))));
        assert_eq!(wallet.sent_to("company").len(), 1);
    }

    #[sqlx::test]
    async fn stale_pending_slot_is_reclaimed(pool: PgPool) {
        let wallet = Arc::new(ScriptedWallet::default());
        let (db, service) = pipeline(pool, wallet.clone()).await;
        let alice = seed_user(&db, "alice", None).await;

        // Slot left behind by a request that died before paying.
        assert!(db
            .claim_activation_slot("alice", "arcade", "GALA", "GALA", ACTIVATION_SLOT_LEASE_SECS)
            .await
            .unwrap());
        let busy = service.activate(&alice, HOST, "GALA", &key()).await;
        assert!(matches!(busy, Err(AppError::AlreadyActivated(_))));

        sqlx::query("UPDATE activations SET reserved_at = NOW() - INTERVAL '1 hour' WHERE user_id = $1")
            .bind("alice")
            .execute(db.pool())
            .await
            .unwrap();
        let receipt = service.activate(&alice, HOST, "GALA", &key()).await.unwrap();
        assert_eq!(receipt.split.company, dec("1000"));
    }
}
