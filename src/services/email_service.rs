use rust_decimal::Decimal;
use serde_json::json;

use crate::{
    config::Config,
    error::Result,
    integrations::SendGridClient,
    models::{User, WalletConfig},
    wallet::Coin,
};

/// Transactional emails around share activation.
#[derive(Clone)]
pub struct EmailService {
    sendgrid: SendGridClient,
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            sendgrid: SendGridClient::new(config.sendgrid_api_key.clone(), config.email_from.clone())?,
        })
    }

    pub async fn send_activation(
        &self,
        user: &User,
        config: &WalletConfig,
        coin: &Coin,
        amount: Decimal,
        tx_ids: &[String],
    ) -> Result<bool> {
        let data = json!({
            "name": user.display_name.clone().unwrap_or_default(),
            "brand": config.brand,
            "reward_type": config.reward_type,
            "coin": coin.symbol(),
            "amount": amount.to_string(),
            "tx_ids": tx_ids,
        });
        self.send(user, config.activation_email_template.as_deref(), &data)
            .await
    }

    pub async fn send_referrer_reward(
        &self,
        referrer: &User,
        referred: &User,
        config: &WalletConfig,
        coin: &Coin,
        amount: Decimal,
    ) -> Result<bool> {
        let data = json!({
            "name": referrer.display_name.clone().unwrap_or_default(),
            "referred_name": referred.display_name.clone().unwrap_or_default(),
            "brand": config.brand,
            "reward_type": config.reward_type,
            "coin": coin.symbol(),
            "amount": amount.to_string(),
        });
        self.send(referrer, config.referrer_email_template.as_deref(), &data)
            .await
    }

    async fn send(
        &self,
        user: &User,
        template_id: Option<&str>,
        data: &serde_json::Value,
    ) -> Result<bool> {
        let (Some(to), Some(template_id)) = (user.email.as_deref(), template_id) else {
            tracing::debug!("No email or template for user={}, skipping", user.id);
            return Ok(false);
        };
        self.sendgrid.send_template(to, template_id, data).await
    }
}
