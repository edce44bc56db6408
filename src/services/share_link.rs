use crate::{
    brand::Brand,
    constants::REFERRAL_CODE_BYTES,
    db::Database,
    error::{AppError, Result},
    integrations::BitlyClient,
    models::{AffiliateLink, User},
    utils::normalize_host,
};

/// Upper-case hex code handed out for referral and affiliate links.
pub fn generate_referral_code() -> String {
    hex::encode_upper(rand::random::<[u8; REFERRAL_CODE_BYTES]>())
}

pub fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    if code.is_empty() || code.len() > 32 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(code)
}

pub fn long_share_url(host: &str, code: &str) -> Result<String> {
    let host = normalize_host(host);
    if host.is_empty() {
        return Err(AppError::BadRequest("Missing request host".to_string()));
    }
    Ok(format!("https://{}/r/{}", host, code))
}

pub struct ShareLinkService {
    db: Database,
    bitly: BitlyClient,
}

impl ShareLinkService {
    pub fn new(db: Database, bitly: BitlyClient) -> Self {
        Self { db, bitly }
    }

    /// Returns the user's share link for the brand behind `host`, creating it on first use.
    pub async fn share_link(&self, user: &User, host: &str) -> Result<AffiliateLink> {
        let brand = Brand::from_host(host);
        if let Some(link) = self.db.get_user_share_link(&user.id, brand.as_str()).await? {
            return Ok(link);
        }

        let target_url = long_share_url(host, &user.referral_code)?;
        let short_url = self.bitly.shorten_or_original(&target_url).await;
        let short_url = (short_url != target_url).then_some(short_url);

        let link = self
            .db
            .insert_affiliate_link(
                &generate_referral_code(),
                brand.as_str(),
                Some(&user.id),
                None,
                &target_url,
                short_url.as_deref(),
            )
            .await?;
        tracing::info!("Share link created: user={}, brand={}", user.id, brand);
        Ok(link)
    }

    /// Campaign link owned by nobody, created by an operator.
    pub async fn create_affiliate_link(
        &self,
        brand: Brand,
        label: Option<&str>,
        target_url: &str,
    ) -> Result<AffiliateLink> {
        let code = generate_referral_code();
        let short_url = self.bitly.shorten(target_url).await.unwrap_or_else(|e| {
            tracing::warn!("Failed to shorten affiliate link: {}", e);
            None
        });
        self.db
            .insert_affiliate_link(&code, brand.as_str(), None, label, target_url, short_url.as_deref())
            .await
    }

    /// Applies referral and affiliate codes sent with a profile sync.
    pub async fn apply_codes(
        &self,
        user: &User,
        referral_code: Option<&str>,
        affiliate_code: Option<&str>,
    ) -> Result<()> {
        if let Some(code) = referral_code.and_then(normalize_code) {
            match self.db.get_user_by_referral_code(&code).await? {
                Some(referrer) if referrer.id != user.id => {
                    if self.db.set_referrer_if_empty(&user.id, &referrer.id).await? {
                        tracing::info!("Referrer set: user={}, referrer={}", user.id, referrer.id);
                    }
                }
                Some(_) => tracing::debug!("Ignoring self-referral for user={}", user.id),
                None => tracing::debug!("Unknown referral code {}", code),
            }
        }

        if let Some(code) = affiliate_code.and_then(normalize_code) {
            match self.db.get_affiliate_link_by_code(&code).await? {
                Some(link) => self.db.add_affiliate_link_user(link.id, &user.id).await?,
                None => tracing::debug!("Unknown affiliate code {}", code),
            }
        }
        Ok(())
    }
}
