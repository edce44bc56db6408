use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::{
    constants::EXTERNAL_API_TIMEOUT_SECS,
    error::{AppError, Result},
};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Clone, Debug)]
pub struct SendGridClient {
    api_key: Option<String>,
    from: String,
    client: Client,
}

#[derive(Debug, Serialize, PartialEq)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
    dynamic_template_data: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct TemplateMail<'a> {
    from: Address<'a>,
    template_id: &'a str,
    personalizations: Vec<Personalization<'a>>,
}

impl SendGridClient {
    pub fn new(api_key: Option<String>, from: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(EXTERNAL_API_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            from,
            client,
        })
    }

    /// Sends a dynamic-template email.
    ///
    /// # Returns
    /// * `Ok(false)` when no API key is configured and nothing was sent.
    /// * `Ok(true)` once SendGrid accepted the message.
    pub async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        data: &serde_json::Value,
    ) -> Result<bool> {
        let Some(key) = &self.api_key else {
            tracing::debug!("SendGrid not configured, skipping template {} to {}", template_id, to);
            return Ok(false);
        };

        let body = template_mail(&self.from, to, template_id, data);
        let resp = self
            .client
            .post(SENDGRID_SEND_URL)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("SendGrid request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::ExternalAPI(format!(
                "SendGrid returned {}: {}",
                status, text
            )));
        }
        Ok(true)
    }
}

fn template_mail<'a>(
    from: &'a str,
    to: &'a str,
    template_id: &'a str,
    data: &'a serde_json::Value,
) -> TemplateMail<'a> {
    TemplateMail {
        from: Address { email: from },
        template_id,
        personalizations: vec![Personalization {
            to: vec![Address { email: to }],
            dynamic_template_data: data,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_mail_serializes_sendgrid_shape() {
        let data = serde_json::json!({ "amount": "12.5" });
        let body = serde_json::to_value(template_mail("a@x.io", "b@y.io", "d-123", &data)).unwrap();
        assert_eq!(body["from"]["email"], "a@x.io");
        assert_eq!(body["template_id"], "d-123");
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "b@y.io");
        assert_eq!(body["personalizations"][0]["dynamic_template_data"]["amount"], "12.5");
    }

    #[tokio::test]
    async fn send_template_without_key_is_skipped() {
        let client = SendGridClient::new(Some("  ".to_string()), "a@x.io".to_string()).unwrap();
        let sent = client
            .send_template("b@y.io", "d-123", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(!sent);
    }
}
