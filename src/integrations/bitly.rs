use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    constants::EXTERNAL_API_TIMEOUT_SECS,
    error::{AppError, Result},
};

const BITLY_SHORTEN_URL: &str = "https://api-ssl.bitly.com/v4/shorten";

/// Link shortener for share links.
#[derive(Clone, Debug)]
pub struct BitlyClient {
    access_token: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ShortenRequest<'a> {
    long_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ShortenResponse {
    link: String,
}

impl BitlyClient {
    pub fn new(access_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(EXTERNAL_API_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            client,
        })
    }

    pub async fn shorten(&self, long_url: &str) -> Result<Option<String>> {
        let Some(token) = &self.access_token else {
            return Ok(None);
        };

        let resp = self
            .client
            .post(BITLY_SHORTEN_URL)
            .bearer_auth(token)
            .json(&ShortenRequest { long_url })
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Bitly request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::ExternalAPI(format!(
                "Bitly returned {}",
                resp.status()
            )));
        }
        let body: ShortenResponse = resp
            .json()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Invalid Bitly response: {}", e)))?;
        Ok(Some(body.link))
    }

    /// Short link when available, otherwise the long URL itself.
    pub async fn shorten_or_original(&self, long_url: &str) -> String {
        match self.shorten(long_url).await {
            Ok(Some(link)) => link,
            Ok(None) => long_url.to_string(),
            Err(e) => {
                tracing::warn!("Failed to shorten {}: {}", long_url, e);
                long_url.to_string()
            }
        }
    }
}
