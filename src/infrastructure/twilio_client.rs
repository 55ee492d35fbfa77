//! Twilio telephony client
//!
//! `TelephonyClient` adapter over the Twilio REST API. Outbound placement
//! posts a form with the callback routes the provider drives during the
//! call; webhook authenticity is an HMAC-SHA256 over the raw body with the
//! shared webhook secret, hex-encoded.

use crate::config::TelephonyConfig;
use crate::domain::errors::TelephonyError;
use crate::domain::repositories::telephony::{ProviderCall, TelephonyClient};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info};

type HmacSha256 = Hmac<Sha256>;

pub struct TwilioClient {
    client: Client,
    config: TelephonyConfig,
    base_url: String,
}

impl TwilioClient {
    pub fn new(config: TelephonyConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            config,
            base_url: "https://api.twilio.com".to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(config: TelephonyConfig, base_url: String) -> Self {
        let mut client = Self::new(config);
        client.base_url = base_url;
        client
    }

    fn configured(&self) -> bool {
        !self.config.account_sid.is_empty()
            && !self.config.auth_token.is_empty()
            && !self.config.from_number.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct CreateCallResponse {
    sid: String,
    status: String,
}

#[async_trait]
impl TelephonyClient for TwilioClient {
    fn name(&self) -> &str {
        "Twilio"
    }

    async fn place_call(&self, to: &str, session_id: &str) -> Result<ProviderCall, TelephonyError> {
        if !self.configured() {
            return Err(TelephonyError::NotConfigured);
        }

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.config.account_sid
        );

        // Routes the provider drives during the call
        let connect_url = format!(
            "{}/api/calls/connect/{}",
            self.config.webhook_base_url, session_id
        );
        let status_callback = format!("{}/api/calls/events", self.config.webhook_base_url);

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Url", connect_url.as_str()),
            ("StatusCallback", status_callback.as_str()),
            ("StatusCallbackEvent", "initiated ringing answered completed"),
            ("StatusCallbackMethod", "POST"),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!("Call placement request failed: {}", e);
                TelephonyError::PlacementFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Provider rejected call placement ({}): {}", status, body);
            return Err(TelephonyError::Rejected(format!("{}: {}", status, body)));
        }

        let placed: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| TelephonyError::PlacementFailed(format!("Malformed response: {}", e)))?;

        info!("Call placed to {}, provider id {}", to, placed.sid);

        Ok(ProviderCall {
            provider_call_id: placed.sid,
            status: placed.status,
        })
    }

    fn verify_webhook_signature(&self, body: &[u8], signature_hex: &str) -> bool {
        if self.config.webhook_secret.is_empty() {
            // No secret configured: accept everything (local development)
            return true;
        }

        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}
