use crate::domain::errors::TelephonyError;
use async_trait::async_trait;

/// Provider acknowledgement of an outbound call placement.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub provider_call_id: String,
    pub status: String,
}

/// The telephony provider boundary. Placement returns the provider call id
/// used as the correlation key for all later webhook events; status changes
/// and recordings arrive via webhooks, not through this trait.
#[async_trait]
pub trait TelephonyClient: Send + Sync {
    fn name(&self) -> &str;

    async fn place_call(&self, to: &str, session_id: &str) -> Result<ProviderCall, TelephonyError>;

    /// Verify the HMAC signature on a webhook body.
    fn verify_webhook_signature(&self, body: &[u8], signature_hex: &str) -> bool;
}
