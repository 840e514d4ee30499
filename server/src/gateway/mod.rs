//! Payment gateway boundary: payment intents, refunds, and signed webhooks.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
pub mod mock;
pub mod stripe;

pub use stripe::StripeGateway;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway declined ({code}): {message}")]
    Declined {
        code: String,
        message: String,
        intent_id: Option<String>,
    },

    #[error("unknown gateway error: {0}")]
    Unknown(String),
}

impl GatewayError {
    pub fn code(&self) -> &str {
        match self {
            GatewayError::Transport(_) => "transport_error",
            GatewayError::Declined { code, .. } => code,
            GatewayError::Unknown(_) => "unknown_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            GatewayError::Transport(message)
            | GatewayError::Declined { message, .. }
            | GatewayError::Unknown(message) => message,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
    /// Local payment id, sent as `metadata[payment_id]` so webhooks can find the row.
    pub correlation_id: Uuid,
    /// Existing intent to update and re-confirm instead of creating a new one.
    pub intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub id: String,
    pub status: IntentStatus,
    pub client_secret: Option<String>,
    pub next_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundReceipt {
    pub id: String,
    pub status: RefundStatus,
    pub failure_reason: Option<String>,
}

/// A verified webhook delivery; `object` is `data.object` of the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub object: Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_or_update_intent(&self, request: IntentRequest) -> Result<Intent, GatewayError>;

    async fn get_intent(&self, intent_id: &str) -> Result<Intent, GatewayError>;

    async fn refund(&self, amount_cents: i64, intent_id: &str) -> Result<RefundReceipt, GatewayError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<Intent, GatewayError>;

    fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<WebhookEvent, WebhookError>;
}
