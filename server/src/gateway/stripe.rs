use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::gateway::{
    GatewayError, Intent, IntentRequest, IntentStatus, PaymentGateway, RefundReceipt, RefundStatus,
    WebhookError, WebhookEvent,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a signed webhook timestamp, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe REST client. Built once at startup and shared; the key never leaves this struct.
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: SecretString,
}

impl StripeGateway {
    pub fn new(secret_key: SecretString, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(self.secret_key.expose_secret())
            .form(params)
            .send()
            .await?;

        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| GatewayError::Unknown(format!("unexpected gateway response: {e}")));
    }

    match serde_json::from_str::<StripeErrorEnvelope>(&body) {
        Ok(envelope) if status.is_client_error() => {
            let detail = envelope.error;
            Err(GatewayError::Declined {
                code: detail
                    .decline_code
                    .or(detail.code)
                    .or(detail.error_type)
                    .unwrap_or_else(|| status.as_u16().to_string()),
                message: detail.message.unwrap_or_else(|| "Payment declined.".to_string()),
                intent_id: detail.payment_intent.map(|intent| intent.id),
            })
        }
        Ok(envelope) => Err(GatewayError::Unknown(
            envelope
                .error
                .message
                .unwrap_or_else(|| format!("gateway responded with {status}")),
        )),
        Err(_) => Err(GatewayError::Unknown(format!("gateway responded with {status}"))),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_or_update_intent(&self, request: IntentRequest) -> Result<Intent, GatewayError> {
        let intent: StripeIntent = match request.intent_id.as_deref() {
            Some(intent_id) => {
                let params = [("payment_method", request.payment_method)];
                self.post_form(&format!("/payment_intents/{intent_id}/confirm"), &params)
                    .await?
            }
            None => {
                let params = [
                    ("amount", request.amount_cents.to_string()),
                    ("currency", request.currency.to_lowercase()),
                    ("payment_method", request.payment_method),
                    ("confirm", "true".to_string()),
                    ("automatic_payment_methods[enabled]", "true".to_string()),
                    ("automatic_payment_methods[allow_redirects]", "never".to_string()),
                    ("metadata[payment_id]", request.correlation_id.to_string()),
                ];
                self.post_form("/payment_intents", &params).await?
            }
        };

        Ok(intent.into())
    }

    async fn get_intent(&self, intent_id: &str) -> Result<Intent, GatewayError> {
        let intent: StripeIntent = self.get(&format!("/payment_intents/{intent_id}")).await?;
        Ok(intent.into())
    }

    async fn refund(&self, amount_cents: i64, intent_id: &str) -> Result<RefundReceipt, GatewayError> {
        let params = [
            ("amount", amount_cents.to_string()),
            ("payment_intent", intent_id.to_string()),
        ];
        let refund: StripeRefund = self.post_form("/refunds", &params).await?;

        Ok(RefundReceipt {
            id: refund.id,
            status: refund.status,
            failure_reason: refund.failure_reason,
        })
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<Intent, GatewayError> {
        let params = [("cancellation_reason", "abandoned".to_string())];
        let intent: StripeIntent = self
            .post_form(&format!("/payment_intents/{intent_id}/cancel"), &params)
            .await?;
        Ok(intent.into())
    }

    fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<WebhookEvent, WebhookError> {
        verify_signature(body, signature, secret, Utc::now().timestamp())?;

        let event: StripeEvent =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        Ok(WebhookEvent {
            id: event.id,
            event_type: event.event_type,
            object: event.data.object,
        })
    }
}

/// Checks a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`) against the raw body.
pub fn verify_signature(
    body: &[u8],
    header: &str,
    secret: &SecretString,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature)?;
    let issued_at: i64 = timestamp.parse().map_err(|_| WebhookError::InvalidSignature)?;
    if (now - issued_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::InvalidSignature);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|expected| mac.clone().verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    payment_intent: Option<StripeIntentRef>,
}

#[derive(Debug, Deserialize)]
struct StripeIntentRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: IntentStatus,
    client_secret: Option<String>,
    next_action: Option<StripeNextAction>,
}

#[derive(Debug, Deserialize)]
struct StripeNextAction {
    #[serde(rename = "type")]
    action_type: String,
}

impl From<StripeIntent> for Intent {
    fn from(intent: StripeIntent) -> Self {
        Intent {
            id: intent.id,
            status: intent.status,
            client_secret: intent.client_secret.filter(|secret| !secret.is_empty()),
            next_action: intent.next_action.map(|action| action.action_type),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: RefundStatus,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

/// Collects `metadata` from a webhook object into owned strings.
pub fn object_metadata(object: &Value) -> HashMap<String, String> {
    object
        .get("metadata")
        .and_then(Value::as_object)
        .map(|metadata| {
            metadata
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
