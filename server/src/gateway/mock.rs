//! Scripted [`PaymentGateway`] for service tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::gateway::{
    GatewayError, Intent, IntentRequest, IntentStatus, PaymentGateway, RefundReceipt, RefundStatus,
    WebhookError, WebhookEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Intent { amount_cents: i64, intent_id: Option<String> },
    GetIntent(String),
    Refund { amount_cents: i64, intent_id: String },
    Cancel(String),
}

#[derive(Default)]
struct Script {
    intents: VecDeque<Result<Intent, GatewayError>>,
    remote_status: HashMap<String, IntentStatus>,
    refunds: HashMap<String, Result<RefundReceipt, GatewayError>>,
    cancels: HashMap<String, GatewayError>,
    delay: Option<Duration>,
    calls: Vec<GatewayCall>,
}

/// Answers intents from a queue (succeeding by default), refunds and cancels per intent id.
/// Webhooks are "signed" by passing the secret itself as the signature.
#[derive(Default)]
pub struct MockGateway {
    script: Mutex<Script>,
}

pub fn intent(id: &str, status: IntentStatus) -> Intent {
    Intent {
        id: id.to_string(),
        status,
        client_secret: Some(format!("{id}_secret")),
        next_action: None,
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_intent(&self, result: Result<Intent, GatewayError>) {
        self.script.lock().unwrap().intents.push_back(result);
    }

    pub fn set_remote_status(&self, intent_id: &str, status: IntentStatus) {
        self.script
            .lock()
            .unwrap()
            .remote_status
            .insert(intent_id.to_string(), status);
    }

    pub fn set_refund(&self, intent_id: &str, result: Result<RefundReceipt, GatewayError>) {
        self.script
            .lock()
            .unwrap()
            .refunds
            .insert(intent_id.to_string(), result);
    }

    pub fn fail_cancel(&self, intent_id: &str, err: GatewayError) {
        self.script
            .lock()
            .unwrap()
            .cancels
            .insert(intent_id.to_string(), err);
    }

    /// Every call sleeps this long first; used to exercise deadlines.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.script.lock().unwrap().calls.clone()
    }

    async fn record(&self, call: GatewayCall) {
        let delay = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(call);
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_or_update_intent(&self, request: IntentRequest) -> Result<Intent, GatewayError> {
        self.record(GatewayCall::Intent {
            amount_cents: request.amount_cents,
            intent_id: request.intent_id.clone(),
        })
        .await;

        let scripted = self.script.lock().unwrap().intents.pop_front();
        scripted.unwrap_or_else(|| {
            let id = request.intent_id.unwrap_or_else(|| "pi_mock".to_string());
            Ok(intent(&id, IntentStatus::Succeeded))
        })
    }

    async fn get_intent(&self, intent_id: &str) -> Result<Intent, GatewayError> {
        self.record(GatewayCall::GetIntent(intent_id.to_string())).await;
        let status = self
            .script
            .lock()
            .unwrap()
            .remote_status
            .get(intent_id)
            .copied()
            .unwrap_or(IntentStatus::RequiresPaymentMethod);
        Ok(intent(intent_id, status))
    }

    async fn refund(&self, amount_cents: i64, intent_id: &str) -> Result<RefundReceipt, GatewayError> {
        self.record(GatewayCall::Refund {
            amount_cents,
            intent_id: intent_id.to_string(),
        })
        .await;

        let scripted = self.script.lock().unwrap().refunds.get(intent_id).cloned();
        scripted.unwrap_or_else(|| {
            Ok(RefundReceipt {
                id: format!("re_{intent_id}"),
                status: RefundStatus::Succeeded,
                failure_reason: None,
            })
        })
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<Intent, GatewayError> {
        self.record(GatewayCall::Cancel(intent_id.to_string())).await;
        let scripted = self.script.lock().unwrap().cancels.get(intent_id).cloned();
        match scripted {
            Some(err) => Err(err),
            None => Ok(intent(intent_id, IntentStatus::Canceled)),
        }
    }

    fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<WebhookEvent, WebhookError> {
        if signature != secret.expose_secret() {
            return Err(WebhookError::InvalidSignature);
        }

        let payload: Value =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        Ok(WebhookEvent {
            id: payload["id"].as_str().unwrap_or_default().to_string(),
            event_type: payload["type"].as_str().unwrap_or_default().to_string(),
            object: payload["data"]["object"].clone(),
        })
    }
}
