//! Orchestration over the store, gateway, and notifier.
//!
//! Every external call goes through [`ServiceContext::deadline`]; fan-outs are joined with
//! `futures::future::join_all` and each task reports its own `Result`, so one failure never
//! disturbs its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::gateway::{GatewayError, PaymentGateway};
use crate::models::{Payment, User};
use crate::notifier::{Notifier, NotifyError};
use crate::store::{NewPaymentLog, Store};

pub mod events;
pub mod expiry;
pub mod payments;
pub mod refunds;
pub mod reservations;
pub mod webhooks;

#[cfg(test)]
pub mod testing;

pub const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Clone)]
pub struct Settings {
    pub payment_ttl: chrono::Duration,
    pub refund_window: chrono::Duration,
    pub call_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            payment_ttl: chrono::Duration::minutes(15),
            refund_window: chrono::Duration::hours(48),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// The two webhook signing secrets. Refund events are signed separately so a leaked refund
/// secret cannot forge payment success.
pub struct WebhookSecrets {
    pub payment: SecretString,
    pub refund: SecretString,
}

/// A call that can fail by running out of time.
pub trait Deadline {
    fn timed_out(after: Duration) -> Self;
}

impl Deadline for GatewayError {
    fn timed_out(after: Duration) -> Self {
        GatewayError::Transport(format!("gateway call timed out after {}s", after.as_secs()))
    }
}

impl Deadline for NotifyError {
    fn timed_out(after: Duration) -> Self {
        NotifyError::Transport(format!("mail send timed out after {}s", after.as_secs()))
    }
}

pub struct ServiceContext {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub webhook_secrets: WebhookSecrets,
    pub settings: Settings,
}

impl ServiceContext {
    /// Bounds an external call by the configured per-call timeout.
    pub async fn deadline<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Deadline,
    {
        let after = self.settings.call_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(after)),
        }
    }

    /// Appends an audit row. A failed write is logged and swallowed.
    pub async fn record_log(&self, log: NewPaymentLog) {
        let payment_id = log.payment_id;
        let status = log.status.clone();
        if let Err(e) = self.store.create_payment_log(log).await {
            error!(payment_id = %payment_id, status = %status, error = ?e, "Failed to write payment log");
        }
    }

    /// Name and address used for mails about a payment; falls back to the given address.
    pub async fn recipient_for(&self, user_id: Uuid, fallback_email: &str) -> (String, String) {
        match self.store.get_user_by_id(user_id).await {
            Ok(Some(user)) => (user.full_name(), user.email),
            Ok(None) => (fallback_email.to_string(), fallback_email.to_string()),
            Err(e) => {
                error!(user_id = %user_id, error = ?e, "Failed to load user for notification");
                (fallback_email.to_string(), fallback_email.to_string())
            }
        }
    }

    /// Email recorded on audit rows written outside a user request.
    pub async fn audit_email(&self, payment: &Payment) -> String {
        match self.store.get_user_by_id(payment.user_id).await {
            Ok(Some(User { email, .. })) => email,
            _ => "unknown@example.com".to_string(),
        }
    }
}

/// A gateway action that failed for one payment inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentFailure {
    pub payment_id: Uuid,
    pub action: String,
    pub code: String,
    pub message: String,
}

impl PaymentFailure {
    pub fn from_gateway(payment_id: Uuid, action: &str, err: &GatewayError) -> Self {
        Self {
            payment_id,
            action: action.to_string(),
            code: err.code().to_string(),
            message: err.message().to_string(),
        }
    }
}

/// A notification that could not be delivered inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationFailure {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub message: String,
}
