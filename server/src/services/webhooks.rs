//! Signed gateway callbacks. Each handler only applies a transition the payment can take
//! from its current status; anything else is logged and ignored.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::stripe::object_metadata;
use crate::gateway::{WebhookError, WebhookEvent};
use crate::models::{Payment, PaymentStatus};
use crate::services::payments::{send_confirmation, ticket_lines_for};
use crate::services::ServiceContext;
use crate::store::{NewPaymentLog, PaymentUpdate};
use crate::utils::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Payment,
    Refund,
}

impl WebhookKind {
    /// Refund endpoints are signed with their own secret.
    pub fn from_path(kind: &str) -> Self {
        if kind.to_ascii_lowercase().contains("refund") {
            WebhookKind::Refund
        } else {
            WebhookKind::Payment
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "reason", rename_all = "snake_case")]
pub enum WebhookDisposition {
    Applied,
    Ignored(String),
}

pub async fn handle_webhook(
    ctx: &ServiceContext,
    body: &[u8],
    signature: &str,
    kind: WebhookKind,
) -> Result<WebhookDisposition, AppError> {
    let secret = match kind {
        WebhookKind::Payment => &ctx.webhook_secrets.payment,
        WebhookKind::Refund => &ctx.webhook_secrets.refund,
    };
    let event = ctx
        .gateway
        .verify_and_parse_webhook(body, signature, secret)
        .map_err(|e| match e {
            WebhookError::InvalidSignature => AppError::SignatureInvalid,
            WebhookError::Malformed(message) => AppError::ValidationError(message),
        })?;

    info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

    let disposition = match event.event_type.as_str() {
        "payment_intent.succeeded" => on_intent_succeeded(ctx, &event).await?,
        "payment_intent.payment_failed" => on_intent_failed(ctx, &event).await?,
        "payment_intent.requires_action" => on_intent_requires_action(ctx, &event).await?,
        "charge.refunded" => on_charge_refunded(ctx, &event).await?,
        "refund.failed" => on_refund_failed(ctx, &event).await?,
        other => WebhookDisposition::Ignored(format!("unhandled event type {other}")),
    };

    if let WebhookDisposition::Ignored(reason) = &disposition {
        info!(event_id = %event.id, event_type = %event.event_type, reason = %reason, "Webhook ignored");
    }
    Ok(disposition)
}

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `payment_intent` is either an id or an expanded object.
fn linked_intent_id(object: &Value) -> Option<&str> {
    let linked = object.get("payment_intent")?;
    match linked {
        Value::String(id) => Some(id.as_str()).filter(|id| !id.is_empty()),
        Value::Object(_) => str_field(linked, "id"),
        _ => None,
    }
}

/// Payment referenced by an intent event: by the correlation id in its metadata, then by
/// the intent id.
async fn payment_for_intent(ctx: &ServiceContext, object: &Value) -> Result<Option<Payment>, AppError> {
    let correlated = object_metadata(object)
        .get("payment_id")
        .and_then(|id| Uuid::parse_str(id).ok());
    if let Some(payment_id) = correlated {
        if let Some(payment) = ctx.store.get_payment(payment_id).await? {
            return Ok(Some(payment));
        }
    }

    match str_field(object, "id") {
        Some(intent_id) => Ok(ctx.store.get_payment_by_intent_id(intent_id).await?),
        None => Ok(None),
    }
}

async fn payment_for_refund(ctx: &ServiceContext, object: &Value) -> Result<Option<Payment>, AppError> {
    match linked_intent_id(object) {
        Some(intent_id) => Ok(ctx.store.get_payment_by_intent_id(intent_id).await?),
        None => Ok(None),
    }
}

fn unexpected(payment: &Payment, next: PaymentStatus) -> WebhookDisposition {
    WebhookDisposition::Ignored(format!(
        "payment {} is {}, cannot move to {}",
        payment.id, payment.status, next
    ))
}

/// Writes the new status and one audit row. The row is written even when the update fails.
async fn apply(
    ctx: &ServiceContext,
    payment: &Payment,
    update: PaymentUpdate,
    log_status: String,
    description: String,
) {
    let status = update.status;
    if let Err(e) = ctx.store.update_payment(update).await {
        error!(payment_id = %payment.id, status = %status, error = ?e,
            "CRITICAL: webhook transition was not persisted");
    }

    let user_email = ctx.audit_email(payment).await;
    ctx.record_log(NewPaymentLog {
        payment_intent_id: payment.payment_intent_id.clone().unwrap_or_default(),
        payment_method_id: None,
        amount: payment.amount,
        status: log_status,
        description: Some(description),
        user_email,
        payment_id: payment.id,
    })
    .await;
}

fn with_intent(payment: &Payment, object: &Value, status: PaymentStatus) -> PaymentUpdate {
    let mut update = PaymentUpdate::status_of(payment, status);
    if update.payment_intent_id.is_none() {
        update.payment_intent_id = str_field(object, "id").map(str::to_string);
    }
    update
}

async fn on_intent_succeeded(ctx: &ServiceContext, event: &WebhookEvent) -> Result<WebhookDisposition, AppError> {
    let Some(payment) = payment_for_intent(ctx, &event.object).await? else {
        error!(event_id = %event.id, "CRITICAL: payment succeeded at the gateway but no local payment matches");
        return Ok(WebhookDisposition::Ignored("no matching payment".to_string()));
    };
    if !payment.status.can_transition_to(PaymentStatus::Succeeded) {
        return Ok(unexpected(&payment, PaymentStatus::Succeeded));
    }

    apply(
        ctx,
        &payment,
        with_intent(&payment, &event.object, PaymentStatus::Succeeded),
        PaymentStatus::Succeeded.as_str().to_string(),
        "Payment succeeded.".to_string(),
    )
    .await;

    let fallback = ctx.audit_email(&payment).await;
    match ticket_lines_for(ctx, payment.id).await {
        Ok(tickets) => send_confirmation(ctx, &payment, &fallback, &tickets).await,
        Err(e) => warn!(payment_id = %payment.id, error = %e, "Failed to load tickets for confirmation"),
    }

    Ok(WebhookDisposition::Applied)
}

async fn on_intent_failed(ctx: &ServiceContext, event: &WebhookEvent) -> Result<WebhookDisposition, AppError> {
    let Some(payment) = payment_for_intent(ctx, &event.object).await? else {
        return Ok(WebhookDisposition::Ignored("no matching payment".to_string()));
    };
    if !payment.status.can_transition_to(PaymentStatus::PaymentFailed) {
        return Ok(unexpected(&payment, PaymentStatus::PaymentFailed));
    }

    let last_error = event.object.get("last_payment_error");
    let reason = last_error
        .and_then(|e| str_field(e, "message"))
        .unwrap_or("Payment failed.")
        .to_string();
    let code = last_error
        .and_then(|e| str_field(e, "code"))
        .unwrap_or(PaymentStatus::PaymentFailed.as_str())
        .to_string();

    apply(
        ctx,
        &payment,
        with_intent(&payment, &event.object, PaymentStatus::PaymentFailed),
        code,
        reason.clone(),
    )
    .await;

    let fallback = ctx.audit_email(&payment).await;
    let (name, email) = ctx.recipient_for(payment.user_id, &fallback).await;
    let tickets = ticket_lines_for(ctx, payment.id).await.unwrap_or_else(|e| {
        warn!(payment_id = %payment.id, error = %e, "Failed to load tickets for failure notice");
        Vec::new()
    });
    if let Err(e) = ctx
        .deadline(ctx.notifier.send_payment_failed(&name, &email, &reason, &tickets))
        .await
    {
        warn!(payment_id = %payment.id, error = %e, "Failed to send payment failure email");
    }

    Ok(WebhookDisposition::Applied)
}

async fn on_intent_requires_action(
    ctx: &ServiceContext,
    event: &WebhookEvent,
) -> Result<WebhookDisposition, AppError> {
    let Some(payment) = payment_for_intent(ctx, &event.object).await? else {
        return Ok(WebhookDisposition::Ignored("no matching payment".to_string()));
    };
    if !payment.status.can_transition_to(PaymentStatus::RequiresAction) {
        return Ok(unexpected(&payment, PaymentStatus::RequiresAction));
    }

    apply(
        ctx,
        &payment,
        with_intent(&payment, &event.object, PaymentStatus::RequiresAction),
        PaymentStatus::RequiresAction.as_str().to_string(),
        "Payment requires further action.".to_string(),
    )
    .await;

    Ok(WebhookDisposition::Applied)
}

async fn on_charge_refunded(ctx: &ServiceContext, event: &WebhookEvent) -> Result<WebhookDisposition, AppError> {
    let Some(payment) = payment_for_refund(ctx, &event.object).await? else {
        return Ok(WebhookDisposition::Ignored("no matching payment".to_string()));
    };
    if payment.status != PaymentStatus::RefundPending {
        return Ok(unexpected(&payment, PaymentStatus::Refunded));
    }

    let update = PaymentUpdate {
        amount: Decimal::ZERO,
        ..PaymentUpdate::status_of(&payment, PaymentStatus::Refunded)
    };
    apply(
        ctx,
        &payment,
        update,
        PaymentStatus::Refunded.as_str().to_string(),
        "Refund confirmed by gateway webhook. Amount set to 0.00.".to_string(),
    )
    .await;

    Ok(WebhookDisposition::Applied)
}

async fn on_refund_failed(ctx: &ServiceContext, event: &WebhookEvent) -> Result<WebhookDisposition, AppError> {
    let Some(payment) = payment_for_refund(ctx, &event.object).await? else {
        return Ok(WebhookDisposition::Ignored("no matching payment".to_string()));
    };
    if !payment.status.can_transition_to(PaymentStatus::RefundFailed) {
        return Ok(unexpected(&payment, PaymentStatus::RefundFailed));
    }

    let reason = str_field(&event.object, "failure_reason").unwrap_or("Unknown reason");
    apply(
        ctx,
        &payment,
        PaymentUpdate::status_of(&payment, PaymentStatus::RefundFailed),
        PaymentStatus::RefundFailed.as_str().to_string(),
        format!("Refund failed: {reason}"),
    )
    .await;

    if let Err(e) = ctx.deadline(ctx.notifier.send_refund_error_alert()).await {
        warn!(payment_id = %payment.id, error = %e, "Failed to send refund error alert");
    }

    Ok(WebhookDisposition::Applied)
}
