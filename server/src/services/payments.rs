//! Intent outcome mapping, payment resubmission, buyer-initiated refunds, and payment reads.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{GatewayError, Intent, IntentRequest, IntentStatus, RefundStatus};
use crate::models::{Payment, PaymentStatus};
use crate::notifier::TicketLine;
use crate::pricing::{add_cents, cents_to_price, price_to_cents};
use crate::services::expiry::{sweep_expired_payment, SweepOutcome};
use crate::services::ServiceContext;
use crate::store::{NewPaymentLog, PaymentUpdate};
use crate::utils::AppError;

/// What the caller is told about a payment after talking to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub id: Uuid,
    pub status: PaymentStatus,
    /// Gateway error code when the attempt was declined or failed.
    pub code: Option<String>,
    pub message: String,
    pub client_secret: Option<String>,
    pub next_action: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Local view of one create/update-intent call.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentOutcome {
    pub status: PaymentStatus,
    pub intent_id: Option<String>,
    pub code: Option<String>,
    pub message: String,
    pub client_secret: Option<String>,
    pub next_action: Option<String>,
}

impl IntentOutcome {
    pub fn into_payment_outcome(self, payment: &Payment) -> PaymentOutcome {
        PaymentOutcome {
            id: payment.id,
            status: self.status,
            code: self.code,
            message: self.message,
            client_secret: self.client_secret,
            next_action: self.next_action,
            expires_at: payment.expires_at,
        }
    }

    /// Status string written to the audit row: the gateway code on failure.
    pub fn log_status(&self) -> String {
        self.code
            .clone()
            .unwrap_or_else(|| self.status.as_str().to_string())
    }
}

pub fn map_intent_result(result: Result<Intent, GatewayError>, ttl_minutes: i64) -> IntentOutcome {
    match result {
        Ok(intent) => {
            let (status, message) = match intent.status {
                IntentStatus::Succeeded => (PaymentStatus::Succeeded, "payment successful".to_string()),
                IntentStatus::RequiresAction => (
                    PaymentStatus::RequiresAction,
                    format!("complete payment within next {ttl_minutes} minutes"),
                ),
                IntentStatus::Processing => (
                    PaymentStatus::Processing,
                    "payment processing, we'll send you an email once payment succeeded".to_string(),
                ),
                IntentStatus::RequiresPaymentMethod => (
                    PaymentStatus::RequiresPaymentMethod,
                    "please submit new payment method".to_string(),
                ),
                IntentStatus::Canceled => (
                    PaymentStatus::Canceled,
                    "payment expired, please rebook your tickets".to_string(),
                ),
                IntentStatus::RequiresConfirmation | IntentStatus::RequiresCapture | IntentStatus::Unknown => (
                    PaymentStatus::Pending,
                    "please refer to next action and status".to_string(),
                ),
            };
            let continuation = matches!(
                status,
                PaymentStatus::RequiresAction | PaymentStatus::Pending
            );

            IntentOutcome {
                status,
                intent_id: Some(intent.id),
                code: None,
                message,
                client_secret: intent.client_secret.filter(|_| continuation),
                next_action: intent.next_action,
            }
        }
        Err(GatewayError::Declined {
            code,
            message,
            intent_id,
        }) => IntentOutcome {
            status: PaymentStatus::PaymentFailed,
            intent_id,
            code: Some(code),
            message,
            client_secret: None,
            next_action: None,
        },
        // Payment stays pending; the sweep reclaims the tickets if nobody retries.
        Err(err) => IntentOutcome {
            status: PaymentStatus::Pending,
            intent_id: None,
            code: Some(err.code().to_string()),
            message: err.message().to_string(),
            client_secret: None,
            next_action: None,
        },
    }
}

/// Ticket lines for a payment's reservations, one per booked unit.
pub async fn ticket_lines_for(ctx: &ServiceContext, payment_id: Uuid) -> Result<Vec<TicketLine>, AppError> {
    let reservations = ctx.store.get_reservations_by_payment_id(payment_id).await?;
    let mut detail_ids: Vec<Uuid> = reservations.iter().map(|r| r.event_detail_id).collect();
    detail_ids.sort();
    detail_ids.dedup();

    let details = ctx.store.get_event_details_by_ids(&detail_ids).await?;
    Ok(reservations
        .iter()
        .filter_map(|reservation| {
            details
                .iter()
                .find(|detail| detail.id == reservation.event_detail_id)
                .map(TicketLine::from)
        })
        .collect())
}

pub async fn send_confirmation(ctx: &ServiceContext, payment: &Payment, fallback_email: &str, tickets: &[TicketLine]) {
    let (name, email) = ctx.recipient_for(payment.user_id, fallback_email).await;
    if let Err(e) = ctx
        .deadline(ctx.notifier.send_confirmation(&name, &email, tickets))
        .await
    {
        warn!(payment_id = %payment.id, error = %e, "Failed to send confirmation email");
    }
}

pub async fn get_user_payment(ctx: &ServiceContext, payment_id: Uuid, user_id: Uuid) -> Result<Payment, AppError> {
    ctx.store
        .get_user_payment(payment_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment {payment_id}")))
}

pub async fn get_user_payments(ctx: &ServiceContext, user_id: Uuid) -> Result<Vec<Payment>, AppError> {
    Ok(ctx.store.get_user_payments(user_id).await?)
}

/// Re-confirms an existing intent with a new payment method.
pub async fn update_payment(
    ctx: &ServiceContext,
    payment_id: Uuid,
    user_id: Uuid,
    user_email: &str,
    payment_method: &str,
) -> Result<PaymentOutcome, AppError> {
    let payment = get_user_payment(ctx, payment_id, user_id).await?;

    if let SweepOutcome::Swept { message, .. } = sweep_expired_payment(ctx, &payment, user_email).await? {
        return Err(AppError::PaymentExpired(message));
    }

    if payment.status.is_settled() {
        return Err(AppError::ValidationError(format!(
            "payment is already {}",
            payment.status
        )));
    }
    let Some(intent_id) = payment.intent_id().map(str::to_string) else {
        return Err(AppError::ValidationError(
            "payment record has no linked payment intent".to_string(),
        ));
    };
    if payment_method.trim().is_empty() {
        return Err(AppError::ValidationError("payment method is required".to_string()));
    }
    let amount_cents = payment.amount_cents()?;

    let result = ctx
        .deadline(ctx.gateway.create_or_update_intent(IntentRequest {
            amount_cents,
            currency: payment.currency.clone(),
            payment_method: payment_method.to_string(),
            correlation_id: payment.id,
            intent_id: Some(intent_id.clone()),
        }))
        .await;
    let mut outcome = map_intent_result(result, ctx.settings.payment_ttl.num_minutes());
    let intent_id = outcome.intent_id.clone().unwrap_or(intent_id);

    ctx.record_log(NewPaymentLog {
        payment_intent_id: intent_id.clone(),
        payment_method_id: Some(payment_method.to_string()),
        amount: payment.amount,
        status: outcome.log_status(),
        description: Some(outcome.message.clone()),
        user_email: user_email.to_string(),
        payment_id: payment.id,
    })
    .await;

    if outcome.status == PaymentStatus::Canceled {
        ctx.store.restore_tickets_and_delete_payment(payment.id).await?;
        return Err(AppError::PaymentCanceled(outcome.message));
    }

    if outcome.status == PaymentStatus::Succeeded {
        match ticket_lines_for(ctx, payment.id).await {
            Ok(tickets) => send_confirmation(ctx, &payment, user_email, &tickets).await,
            Err(e) => warn!(payment_id = %payment.id, error = %e, "Failed to load tickets for confirmation"),
        }
    }

    // A transport failure leaves the stored status as it was.
    if outcome.status == PaymentStatus::Pending && outcome.code.is_some() {
        outcome.status = payment.status;
    }

    let update = PaymentUpdate {
        id: payment.id,
        amount: payment.amount,
        status: outcome.status,
        payment_intent_id: Some(intent_id),
    };
    if let Err(e) = ctx.store.update_payment(update).await {
        error!(payment_id = %payment.id, status = %outcome.status, error = ?e,
            "CRITICAL: failed to persist payment status after gateway update");
    }

    info!(payment_id = %payment.id, status = %outcome.status, "Payment updated");
    Ok(outcome.into_payment_outcome(&payment))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundedTicket {
    pub reservation_id: Uuid,
    pub event_detail_id: Uuid,
    pub title: String,
    pub ticket_description: String,
    pub show_date: DateTime<Utc>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub message: String,
    pub refunded: Vec<RefundedTicket>,
}

/// Refunds every ticket on the payment whose show is still outside the refund window.
pub async fn refund_payment(
    ctx: &ServiceContext,
    payment_id: Uuid,
    user_id: Uuid,
    user_email: &str,
) -> Result<RefundResponse, AppError> {
    let details = ctx
        .store
        .get_payment_reservation_details(payment_id, user_id)
        .await?;
    let Some(first) = details.first() else {
        return Err(AppError::NotFound(format!("payment {payment_id}")));
    };

    if first.status != PaymentStatus::Succeeded {
        return Err(AppError::ValidationError(format!(
            "only succeeded payments can be refunded, payment is {}",
            first.status
        )));
    }

    let cutoff = Utc::now() + ctx.settings.refund_window;
    let eligible: Vec<_> = details.iter().filter(|d| d.show_date > cutoff).collect();
    if eligible.is_empty() {
        return Err(AppError::ValidationError(format!(
            "no reservations eligible for refund, shows within {} hours cannot be refunded",
            ctx.settings.refund_window.num_hours()
        )));
    }

    let mut total_cents = 0i64;
    for detail in &eligible {
        total_cents = add_cents(total_cents, price_to_cents(detail.price)?)?;
    }

    let amount = first.amount;
    let intent_id = first.payment_intent_id.clone().unwrap_or_default();
    let (status, message, accepted) = if total_cents == 0 {
        (PaymentStatus::Refunded, "Free reservation cancelled.".to_string(), true)
    } else if intent_id.is_empty() {
        return Err(AppError::ValidationError(
            "payment record has no linked payment intent".to_string(),
        ));
    } else {
        match ctx.deadline(ctx.gateway.refund(total_cents, &intent_id)).await {
            Ok(receipt) => match receipt.status {
                RefundStatus::Succeeded => (PaymentStatus::Refunded, "Refund successful.".to_string(), true),
                RefundStatus::Failed | RefundStatus::Canceled => {
                    let reason = receipt.failure_reason.unwrap_or_else(|| "Unknown reason".to_string());
                    (PaymentStatus::RefundFailed, format!("Refund failed: {reason}"), false)
                }
                RefundStatus::Pending | RefundStatus::RequiresAction | RefundStatus::Unknown => (
                    PaymentStatus::RefundPending,
                    "Refund initiated. Status is pending, confirmation will be sent via webhook.".to_string(),
                    true,
                ),
            },
            Err(e) => {
                warn!(payment_id = %payment_id, error = %e, "Refund request failed");
                (PaymentStatus::RefundFailed, format!("Refund failed: {}", e.message()), false)
            }
        }
    };

    ctx.record_log(NewPaymentLog {
        payment_intent_id: intent_id.clone(),
        payment_method_id: None,
        amount: cents_to_price(total_cents),
        status: status.as_str().to_string(),
        description: Some(message.clone()),
        user_email: user_email.to_string(),
        payment_id,
    })
    .await;

    let mut refunded = Vec::new();
    if accepted {
        let restores = eligible.iter().map(|detail| async move {
            let result = ctx
                .store
                .refund_reservation_and_restore_ticket(detail.reservation_id)
                .await;
            (*detail, result)
        });
        for (detail, result) in join_all(restores).await {
            match result {
                Ok(()) => refunded.push(RefundedTicket {
                    reservation_id: detail.reservation_id,
                    event_detail_id: detail.event_detail_id,
                    title: detail.title.clone(),
                    ticket_description: detail.ticket_description.clone(),
                    show_date: detail.show_date,
                    amount: detail.price,
                }),
                Err(e) => error!(payment_id = %payment_id, reservation_id = %detail.reservation_id, error = ?e,
                    "CRITICAL: refund accepted but ticket was not restored"),
            }
        }
    } else if let Err(e) = ctx.deadline(ctx.notifier.send_refund_error_alert()).await {
        warn!(payment_id = %payment_id, error = %e, "Failed to send refund error alert");
    }

    // Tickets inside the refund window are still paid for, so the payment stays open.
    let partial = accepted && eligible.len() < details.len();
    let stored_status = if partial { PaymentStatus::Succeeded } else { status };
    let remaining = if partial || status == PaymentStatus::Refunded {
        (amount - cents_to_price(total_cents)).max(Decimal::ZERO)
    } else {
        amount
    };
    let update = PaymentUpdate {
        id: payment_id,
        amount: remaining,
        status: stored_status,
        payment_intent_id: first.payment_intent_id.clone(),
    };
    if let Err(e) = ctx.store.update_payment(update).await {
        error!(payment_id = %payment_id, status = %stored_status, error = ?e,
            "CRITICAL: failed to update payment status after refund");
    }

    Ok(RefundResponse {
        payment_id,
        status,
        message,
        refunded,
    })
}
