//! Refund/cancel fan-out for an event or event detail that is being deleted.

use std::collections::HashSet;

use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::RefundStatus;
use crate::models::PaymentStatus;
use crate::pricing::{cents_to_price, price_to_cents};
use crate::services::{NotificationFailure, PaymentFailure, ServiceContext};
use crate::store::{NewPaymentLog, PaidTicketLine, PaymentUpdate};
use crate::utils::AppError;

const REFUND_ACTION: &str = "refund request";
const CANCEL_ACTION: &str = "cancel request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundTarget {
    Event(Uuid),
    EventDetail(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedPayment {
    pub payment_id: Uuid,
    pub payment_intent_id: Option<String>,
    pub status: PaymentStatus,
    pub refunded_amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefundSummary {
    pub processed: Vec<ProcessedPayment>,
    pub payment_failures: Vec<PaymentFailure>,
    pub notification_failures: Vec<NotificationFailure>,
}

impl RefundSummary {
    /// True when any payment or notification in the batch failed.
    pub fn is_partial(&self) -> bool {
        !self.payment_failures.is_empty() || !self.notification_failures.is_empty()
    }
}

pub async fn refund_or_cancel_for_event(
    ctx: &ServiceContext,
    event_id: Uuid,
    owner_id: Uuid,
    actor_email: &str,
) -> Result<RefundSummary, AppError> {
    refund_or_cancel(ctx, RefundTarget::Event(event_id), owner_id, actor_email).await
}

pub async fn refund_or_cancel_for_event_detail(
    ctx: &ServiceContext,
    event_detail_id: Uuid,
    owner_id: Uuid,
    actor_email: &str,
) -> Result<RefundSummary, AppError> {
    refund_or_cancel(ctx, RefundTarget::EventDetail(event_detail_id), owner_id, actor_email).await
}

/// Terminal payments are left alone. A `refund pending` payment only has reservations
/// left for tickets its earlier refund did not cover.
fn needs_settling(status: PaymentStatus) -> bool {
    !status.is_terminal()
}

/// One line per payment intent. Lines without an intent are keyed by their payment.
fn unique_lines(lines: Vec<PaidTicketLine>) -> Vec<PaidTicketLine> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| needs_settling(line.status))
        .filter(|line| {
            let key = line
                .payment_intent_id
                .clone()
                .unwrap_or_else(|| line.payment_id.to_string());
            seen.insert(key)
        })
        .collect()
}

/// When the charge differs from the ticket's own price the checkout covered several
/// tickets, and only this ticket's price is given back. This approximates a split of
/// the shared charge.
fn refundable_amount(line: &PaidTicketLine) -> Decimal {
    if line.amount != line.ticket_price {
        line.ticket_price
    } else {
        line.amount
    }
}

pub async fn refund_or_cancel(
    ctx: &ServiceContext,
    target: RefundTarget,
    owner_id: Uuid,
    actor_email: &str,
) -> Result<RefundSummary, AppError> {
    let lines = match target {
        RefundTarget::Event(event_id) => ctx.store.get_paid_lines_for_event(event_id, owner_id).await?,
        RefundTarget::EventDetail(detail_id) => {
            ctx.store
                .get_paid_lines_for_event_detail(detail_id, owner_id)
                .await?
        }
    };
    let target_details: HashSet<Uuid> = lines.iter().map(|line| line.event_detail_id).collect();
    let lines = unique_lines(lines);
    if lines.is_empty() {
        return Ok(RefundSummary::default());
    }

    let settlements = lines.iter().map(|line| settle_line(ctx, line, actor_email));
    let results = join_all(settlements).await;

    let mut summary = RefundSummary::default();
    for (line, result) in lines.iter().zip(results) {
        match result {
            Ok(processed) => {
                let remaining = (line.amount - processed.refunded_amount).max(Decimal::ZERO);
                let refunding = matches!(
                    processed.status,
                    PaymentStatus::Refunded | PaymentStatus::RefundPending
                );
                let status = if refunding
                    && remaining > Decimal::ZERO
                    && holds_other_tickets(ctx, line.payment_id, &target_details).await
                {
                    PaymentStatus::Succeeded
                } else {
                    processed.status
                };
                let update = PaymentUpdate {
                    id: line.payment_id,
                    amount: remaining,
                    status,
                    payment_intent_id: line.payment_intent_id.clone(),
                };
                if let Err(e) = ctx.store.update_payment(update).await {
                    error!(payment_id = %line.payment_id, status = %status, error = ?e,
                        "CRITICAL: gateway settled payment but local status was not updated");
                }
                summary.processed.push(processed);
            }
            Err(failure) => summary.payment_failures.push(failure),
        }
    }

    summary.notification_failures = notify_buyers(ctx, &lines, &summary.processed).await;

    info!(
        refund_target = ?target,
        processed = summary.processed.len(),
        payment_failures = summary.payment_failures.len(),
        notification_failures = summary.notification_failures.len(),
        "Refund/cancel batch finished"
    );
    Ok(summary)
}

/// Refunds a captured payment or cancels an in-flight one. Writes one audit row.
async fn settle_line(
    ctx: &ServiceContext,
    line: &PaidTicketLine,
    actor_email: &str,
) -> Result<ProcessedPayment, PaymentFailure> {
    let amount = refundable_amount(line);
    let intent_id = line.payment_intent_id.clone();
    let settled = |status: PaymentStatus, refunded_amount: Decimal| ProcessedPayment {
        payment_id: line.payment_id,
        payment_intent_id: intent_id.clone(),
        status,
        refunded_amount,
    };

    let (result, log_status, description) = match (line.status, intent_id.as_deref()) {
        (PaymentStatus::Succeeded | PaymentStatus::RefundPending, Some(intent)) if amount > Decimal::ZERO => {
            let cents = price_to_cents(amount).map_err(|e| PaymentFailure {
                payment_id: line.payment_id,
                action: REFUND_ACTION.to_string(),
                code: "invalid_amount".to_string(),
                message: e.to_string(),
            })?;

            match ctx.deadline(ctx.gateway.refund(cents, intent)).await {
                Ok(receipt) => match receipt.status {
                    RefundStatus::Succeeded => (
                        Ok(settled(PaymentStatus::Refunded, cents_to_price(cents))),
                        PaymentStatus::Refunded.as_str().to_string(),
                        format!("Event cancelled, refunded {}.", cents_to_price(cents)),
                    ),
                    RefundStatus::Failed | RefundStatus::Canceled => {
                        let reason = receipt.failure_reason.unwrap_or_else(|| "Unknown reason".to_string());
                        mark_refund_failed(ctx, line).await;
                        (
                            Err(PaymentFailure {
                                payment_id: line.payment_id,
                                action: REFUND_ACTION.to_string(),
                                code: "refund_failed".to_string(),
                                message: reason.clone(),
                            }),
                            PaymentStatus::RefundFailed.as_str().to_string(),
                            format!("Refund failed: {reason}"),
                        )
                    }
                    RefundStatus::Pending | RefundStatus::RequiresAction | RefundStatus::Unknown => (
                        Ok(settled(PaymentStatus::RefundPending, Decimal::ZERO)),
                        PaymentStatus::RefundPending.as_str().to_string(),
                        "Event cancelled, refund pending.".to_string(),
                    ),
                },
                Err(e) => {
                    warn!(payment_id = %line.payment_id, intent_id = intent, error = %e, "Refund request failed");
                    (
                        Err(PaymentFailure::from_gateway(line.payment_id, REFUND_ACTION, &e)),
                        e.code().to_string(),
                        e.message().to_string(),
                    )
                }
            }
        }
        // Free tickets never reached the gateway.
        (PaymentStatus::Succeeded | PaymentStatus::RefundPending, _) => (
            Ok(settled(PaymentStatus::Refunded, Decimal::ZERO)),
            PaymentStatus::Refunded.as_str().to_string(),
            "Event cancelled, free reservation released.".to_string(),
        ),
        (_, Some(intent)) => match ctx.deadline(ctx.gateway.cancel_intent(intent)).await {
            Ok(_) => (
                Ok(settled(PaymentStatus::Canceled, Decimal::ZERO)),
                PaymentStatus::Canceled.as_str().to_string(),
                "Event cancelled, payment intent cancelled.".to_string(),
            ),
            Err(e) => {
                warn!(payment_id = %line.payment_id, intent_id = intent, error = %e, "Cancel request failed");
                (
                    Err(PaymentFailure::from_gateway(line.payment_id, CANCEL_ACTION, &e)),
                    e.code().to_string(),
                    e.message().to_string(),
                )
            }
        },
        (_, None) => (
            Ok(settled(PaymentStatus::Canceled, Decimal::ZERO)),
            PaymentStatus::Canceled.as_str().to_string(),
            "Event cancelled before payment was submitted.".to_string(),
        ),
    };

    ctx.record_log(NewPaymentLog {
        payment_intent_id: intent_id.clone().unwrap_or_default(),
        payment_method_id: None,
        amount,
        status: log_status,
        description: Some(description),
        user_email: actor_email.to_string(),
        payment_id: line.payment_id,
    })
    .await;

    result
}

/// True when the payment still pays for tickets outside the deletion target. Such a
/// payment stays `succeeded` so a later deletion can settle the rest.
async fn holds_other_tickets(ctx: &ServiceContext, payment_id: Uuid, target_details: &HashSet<Uuid>) -> bool {
    match ctx.store.get_reservations_by_payment_id(payment_id).await {
        Ok(reservations) => reservations
            .iter()
            .any(|reservation| !target_details.contains(&reservation.event_detail_id)),
        Err(e) => {
            error!(payment_id = %payment_id, error = ?e, "Failed to load reservations of refunded payment");
            false
        }
    }
}

async fn mark_refund_failed(ctx: &ServiceContext, line: &PaidTicketLine) {
    let update = PaymentUpdate {
        id: line.payment_id,
        amount: line.amount,
        status: PaymentStatus::RefundFailed,
        payment_intent_id: line.payment_intent_id.clone(),
    };
    if let Err(e) = ctx.store.update_payment(update).await {
        error!(payment_id = %line.payment_id, error = ?e, "CRITICAL: failed to record refund failure");
    }
    if let Err(e) = ctx.deadline(ctx.notifier.send_refund_error_alert()).await {
        warn!(payment_id = %line.payment_id, error = %e, "Failed to send refund error alert");
    }
}

/// One mail per affected buyer, describing the first of their processed tickets.
async fn notify_buyers(
    ctx: &ServiceContext,
    lines: &[PaidTicketLine],
    processed: &[ProcessedPayment],
) -> Vec<NotificationFailure> {
    let payment_ids: Vec<Uuid> = processed.iter().map(|p| p.payment_id).collect();
    if payment_ids.is_empty() {
        return Vec::new();
    }

    let payments = match ctx.store.get_payments_by_ids(&payment_ids).await {
        Ok(payments) => payments,
        Err(e) => {
            error!(error = ?e, "Failed to load processed payments for notification");
            return vec![NotificationFailure {
                user_id: None,
                email: None,
                message: format!("failed to load processed payments: {e}"),
            }];
        }
    };

    let mut notified = HashSet::new();
    let mut targets: Vec<(Uuid, &PaidTicketLine)> = Vec::new();
    for payment in &payments {
        if !notified.insert(payment.user_id) {
            continue;
        }
        if let Some(line) = lines.iter().find(|line| line.payment_id == payment.id) {
            targets.push((payment.user_id, line));
        }
    }

    let sends = targets.into_iter().map(|(user_id, line)| async move {
        let user = match ctx.store.get_user_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                return Err(NotificationFailure {
                    user_id: Some(user_id),
                    email: None,
                    message: "user not found".to_string(),
                })
            }
            Err(e) => {
                return Err(NotificationFailure {
                    user_id: Some(user_id),
                    email: None,
                    message: e.to_string(),
                })
            }
        };

        ctx.deadline(ctx.notifier.send_refund_or_cancelled(
            &user.full_name(),
            &user.email,
            &line.title,
            &line.ticket_description,
        ))
        .await
        .map_err(|e| {
            warn!(user_id = %user_id, error = %e, "Failed to send refund/cancel notice");
            NotificationFailure {
                user_id: Some(user_id),
                email: Some(user.email.clone()),
                message: e.to_string(),
            }
        })
    });

    join_all(sends)
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect()
}
