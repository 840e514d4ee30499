//! Owner-side event flows that touch money: deletion with refund/cancel, and the
//! updated-event broadcast.

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::Event;
use crate::services::refunds::{refund_or_cancel, RefundSummary, RefundTarget};
use crate::services::{NotificationFailure, PaymentFailure, ServiceContext};
use crate::utils::AppError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteSummary {
    pub payment_failures: Vec<PaymentFailure>,
    pub notification_failures: Vec<NotificationFailure>,
}

impl DeleteSummary {
    pub fn is_partial(&self) -> bool {
        !self.payment_failures.is_empty() || !self.notification_failures.is_empty()
    }
}

impl From<RefundSummary> for DeleteSummary {
    fn from(summary: RefundSummary) -> Self {
        Self {
            payment_failures: summary.payment_failures,
            notification_failures: summary.notification_failures,
        }
    }
}

/// Refund failures never block the deletion; they are reported in the summary.
async fn settle_before_delete(
    ctx: &ServiceContext,
    target: RefundTarget,
    owner_id: Uuid,
    owner_email: &str,
) -> DeleteSummary {
    match refund_or_cancel(ctx, target, owner_id, owner_email).await {
        Ok(summary) => summary.into(),
        Err(e) => {
            error!(refund_target = ?target, error = %e, "Refund/cancel batch failed, deleting anyway");
            DeleteSummary::default()
        }
    }
}

pub async fn delete_event(
    ctx: &ServiceContext,
    event_id: Uuid,
    owner_id: Uuid,
    owner_email: &str,
) -> Result<DeleteSummary, AppError> {
    let summary = settle_before_delete(ctx, RefundTarget::Event(event_id), owner_id, owner_email).await;

    if !ctx.store.delete_event(event_id, owner_id).await? {
        return Err(AppError::NotFound(format!("event {event_id}")));
    }

    info!(event_id = %event_id, partial = summary.is_partial(), "Event deleted");
    Ok(summary)
}

pub async fn delete_event_detail(
    ctx: &ServiceContext,
    event_id: Uuid,
    event_detail_id: Uuid,
    owner_id: Uuid,
    owner_email: &str,
) -> Result<DeleteSummary, AppError> {
    let summary = settle_before_delete(
        ctx,
        RefundTarget::EventDetail(event_detail_id),
        owner_id,
        owner_email,
    )
    .await;

    if !ctx
        .store
        .delete_event_detail(event_id, event_detail_id, owner_id)
        .await?
    {
        return Err(AppError::NotFound(format!("event detail {event_detail_id}")));
    }

    info!(event_id = %event_id, event_detail_id = %event_detail_id, partial = summary.is_partial(),
        "Event detail deleted");
    Ok(summary)
}

/// Mails every holder of a confirmed ticket that the event changed.
pub async fn notify_event_updated(
    ctx: &ServiceContext,
    event: &Event,
) -> Result<Vec<NotificationFailure>, AppError> {
    let recipients = ctx.store.get_event_confirmed_recipients(event.id).await?;

    let sends = recipients.iter().map(|recipient| async move {
        ctx.deadline(
            ctx.notifier
                .send_event_updated(&recipient.name, &recipient.email, event),
        )
        .await
        .map_err(|e| {
            warn!(event_id = %event.id, email = %recipient.email, error = %e, "Failed to send event update");
            NotificationFailure {
                user_id: None,
                email: Some(recipient.email.clone()),
                message: e.to_string(),
            }
        })
    });

    Ok(join_all(sends)
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect())
}
