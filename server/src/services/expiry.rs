use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::IntentStatus;
use crate::models::Payment;
use crate::services::{PaymentFailure, ServiceContext};
use crate::store::NewPaymentLog;
use crate::utils::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    NotExpired,
    Swept {
        payment_id: Uuid,
        message: String,
        /// Set when the remote intent could not be confirmed cancelled.
        remote_failure: Option<PaymentFailure>,
    },
}

impl SweepOutcome {
    /// Human-readable result; empty when nothing was swept.
    pub fn message(&self) -> &str {
        match self {
            SweepOutcome::NotExpired => "",
            SweepOutcome::Swept { message, .. } => message,
        }
    }
}

pub async fn sweep_expired_payment_by_id(
    ctx: &ServiceContext,
    payment_id: Uuid,
    actor_email: &str,
) -> Result<SweepOutcome, AppError> {
    let payment = ctx
        .store
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment {payment_id}")))?;

    sweep_expired_payment(ctx, &payment, actor_email).await
}

/// Gives an expired, unsettled payment's tickets back and deletes it, then best-effort
/// cancels the remote intent.
pub async fn sweep_expired_payment(
    ctx: &ServiceContext,
    payment: &Payment,
    actor_email: &str,
) -> Result<SweepOutcome, AppError> {
    let now = Utc::now();
    if !payment.is_expired_at(now) || payment.status.is_settled() {
        return Ok(SweepOutcome::NotExpired);
    }

    // The snapshot may be stale; the store re-checks under a row lock.
    if !ctx.store.delete_expired_payment(payment.id, now).await? {
        info!(payment_id = %payment.id, "Payment settled before it could be swept");
        return Ok(SweepOutcome::NotExpired);
    }
    info!(payment_id = %payment.id, "Expired payment deleted and tickets restored");

    let message = format!(
        "expired payment successfully deleted and restored tickets | ID: {}",
        payment.id
    );
    let remote_failure = match payment.intent_id() {
        Some(intent_id) => cancel_remote_intent(ctx, payment, intent_id, actor_email).await,
        None => None,
    };

    Ok(SweepOutcome::Swept {
        payment_id: payment.id,
        message,
        remote_failure,
    })
}

async fn cancel_remote_intent(
    ctx: &ServiceContext,
    payment: &Payment,
    intent_id: &str,
    actor_email: &str,
) -> Option<PaymentFailure> {
    let remote = match ctx.deadline(ctx.gateway.get_intent(intent_id)).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(payment_id = %payment.id, intent_id, error = %e, "Failed to fetch expired payment intent");
            return Some(PaymentFailure::from_gateway(payment.id, "get payment intent", &e));
        }
    };
    if remote.status == IntentStatus::Canceled {
        return None;
    }

    let (status, description, failure) = match ctx.deadline(ctx.gateway.cancel_intent(intent_id)).await {
        Ok(_) => ("cancelled".to_string(), "payment expired".to_string(), None),
        Err(e) => {
            warn!(payment_id = %payment.id, intent_id, error = %e, "Failed to cancel expired payment intent");
            let failure = PaymentFailure::from_gateway(payment.id, "cancel request", &e);
            (e.code().to_string(), e.message().to_string(), Some(failure))
        }
    };

    ctx.record_log(NewPaymentLog {
        payment_intent_id: intent_id.to_string(),
        payment_method_id: None,
        amount: payment.amount,
        status,
        description: Some(description),
        user_email: actor_email.to_string(),
        payment_id: payment.id,
    })
    .await;

    failure
}
