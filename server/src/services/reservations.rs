//! Reservation engine: validate and price a ticket request, reserve every unit inside one
//! transaction, then drive the payment intent.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::IntentRequest;
use crate::models::{EventDetailWithTitle, PaymentStatus, Reservation};
use crate::notifier::TicketLine;
use crate::pricing::{add_cents, cents_to_price, line_total_cents};
use crate::services::payments::{map_intent_result, send_confirmation, IntentOutcome, PaymentOutcome};
use crate::services::{ServiceContext, DEFAULT_CURRENCY};
use crate::store::{NewPayment, NewPaymentLog, NewReservation, PaymentUpdate, StoreError};
use crate::utils::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct TicketRequest {
    pub event_detail_id: Uuid,
    pub quantity: u32,
    /// Ticket holder address; the buyer's when absent.
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationRequest {
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub items: Vec<TicketRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationResult {
    pub reservations: Vec<Reservation>,
    pub payment: PaymentOutcome,
}

struct PricedRequest {
    details: HashMap<Uuid, EventDetailWithTitle>,
    total_cents: i64,
}

/// Checks every line before anything is written: the detail exists, enough tickets remain
/// for the combined quantity, and the show is still ahead.
async fn validate_and_price(ctx: &ServiceContext, items: &[TicketRequest]) -> Result<PricedRequest, AppError> {
    let mut requested: Vec<(Uuid, i64)> = Vec::new();
    for item in items.iter().filter(|item| item.quantity > 0) {
        match requested.iter_mut().find(|(id, _)| *id == item.event_detail_id) {
            Some((_, quantity)) => *quantity += i64::from(item.quantity),
            None => requested.push((item.event_detail_id, i64::from(item.quantity))),
        }
    }

    let ids: Vec<Uuid> = requested.iter().map(|(id, _)| *id).collect();
    let details: HashMap<Uuid, EventDetailWithTitle> = ctx
        .store
        .get_event_details_by_ids(&ids)
        .await?
        .into_iter()
        .map(|detail| (detail.id, detail))
        .collect();

    let now = Utc::now();
    let mut total_cents = 0i64;
    for (id, quantity) in &requested {
        let detail = details.get(id).ok_or(AppError::TicketNotFound(*id))?;
        if i64::from(detail.tickets_remaining) < *quantity {
            return Err(AppError::InsufficientTickets(*id));
        }
        if detail.show_date <= now {
            return Err(AppError::ShowDatePassed(*id));
        }
        total_cents = add_cents(total_cents, line_total_cents(detail.price, *quantity)?)?;
    }

    Ok(PricedRequest { details, total_cents })
}

pub async fn create_reservations(
    ctx: &ServiceContext,
    user_id: Uuid,
    user_email: &str,
    request: ReservationRequest,
) -> Result<ReservationResult, AppError> {
    let total_quantity: u64 = request.items.iter().map(|item| u64::from(item.quantity)).sum();
    if total_quantity == 0 {
        return Err(AppError::ValidationError("no tickets being reserved".to_string()));
    }

    let priced = validate_and_price(ctx, &request.items).await?;

    let payment_method = request
        .payment_method
        .as_deref()
        .map(str::trim)
        .filter(|method| !method.is_empty());
    if priced.total_cents > 0 && payment_method.is_none() {
        return Err(AppError::ValidationError("payment method is required".to_string()));
    }

    let currency = request
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|currency| !currency.is_empty())
        .unwrap_or(DEFAULT_CURRENCY)
        .to_lowercase();
    let amount = cents_to_price(priced.total_cents);

    let mut tx = ctx.store.begin().await?;
    let payment = tx
        .create_payment(NewPayment {
            id: Uuid::new_v4(),
            amount,
            currency,
            status: PaymentStatus::Pending,
            expires_at: Utc::now() + ctx.settings.payment_ttl,
            user_id,
        })
        .await?;

    let mut reservations = Vec::new();
    for item in request.items.iter().filter(|item| item.quantity > 0) {
        let email = item
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .unwrap_or(user_email);

        for _ in 0..item.quantity {
            let reserved = tx
                .reserve_ticket(NewReservation {
                    id: Uuid::new_v4(),
                    event_detail_id: item.event_detail_id,
                    email: email.to_string(),
                    user_id,
                    payment_id: payment.id,
                })
                .await;

            match reserved {
                Ok(reservation) => reservations.push(reservation),
                Err(StoreError::OutOfStock(id)) => {
                    warn!(event_detail_id = %id, payment_id = %payment.id, "Lost inventory race, rolling back");
                    return Err(AppError::ReservationConflict(format!(
                        "tickets for event detail {id} sold out while reserving, please try again"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    tx.commit().await?;

    let tickets: Vec<TicketLine> = reservations
        .iter()
        .filter_map(|reservation| priced.details.get(&reservation.event_detail_id))
        .map(TicketLine::from)
        .collect();

    let outcome = if priced.total_cents == 0 {
        IntentOutcome {
            status: PaymentStatus::Succeeded,
            intent_id: None,
            code: None,
            message: "free reservation successful".to_string(),
            client_secret: None,
            next_action: None,
        }
    } else {
        let payment_method = payment_method.unwrap_or_default().to_string();
        let result = ctx
            .deadline(ctx.gateway.create_or_update_intent(IntentRequest {
                amount_cents: priced.total_cents,
                currency: payment.currency.clone(),
                payment_method: payment_method.clone(),
                correlation_id: payment.id,
                intent_id: payment.intent_id().map(str::to_string),
            }))
            .await;
        let outcome = map_intent_result(result, ctx.settings.payment_ttl.num_minutes());

        ctx.record_log(NewPaymentLog {
            payment_intent_id: outcome.intent_id.clone().unwrap_or_default(),
            payment_method_id: Some(payment_method),
            amount,
            status: outcome.log_status(),
            description: Some(outcome.message.clone()),
            user_email: user_email.to_string(),
            payment_id: payment.id,
        })
        .await;

        outcome
    };

    match outcome.status {
        PaymentStatus::Canceled => {
            if let Err(e) = ctx.store.restore_tickets_and_delete_payment(payment.id).await {
                error!(payment_id = %payment.id, error = ?e,
                    "CRITICAL: payment cancelled by gateway but tickets were not restored");
                return Err(AppError::DatabaseError(e));
            }
            return Err(AppError::PaymentCanceled(outcome.message));
        }
        PaymentStatus::Succeeded => send_confirmation(ctx, &payment, user_email, &tickets).await,
        _ => {}
    }

    let update = PaymentUpdate {
        id: payment.id,
        amount,
        status: outcome.status,
        payment_intent_id: outcome.intent_id.clone(),
    };
    if let Err(e) = ctx.store.update_payment(update).await {
        error!(payment_id = %payment.id, status = %outcome.status, error = ?e,
            "CRITICAL: failed to persist final payment status, tickets stay reserved");
    }

    info!(
        payment_id = %payment.id,
        tickets = reservations.len(),
        status = %outcome.status,
        "Reservations created"
    );

    Ok(ReservationResult {
        reservations,
        payment: outcome.into_payment_outcome(&payment),
    })
}
