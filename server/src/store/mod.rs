//! Persistence boundary.
//!
//! Services only talk to [`Store`]; the Postgres adapter lives in [`postgres`].
//! Every operation that touches ticket inventory is atomic inside the adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{EventDetailWithTitle, Payment, PaymentLog, PaymentStatus, Reservation, User};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no tickets remaining for event detail {0}")]
    OutOfStock(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub expires_at: DateTime<Utc>,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: Uuid,
    pub event_detail_id: Uuid,
    pub email: String,
    pub user_id: Uuid,
    pub payment_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_intent_id: Option<String>,
}

impl PaymentUpdate {
    /// Same amount and intent, new status.
    pub fn status_of(payment: &Payment, status: PaymentStatus) -> Self {
        Self {
            id: payment.id,
            amount: payment.amount,
            status,
            payment_intent_id: payment.payment_intent_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentLog {
    pub payment_intent_id: String,
    pub payment_method_id: Option<String>,
    pub amount: Decimal,
    pub status: String,
    pub description: Option<String>,
    pub user_email: String,
    pub payment_id: Uuid,
}

/// One reservation row on a deletion target, joined with its payment.
#[derive(Debug, Clone, FromRow)]
pub struct PaidTicketLine {
    pub payment_id: Uuid,
    pub payment_intent_id: Option<String>,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub user_id: Uuid,
    pub event_detail_id: Uuid,
    pub ticket_price: Decimal,
    pub title: String,
    pub ticket_description: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentReservationDetail {
    pub payment_id: Uuid,
    pub payment_intent_id: Option<String>,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub user_id: Uuid,
    pub reservation_id: Uuid,
    pub event_detail_id: Uuid,
    pub show_date: DateTime<Utc>,
    pub price: Decimal,
    pub title: String,
    pub ticket_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, FromRow)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

/// Transaction scope used by the reservation engine. Dropping it without
/// [`StoreTransaction::commit`] rolls everything back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn create_payment(&mut self, payment: NewPayment) -> StoreResult<Payment>;

    /// Conditional decrement: fails with [`StoreError::OutOfStock`] when the last
    /// ticket is already gone.
    async fn reserve_ticket(&mut self, reservation: NewReservation) -> StoreResult<Reservation>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

    async fn get_user_payment(&self, payment_id: Uuid, user_id: Uuid) -> StoreResult<Option<Payment>>;

    async fn get_user_payments(&self, user_id: Uuid) -> StoreResult<Vec<Payment>>;

    async fn get_payment_by_intent_id(&self, intent_id: &str) -> StoreResult<Option<Payment>>;

    async fn get_payments_by_ids(&self, payment_ids: &[Uuid]) -> StoreResult<Vec<Payment>>;

    async fn update_payment(&self, update: PaymentUpdate) -> StoreResult<Payment>;

    async fn create_payment_log(&self, log: NewPaymentLog) -> StoreResult<PaymentLog>;

    /// Gives every ticket held by the payment back to its event detail, then deletes
    /// the reservations and the payment, all in one transaction.
    async fn restore_tickets_and_delete_payment(&self, payment_id: Uuid) -> StoreResult<()>;

    /// Same as [`Store::restore_tickets_and_delete_payment`], but only while the payment
    /// row, locked for the check, is still unsettled and expired before `now`. Returns
    /// false and changes nothing otherwise.
    async fn delete_expired_payment(&self, payment_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Deletes one reservation and returns its ticket to the pool.
    async fn refund_reservation_and_restore_ticket(&self, reservation_id: Uuid) -> StoreResult<()>;

    async fn get_event_details_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<EventDetailWithTitle>>;

    async fn get_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn get_reservations_by_payment_id(&self, payment_id: Uuid) -> StoreResult<Vec<Reservation>>;

    async fn get_payment_reservation_details(
        &self,
        payment_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<PaymentReservationDetail>>;

    async fn get_paid_lines_for_event(&self, event_id: Uuid, owner_id: Uuid) -> StoreResult<Vec<PaidTicketLine>>;

    async fn get_paid_lines_for_event_detail(
        &self,
        event_detail_id: Uuid,
        owner_id: Uuid,
    ) -> StoreResult<Vec<PaidTicketLine>>;

    async fn get_event_confirmed_recipients(&self, event_id: Uuid) -> StoreResult<Vec<Recipient>>;

    async fn delete_event(&self, event_id: Uuid, owner_id: Uuid) -> StoreResult<bool>;

    async fn delete_event_detail(
        &self,
        event_id: Uuid,
        event_detail_id: Uuid,
        owner_id: Uuid,
    ) -> StoreResult<bool>;
}
