use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{EventDetailWithTitle, Payment, PaymentLog, PaymentStatus, Reservation, User};
use crate::store::{
    NewPayment, NewPaymentLog, NewReservation, PaidTicketLine, PaymentReservationDetail,
    PaymentUpdate, Recipient, Store, StoreError, StoreResult, StoreTransaction,
};

const PAYMENT_COLUMNS: &str = "id, payment_intent_id, amount, currency, status, expires_at, \
                               user_id, created_at, updated_at";

const PAID_LINE_SELECT: &str = "SELECT p.id AS payment_id, p.payment_intent_id, p.amount, p.status, \
            p.user_id, ed.id AS event_detail_id, ed.price AS ticket_price, e.title, \
            ed.ticket_description
     FROM reservations r
     JOIN payments p ON p.id = r.payment_id
     JOIN event_details ed ON ed.id = r.event_detail_id
     JOIN events e ON e.id = ed.event_id";

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn create_payment(&mut self, payment: NewPayment) -> StoreResult<Payment> {
        let query = format!(
            "INSERT INTO payments (id, amount, currency, status, expires_at, user_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             RETURNING {PAYMENT_COLUMNS}"
        );

        let created = sqlx::query_as::<_, Payment>(&query)
            .bind(payment.id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.status.as_str())
            .bind(payment.expires_at)
            .bind(payment.user_id)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(created)
    }

    async fn reserve_ticket(&mut self, reservation: NewReservation) -> StoreResult<Reservation> {
        // Decrement and insert in one statement; no row back means the pool is empty.
        let reserved = sqlx::query_as::<_, Reservation>(
            "WITH decremented AS (
                 UPDATE event_details
                 SET tickets_remaining = tickets_remaining - 1, updated_at = NOW()
                 WHERE id = $2 AND tickets_remaining > 0
                 RETURNING id
             )
             INSERT INTO reservations (id, email, user_id, event_detail_id, payment_id, created_at)
             SELECT $1, $3, $4, decremented.id, $5, NOW() FROM decremented
             RETURNING id, email, user_id, event_detail_id, payment_id, created_at, updated_at",
        )
        .bind(reservation.id)
        .bind(reservation.event_detail_id)
        .bind(&reservation.email)
        .bind(reservation.user_id)
        .bind(reservation.payment_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        reserved.ok_or(StoreError::OutOfStock(reservation.event_detail_id))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let payment = sqlx::query_as::<_, Payment>(&query)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn get_user_payment(&self, payment_id: Uuid, user_id: Uuid) -> StoreResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 AND user_id = $2");
        let payment = sqlx::query_as::<_, Payment>(&query)
            .bind(payment_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn get_user_payments(&self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let payments = sqlx::query_as::<_, Payment>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    async fn get_payment_by_intent_id(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_intent_id = $1");
        let payment = sqlx::query_as::<_, Payment>(&query)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn get_payments_by_ids(&self, payment_ids: &[Uuid]) -> StoreResult<Vec<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ANY($1)");
        let payments = sqlx::query_as::<_, Payment>(&query)
            .bind(payment_ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    async fn update_payment(&self, update: PaymentUpdate) -> StoreResult<Payment> {
        let query = format!(
            "UPDATE payments
             SET amount = $2, status = $3, payment_intent_id = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING {PAYMENT_COLUMNS}"
        );
        let payment = sqlx::query_as::<_, Payment>(&query)
            .bind(update.id)
            .bind(update.amount)
            .bind(update.status.as_str())
            .bind(update.payment_intent_id.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        payment.ok_or_else(|| StoreError::NotFound(format!("payment {}", update.id)))
    }

    async fn create_payment_log(&self, log: NewPaymentLog) -> StoreResult<PaymentLog> {
        let created = sqlx::query_as::<_, PaymentLog>(
            "INSERT INTO payment_logs
                 (id, payment_intent_id, payment_method_id, amount, status, description,
                  user_email, payment_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
             RETURNING id, payment_intent_id, payment_method_id, amount, status, description,
                       user_email, payment_id, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&log.payment_intent_id)
        .bind(log.payment_method_id.as_deref())
        .bind(log.amount)
        .bind(&log.status)
        .bind(log.description.as_deref())
        .bind(&log.user_email)
        .bind(log.payment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn restore_tickets_and_delete_payment(&self, payment_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        if !restore_and_delete(&mut tx, payment_id).await? {
            return Err(StoreError::NotFound(format!("payment {payment_id}")));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_expired_payment(&self, payment_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT status, expires_at FROM payments WHERE id = $1 FOR UPDATE")
                .bind(payment_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((status, expires_at)) = row else {
            return Ok(false);
        };
        // Unknown statuses are treated as settled.
        let settled = status
            .parse::<PaymentStatus>()
            .map_or(true, |status| status.is_settled());
        if settled || expires_at >= now {
            return Ok(false);
        }

        let deleted = restore_and_delete(&mut tx, payment_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn refund_reservation_and_restore_ticket(&self, reservation_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let event_detail_id: Option<Uuid> = sqlx::query_scalar(
            "DELETE FROM reservations WHERE id = $1 RETURNING event_detail_id",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let event_detail_id = event_detail_id
            .ok_or_else(|| StoreError::NotFound(format!("reservation {reservation_id}")))?;

        sqlx::query(
            "UPDATE event_details
             SET tickets_remaining = LEAST(number_of_tickets, tickets_remaining + 1),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(event_detail_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_event_details_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<EventDetailWithTitle>> {
        let details = sqlx::query_as::<_, EventDetailWithTitle>(
            "SELECT ed.id, ed.event_id, e.title, ed.show_date, ed.price, ed.tickets_remaining,
                    ed.ticket_description
             FROM event_details ed
             JOIN events e ON e.id = ed.event_id
             WHERE ed.id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(details)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, firstname, lastname, email, password, created_at, updated_at
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_reservations_by_payment_id(&self, payment_id: Uuid) -> StoreResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            "SELECT id, email, user_id, event_detail_id, payment_id, created_at, updated_at
             FROM reservations WHERE payment_id = $1
             ORDER BY created_at",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    async fn get_payment_reservation_details(
        &self,
        payment_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<PaymentReservationDetail>> {
        let details = sqlx::query_as::<_, PaymentReservationDetail>(
            "SELECT p.id AS payment_id, p.payment_intent_id, p.amount, p.status, p.user_id,
                    r.id AS reservation_id, ed.id AS event_detail_id, ed.show_date, ed.price,
                    e.title, ed.ticket_description
             FROM reservations r
             JOIN payments p ON p.id = r.payment_id
             JOIN event_details ed ON ed.id = r.event_detail_id
             JOIN events e ON e.id = ed.event_id
             WHERE p.id = $1 AND p.user_id = $2
             ORDER BY r.created_at",
        )
        .bind(payment_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(details)
    }

    async fn get_paid_lines_for_event(&self, event_id: Uuid, owner_id: Uuid) -> StoreResult<Vec<PaidTicketLine>> {
        let query = format!("{PAID_LINE_SELECT} WHERE e.id = $1 AND e.user_id = $2");
        let lines = sqlx::query_as::<_, PaidTicketLine>(&query)
            .bind(event_id)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(lines)
    }

    async fn get_paid_lines_for_event_detail(
        &self,
        event_detail_id: Uuid,
        owner_id: Uuid,
    ) -> StoreResult<Vec<PaidTicketLine>> {
        let query = format!("{PAID_LINE_SELECT} WHERE ed.id = $1 AND e.user_id = $2");
        let lines = sqlx::query_as::<_, PaidTicketLine>(&query)
            .bind(event_detail_id)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(lines)
    }

    async fn get_event_confirmed_recipients(&self, event_id: Uuid) -> StoreResult<Vec<Recipient>> {
        let recipients = sqlx::query_as::<_, Recipient>(
            "SELECT DISTINCT u.firstname || ' ' || u.lastname AS name, r.email
             FROM reservations r
             JOIN payments p ON p.id = r.payment_id
             JOIN event_details ed ON ed.id = r.event_detail_id
             JOIN users u ON u.id = r.user_id
             WHERE ed.event_id = $1 AND p.status = 'succeeded'",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }

    async fn delete_event(&self, event_id: Uuid, owner_id: Uuid) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM events WHERE id = $1 AND user_id = $2")
            .bind(event_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn delete_event_detail(
        &self,
        event_id: Uuid,
        event_detail_id: Uuid,
        owner_id: Uuid,
    ) -> StoreResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM event_details ed
             USING events e
             WHERE ed.id = $1 AND ed.event_id = $2 AND e.id = ed.event_id AND e.user_id = $3",
        )
        .bind(event_detail_id)
        .bind(event_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(deleted.rows_affected() > 0)
    }
}

/// Gives every ticket held by the payment back, then deletes its reservations and the
/// payment itself. Returns false when the payment row was already gone.
async fn restore_and_delete(tx: &mut Transaction<'static, Postgres>, payment_id: Uuid) -> StoreResult<bool> {
    sqlx::query(
        "UPDATE event_details ed
         SET tickets_remaining = LEAST(ed.number_of_tickets, ed.tickets_remaining + held.count),
             updated_at = NOW()
         FROM (
             SELECT event_detail_id, COUNT(*)::INT AS count
             FROM reservations
             WHERE payment_id = $1
             GROUP BY event_detail_id
         ) held
         WHERE ed.id = held.event_detail_id",
    )
    .bind(payment_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM reservations WHERE payment_id = $1")
        .bind(payment_id)
        .execute(&mut **tx)
        .await?;

    let deleted = sqlx::query("DELETE FROM payments WHERE id = $1")
        .bind(payment_id)
        .execute(&mut **tx)
        .await?;

    Ok(deleted.rows_affected() > 0)
}
