//! In-memory [`Store`] for service tests. A transaction holds the whole state lock
//! until it commits or drops, so concurrent reservations serialise like row locks would.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    Event, EventDetail, EventDetailWithTitle, Payment, PaymentLog, PaymentStatus, Reservation, User,
};
use crate::store::{
    NewPayment, NewPaymentLog, NewReservation, PaidTicketLine, PaymentReservationDetail,
    PaymentUpdate, Recipient, Store, StoreError, StoreResult, StoreTransaction,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub users: HashMap<Uuid, User>,
    pub events: HashMap<Uuid, Event>,
    pub event_details: HashMap<Uuid, EventDetail>,
    pub payments: HashMap<Uuid, Payment>,
    pub reservations: Vec<Reservation>,
    pub payment_logs: Vec<PaymentLog>,
}

impl MemoryState {
    fn with_title(&self, detail: &EventDetail) -> Option<EventDetailWithTitle> {
        let event = self.events.get(&detail.event_id)?;
        Some(EventDetailWithTitle {
            id: detail.id,
            event_id: detail.event_id,
            title: event.title.clone(),
            show_date: detail.show_date,
            price: detail.price,
            tickets_remaining: detail.tickets_remaining,
            ticket_description: detail.ticket_description.clone(),
        })
    }

    fn paid_lines<F>(&self, owner_id: Uuid, on_target: F) -> Vec<PaidTicketLine>
    where
        F: Fn(&EventDetail) -> bool,
    {
        self.reservations
            .iter()
            .filter_map(|reservation| {
                let payment = self.payments.get(&reservation.payment_id)?;
                let detail = self.event_details.get(&reservation.event_detail_id)?;
                let event = self.events.get(&detail.event_id)?;
                if event.user_id != owner_id || !on_target(detail) {
                    return None;
                }

                Some(PaidTicketLine {
                    payment_id: payment.id,
                    payment_intent_id: payment.payment_intent_id.clone(),
                    amount: payment.amount,
                    status: payment.status,
                    user_id: payment.user_id,
                    event_detail_id: detail.id,
                    ticket_price: detail.price,
                    title: event.title.clone(),
                    ticket_description: detail.ticket_description.clone(),
                })
            })
            .collect()
    }

    fn remove_details(&mut self, detail_ids: &[Uuid]) {
        self.event_details.retain(|id, _| !detail_ids.contains(id));
        self.reservations
            .retain(|reservation| !detail_ids.contains(&reservation.event_detail_id));
    }

    fn remove_payment(&mut self, payment_id: Uuid) -> bool {
        if !self.payments.contains_key(&payment_id) {
            return false;
        }

        let held: Vec<Uuid> = self
            .reservations
            .iter()
            .filter(|reservation| reservation.payment_id == payment_id)
            .map(|reservation| reservation.event_detail_id)
            .collect();
        for event_detail_id in held {
            self.restore_one(event_detail_id);
        }

        self.reservations
            .retain(|reservation| reservation.payment_id != payment_id);
        self.payments.remove(&payment_id).is_some()
    }

    fn restore_one(&mut self, event_detail_id: Uuid) {
        if let Some(detail) = self.event_details.get_mut(&event_detail_id) {
            detail.tickets_remaining = (detail.tickets_remaining + 1).min(detail.number_of_tickets);
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    sold_before_begin: Arc<StdMutex<Vec<(Uuid, i32)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next transaction opens after another buyer has committed `count` tickets of
    /// the detail, i.e. after the caller already read the old stock.
    pub fn sell_before_next_begin(&self, event_detail_id: Uuid, count: i32) {
        self.sold_before_begin
            .lock()
            .unwrap()
            .push((event_detail_id, count));
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn tickets_remaining(&self, event_detail_id: Uuid) -> Option<i32> {
        self.state
            .lock()
            .await
            .event_details
            .get(&event_detail_id)
            .map(|detail| detail.tickets_remaining)
    }

    pub async fn payment(&self, payment_id: Uuid) -> Option<Payment> {
        self.state.lock().await.payments.get(&payment_id).cloned()
    }

    pub async fn logs_for(&self, payment_id: Uuid) -> Vec<PaymentLog> {
        self.state
            .lock()
            .await
            .payment_logs
            .iter()
            .filter(|log| log.payment_id == payment_id)
            .cloned()
            .collect()
    }

    pub async fn seed_user(&self, firstname: &str, lastname: &str, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
            email: email.to_string(),
            password: "hash".to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.state.lock().await.users.insert(user.id, user.clone());
        user
    }

    pub async fn seed_event(&self, owner_id: Uuid, title: &str) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: String::new(),
            organizer: None,
            user_id: owner_id,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.state.lock().await.events.insert(event.id, event.clone());
        event
    }

    pub async fn seed_event_detail(
        &self,
        event_id: Uuid,
        price: &str,
        tickets: i32,
        show_date: DateTime<Utc>,
    ) -> EventDetail {
        let detail = EventDetail {
            id: Uuid::new_v4(),
            event_id,
            show_date,
            price: Decimal::from_str(price).unwrap(),
            number_of_tickets: tickets,
            tickets_remaining: tickets,
            ticket_description: "General admission".to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.state
            .lock()
            .await
            .event_details
            .insert(detail.id, detail.clone());
        detail
    }

    pub async fn seed_payment(
        &self,
        user_id: Uuid,
        amount: &str,
        status: PaymentStatus,
        intent_id: Option<&str>,
    ) -> Payment {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            payment_intent_id: intent_id.map(str::to_string),
            amount: Decimal::from_str(amount).unwrap(),
            currency: "usd".to_string(),
            status,
            expires_at: now + Duration::minutes(15),
            user_id,
            created_at: now,
            updated_at: None,
        };
        self.state
            .lock()
            .await
            .payments
            .insert(payment.id, payment.clone());
        payment
    }

    pub async fn set_expires_at(&self, payment_id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(payment) = self.state.lock().await.payments.get_mut(&payment_id) {
            payment.expires_at = expires_at;
        }
    }

    /// Books one ticket against an existing payment, taking it out of the pool.
    pub async fn seed_reservation(&self, payment: &Payment, event_detail_id: Uuid, email: &str) -> Reservation {
        let reservation = Reservation {
            id: Uuid::new_v4(),
            email: email.to_string(),
            user_id: payment.user_id,
            event_detail_id,
            payment_id: payment.id,
            created_at: Utc::now(),
            updated_at: None,
        };
        let mut state = self.state.lock().await;
        if let Some(detail) = state.event_details.get_mut(&event_detail_id) {
            detail.tickets_remaining -= 1;
        }
        state.reservations.push(reservation.clone());
        reservation
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn create_payment(&mut self, payment: NewPayment) -> StoreResult<Payment> {
        let created = Payment {
            id: payment.id,
            payment_intent_id: None,
            amount: payment.amount,
            currency: payment.currency,
            status: payment.status,
            expires_at: payment.expires_at,
            user_id: payment.user_id,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.working.payments.insert(created.id, created.clone());
        Ok(created)
    }

    async fn reserve_ticket(&mut self, reservation: NewReservation) -> StoreResult<Reservation> {
        let detail = self
            .working
            .event_details
            .get_mut(&reservation.event_detail_id)
            .filter(|detail| detail.tickets_remaining > 0)
            .ok_or(StoreError::OutOfStock(reservation.event_detail_id))?;
        detail.tickets_remaining -= 1;

        let created = Reservation {
            id: reservation.id,
            email: reservation.email,
            user_id: reservation.user_id,
            event_detail_id: reservation.event_detail_id,
            payment_id: reservation.payment_id,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.working.reservations.push(created.clone());
        Ok(created)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let mut guard = self.state.clone().lock_owned().await;
        let sold: Vec<(Uuid, i32)> = self.sold_before_begin.lock().unwrap().drain(..).collect();
        for (event_detail_id, count) in sold {
            if let Some(detail) = guard.event_details.get_mut(&event_detail_id) {
                detail.tickets_remaining = (detail.tickets_remaining - count).max(0);
            }
        }
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.payment(payment_id).await)
    }

    async fn get_user_payment(&self, payment_id: Uuid, user_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self
            .payment(payment_id)
            .await
            .filter(|payment| payment.user_id == user_id))
    }

    async fn get_user_payments(&self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|payment| payment.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn get_payment_by_intent_id(&self, intent_id: &str) -> StoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|payment| payment.payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn get_payments_by_ids(&self, payment_ids: &[Uuid]) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        Ok(payment_ids
            .iter()
            .filter_map(|id| state.payments.get(id).cloned())
            .collect())
    }

    async fn update_payment(&self, update: PaymentUpdate) -> StoreResult<Payment> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&update.id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", update.id)))?;

        payment.amount = update.amount;
        payment.status = update.status;
        payment.payment_intent_id = update.payment_intent_id;
        payment.updated_at = Some(Utc::now());
        Ok(payment.clone())
    }

    async fn create_payment_log(&self, log: NewPaymentLog) -> StoreResult<PaymentLog> {
        let created = PaymentLog {
            id: Uuid::new_v4(),
            payment_intent_id: log.payment_intent_id,
            payment_method_id: log.payment_method_id,
            amount: log.amount,
            status: log.status,
            description: log.description,
            user_email: log.user_email,
            payment_id: log.payment_id,
            created_at: Utc::now(),
        };
        self.state.lock().await.payment_logs.push(created.clone());
        Ok(created)
    }

    async fn restore_tickets_and_delete_payment(&self, payment_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if !state.remove_payment(payment_id) {
            return Err(StoreError::NotFound(format!("payment {payment_id}")));
        }
        Ok(())
    }

    async fn delete_expired_payment(&self, payment_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let sweepable = state
            .payments
            .get(&payment_id)
            .is_some_and(|payment| !payment.status.is_settled() && payment.expires_at < now);

        Ok(sweepable && state.remove_payment(payment_id))
    }

    async fn refund_reservation_and_restore_ticket(&self, reservation_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let index = state
            .reservations
            .iter()
            .position(|reservation| reservation.id == reservation_id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {reservation_id}")))?;

        let reservation = state.reservations.remove(index);
        state.restore_one(reservation.event_detail_id);
        Ok(())
    }

    async fn get_event_details_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<EventDetailWithTitle>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.event_details.get(id))
            .filter_map(|detail| state.with_title(detail))
            .collect())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_reservations_by_payment_id(&self, payment_id: Uuid) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|reservation| reservation.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn get_payment_reservation_details(
        &self,
        payment_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<PaymentReservationDetail>> {
        let state = self.state.lock().await;
        let Some(payment) = state
            .payments
            .get(&payment_id)
            .filter(|payment| payment.user_id == user_id)
        else {
            return Ok(Vec::new());
        };

        Ok(state
            .reservations
            .iter()
            .filter(|reservation| reservation.payment_id == payment_id)
            .filter_map(|reservation| {
                let detail = state.event_details.get(&reservation.event_detail_id)?;
                let event = state.events.get(&detail.event_id)?;
                Some(PaymentReservationDetail {
                    payment_id: payment.id,
                    payment_intent_id: payment.payment_intent_id.clone(),
                    amount: payment.amount,
                    status: payment.status,
                    user_id: payment.user_id,
                    reservation_id: reservation.id,
                    event_detail_id: detail.id,
                    show_date: detail.show_date,
                    price: detail.price,
                    title: event.title.clone(),
                    ticket_description: detail.ticket_description.clone(),
                })
            })
            .collect())
    }

    async fn get_paid_lines_for_event(&self, event_id: Uuid, owner_id: Uuid) -> StoreResult<Vec<PaidTicketLine>> {
        let state = self.state.lock().await;
        Ok(state.paid_lines(owner_id, |detail| detail.event_id == event_id))
    }

    async fn get_paid_lines_for_event_detail(
        &self,
        event_detail_id: Uuid,
        owner_id: Uuid,
    ) -> StoreResult<Vec<PaidTicketLine>> {
        let state = self.state.lock().await;
        Ok(state.paid_lines(owner_id, |detail| detail.id == event_detail_id))
    }

    async fn get_event_confirmed_recipients(&self, event_id: Uuid) -> StoreResult<Vec<Recipient>> {
        let state = self.state.lock().await;
        let mut recipients: Vec<Recipient> = Vec::new();
        for reservation in &state.reservations {
            let on_event = state
                .event_details
                .get(&reservation.event_detail_id)
                .is_some_and(|detail| detail.event_id == event_id);
            let confirmed = state
                .payments
                .get(&reservation.payment_id)
                .is_some_and(|payment| payment.status == PaymentStatus::Succeeded);
            if !on_event || !confirmed {
                continue;
            }
            let Some(user) = state.users.get(&reservation.user_id) else {
                continue;
            };

            let recipient = Recipient {
                name: user.full_name(),
                email: reservation.email.clone(),
            };
            if !recipients.contains(&recipient) {
                recipients.push(recipient);
            }
        }
        Ok(recipients)
    }

    async fn delete_event(&self, event_id: Uuid, owner_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let owned = state
            .events
            .get(&event_id)
            .is_some_and(|event| event.user_id == owner_id);
        if !owned {
            return Ok(false);
        }

        let detail_ids: Vec<Uuid> = state
            .event_details
            .values()
            .filter(|detail| detail.event_id == event_id)
            .map(|detail| detail.id)
            .collect();
        state.remove_details(&detail_ids);
        state.events.remove(&event_id);
        Ok(true)
    }

    async fn delete_event_detail(
        &self,
        event_id: Uuid,
        event_detail_id: Uuid,
        owner_id: Uuid,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let owned = state
            .events
            .get(&event_id)
            .is_some_and(|event| event.user_id == owner_id);
        let belongs = state
            .event_details
            .get(&event_detail_id)
            .is_some_and(|detail| detail.event_id == event_id);
        if !owned || !belongs {
            return Ok(false);
        }

        state.remove_details(&[event_detail_id]);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let owner = store.seed_user("Ada", "Lovelace", "ada@example.com").await;
        let event = store.seed_event(owner.id, "Concert").await;
        let detail = store
            .seed_event_detail(event.id, "10.00", 1, Utc::now() + Duration::days(3))
            .await;

        {
            let mut tx = store.begin().await.unwrap();
            let payment_id = Uuid::new_v4();
            tx.create_payment(NewPayment {
                id: payment_id,
                amount: Decimal::new(1000, 2),
                currency: "usd".to_string(),
                status: PaymentStatus::Pending,
                expires_at: Utc::now() + Duration::minutes(15),
                user_id: owner.id,
            })
            .await
            .unwrap();
            tx.reserve_ticket(NewReservation {
                id: Uuid::new_v4(),
                event_detail_id: detail.id,
                email: owner.email.clone(),
                user_id: owner.id,
                payment_id,
            })
            .await
            .unwrap();
        }

        let state = store.snapshot().await;
        assert!(state.payments.is_empty());
        assert!(state.reservations.is_empty());
        assert_eq!(store.tickets_remaining(detail.id).await, Some(1));
    }

    #[tokio::test]
    async fn test_reserve_fails_when_pool_is_empty() {
        let store = MemoryStore::new();
        let owner = store.seed_user("Ada", "Lovelace", "ada@example.com").await;
        let event = store.seed_event(owner.id, "Concert").await;
        let detail = store
            .seed_event_detail(event.id, "10.00", 0, Utc::now() + Duration::days(3))
            .await;

        let mut tx = store.begin().await.unwrap();
        let result = tx
            .reserve_ticket(NewReservation {
                id: Uuid::new_v4(),
                event_detail_id: detail.id,
                email: owner.email.clone(),
                user_id: owner.id,
                payment_id: Uuid::new_v4(),
            })
            .await;

        assert!(matches!(result, Err(StoreError::OutOfStock(id)) if id == detail.id));
    }
}
