use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A dated showing of an event with its own price and ticket pool.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventDetail {
    pub id: Uuid,
    pub event_id: Uuid,
    pub show_date: DateTime<Utc>,
    pub price: Decimal,
    pub number_of_tickets: i32,
    pub tickets_remaining: i32,
    pub ticket_description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Event detail joined with its parent event's title, as used for pricing and mail bodies.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventDetailWithTitle {
    pub id: Uuid,
    pub event_id: Uuid,
    pub title: String,
    pub show_date: DateTime<Utc>,
    pub price: Decimal,
    pub tickets_remaining: i32,
    pub ticket_description: String,
}
