use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only audit row. `payment_id` is not a foreign key so the trail survives
/// an expired payment being deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentLog {
    pub id: Uuid,
    pub payment_intent_id: String,
    pub payment_method_id: Option<String>,
    pub amount: Decimal,
    pub status: String,
    pub description: Option<String>,
    pub user_email: String,
    pub payment_id: Uuid,
    pub created_at: DateTime<Utc>,
}
