use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::pricing::{self, PricingError};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub payment_intent_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub expires_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn amount_cents(&self) -> Result<i64, PricingError> {
        pricing::price_to_cents(self.amount)
    }

    pub fn intent_id(&self) -> Option<&str> {
        self.payment_intent_id
            .as_deref()
            .filter(|intent_id| !intent_id.is_empty())
    }
}

/// Local payment lifecycle.
///
/// `pending` fans out to the gateway-driven states; a settled charge moves through
/// `refund pending` to `refunded` or `refund_failed`. `cancelled` and `refunded` are
/// terminal, `refund_failed` waits for manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "requires_action")]
    RequiresAction,
    #[serde(rename = "requires_payment_method")]
    RequiresPaymentMethod,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "cancelled", alias = "canceled")]
    Canceled,
    #[serde(rename = "payment_failed")]
    PaymentFailed,
    #[serde(rename = "refund pending")]
    RefundPending,
    #[serde(rename = "refunded")]
    Refunded,
    #[serde(rename = "refund_failed")]
    RefundFailed,
}

#[derive(Debug, Error)]
#[error("unknown payment status '{0}'")]
pub struct UnknownPaymentStatus(pub String);

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::RequiresAction => "requires_action",
            PaymentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "cancelled",
            PaymentStatus::PaymentFailed => "payment_failed",
            PaymentStatus::RefundPending => "refund pending",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::RefundFailed => "refund_failed",
        }
    }

    /// Money has been captured (or is being returned); the expiry sweep must leave it alone.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded
                | PaymentStatus::Canceled
                | PaymentStatus::RefundPending
                | PaymentStatus::Refunded
                | PaymentStatus::RefundFailed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Canceled | PaymentStatus::Refunded | PaymentStatus::RefundFailed
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        match next {
            Pending => false,
            RequiresAction | Processing => {
                matches!(self, Pending | RequiresAction | RequiresPaymentMethod | Processing)
            }
            RequiresPaymentMethod | PaymentFailed => matches!(
                self,
                Pending | RequiresAction | RequiresPaymentMethod | Processing | PaymentFailed
            ),
            Succeeded => matches!(
                self,
                Pending | RequiresAction | RequiresPaymentMethod | Processing | PaymentFailed
            ),
            Canceled => !self.is_settled(),
            RefundPending => matches!(self, Succeeded),
            Refunded => matches!(self, Succeeded | RefundPending),
            RefundFailed => matches!(self, Succeeded | RefundPending),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownPaymentStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "requires_action" => Ok(PaymentStatus::RequiresAction),
            "requires_payment_method" => Ok(PaymentStatus::RequiresPaymentMethod),
            "processing" => Ok(PaymentStatus::Processing),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "cancelled" | "canceled" => Ok(PaymentStatus::Canceled),
            "payment_failed" => Ok(PaymentStatus::PaymentFailed),
            "refund pending" => Ok(PaymentStatus::RefundPending),
            "refunded" => Ok(PaymentStatus::Refunded),
            "refund_failed" => Ok(PaymentStatus::RefundFailed),
            other => Err(UnknownPaymentStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownPaymentStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
