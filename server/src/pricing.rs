use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Reference format for show dates, e.g. `2025-12-31 19:30`.
pub const SHOW_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("price out of range: {0}")]
    OutOfRange(Decimal),
}

pub fn price_to_cents(price: Decimal) -> Result<i64, PricingError> {
    price
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| {
            cents
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .ok_or(PricingError::OutOfRange(price))
}

/// Cents back to a two-decimal amount (`1500` -> `15.00`).
pub fn cents_to_price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// `price * quantity` in cents.
pub fn line_total_cents(price: Decimal, quantity: i64) -> Result<i64, PricingError> {
    price_to_cents(price)?
        .checked_mul(quantity)
        .ok_or(PricingError::OutOfRange(price))
}

pub fn add_cents(total: i64, cents: i64) -> Result<i64, PricingError> {
    total
        .checked_add(cents)
        .ok_or(PricingError::OutOfRange(cents_to_price(total)))
}

pub fn format_show_date(date: DateTime<Utc>) -> String {
    date.format(SHOW_DATE_FORMAT).to_string()
}
