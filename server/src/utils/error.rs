use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::pricing::PricingError;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event detail not found: {0}")]
    TicketNotFound(Uuid),

    #[error("Insufficient tickets for event detail {0}")]
    InsufficientTickets(Uuid),

    #[error("Show date has passed for event detail {0}")]
    ShowDatePassed(Uuid),

    #[error("Reservation conflict: {0}")]
    ReservationConflict(String),

    #[error("Payment canceled: {0}")]
    PaymentCanceled(String),

    #[error("Payment expired: {0}")]
    PaymentExpired(String),

    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error")]
    DatabaseError(#[from] StoreError),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::TicketNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientTickets(_) => StatusCode::CONFLICT,
            AppError::ShowDatePassed(_) => StatusCode::BAD_REQUEST,
            AppError::ReservationConflict(_) => StatusCode::CONFLICT,
            AppError::PaymentCanceled(_) => StatusCode::CONFLICT,
            AppError::PaymentExpired(_) => StatusCode::GONE,
            AppError::SignatureInvalid => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::TicketNotFound(_) => "TICKET_NOT_FOUND",
            AppError::InsufficientTickets(_) => "INSUFFICIENT_TICKETS",
            AppError::ShowDatePassed(_) => "SHOW_DATE_PASSED",
            AppError::ReservationConflict(_) => "RESERVATION_CONFLICT",
            AppError::PaymentCanceled(_) => "PAYMENT_CANCELED",
            AppError::PaymentExpired(_) => "PAYMENT_EXPIRED",
            AppError::SignatureInvalid => "SIGNATURE_INVALID",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::ExternalServiceError(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::SignatureInvalid => {
                warn!("Rejected webhook with invalid signature");
            }
            _ => {
                warn!(error = %self, code = self.code(), "Request rejected");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Internals stay in the logs
        let public_message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, None, status)
    }
}
