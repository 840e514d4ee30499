use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Serialize;

use crate::services::webhooks::{handle_webhook, WebhookDisposition, WebhookKind};
use crate::services::ServiceContext;
use crate::utils::error::AppError;
use crate::utils::response::{success, success_with_status};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "event-mrs-api",
    };

    success(payload, "Health check successful")
}

/// Gateway callback. The body is taken raw since the signature covers the exact bytes.
pub async fn receive_webhook(
    State(ctx): State<Arc<ServiceContext>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::SignatureInvalid)?;

    let disposition = handle_webhook(&ctx, &body, signature, WebhookKind::from_path(&kind)).await?;

    Ok(match disposition {
        WebhookDisposition::Applied => success(disposition, "Webhook processed"),
        WebhookDisposition::Ignored(_) => success_with_status(disposition, "Webhook ignored", StatusCode::ACCEPTED),
    })
}
