use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{health_check, receive_webhook};
use crate::services::ServiceContext;

pub fn create_routes(ctx: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/:kind", post(receive_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
