use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use event_mrs_server::config::Config;
use event_mrs_server::gateway::StripeGateway;
use event_mrs_server::notifier::MailgunNotifier;
use event_mrs_server::routes::create_routes;
use event_mrs_server::services::{ServiceContext, WebhookSecrets};
use event_mrs_server::store::PgStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let stripe = config.stripe;
    let mailgun = config.mailgun;
    let ctx = Arc::new(ServiceContext {
        store: Arc::new(PgStore::new(pool)),
        gateway: Arc::new(StripeGateway::new(stripe.secret_key, stripe.api_base)),
        notifier: Arc::new(MailgunNotifier::new(
            mailgun.api_key,
            mailgun.domain,
            mailgun.api_base,
            mailgun.sender,
            mailgun.team,
        )),
        webhook_secrets: WebhookSecrets {
            payment: stripe.signing_secret,
            refund: stripe.refund_signing_secret,
        },
        settings: config.settings,
    });

    let app: Router = create_routes(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
