use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;

use crate::gateway::mock::MockGateway;
use crate::models::{Event, EventDetail, User};
use crate::notifier::mock::RecordingNotifier;
use crate::services::{ServiceContext, Settings, WebhookSecrets};
use crate::store::memory::MemoryStore;

pub const PAYMENT_SECRET: &str = "whsec_payment";
pub const REFUND_SECRET: &str = "whsec_refund";

pub struct TestHarness {
    pub ctx: Arc<ServiceContext>,
    pub store: MemoryStore,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_timeout(call_timeout: Duration) -> Self {
        Self::with_settings(Settings {
            call_timeout,
            ..Settings::default()
        })
    }

    fn with_settings(settings: Settings) -> Self {
        let store = MemoryStore::new();
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let ctx = Arc::new(ServiceContext {
            store: Arc::new(store.clone()),
            gateway: gateway.clone(),
            notifier: notifier.clone(),
            webhook_secrets: WebhookSecrets {
                payment: SecretString::from(PAYMENT_SECRET),
                refund: SecretString::from(REFUND_SECRET),
            },
            settings,
        });

        Self {
            ctx,
            store,
            gateway,
            notifier,
        }
    }

    /// An owner, their event, and one showing `days_ahead` days from now.
    pub async fn seed_show(&self, price: &str, tickets: i32, days_ahead: i64) -> (User, Event, EventDetail) {
        let owner = self.store.seed_user("Olive", "Owner", "owner@example.com").await;
        let event = self.store.seed_event(owner.id, "Summer Concert").await;
        let detail = self
            .store
            .seed_event_detail(event.id, price, tickets, Utc::now() + chrono::Duration::days(days_ahead))
            .await;
        (owner, event, detail)
    }
}
