use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::Event;
use crate::notifier::{Notifier, NotifyError, TicketLine};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Confirmation { email: String, tickets: usize },
    PaymentFailed { email: String, reason: String },
    RefundOrCancelled { email: String, title: String },
    RefundErrorAlert,
    EventUpdated { email: String, title: String },
}

/// Records every send; addresses registered with [`RecordingNotifier::fail_for`] error out.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, email: &str) {
        self.failing.lock().unwrap().insert(email.to_string());
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, email: Option<&str>, sent: Sent) -> Result<(), NotifyError> {
        if let Some(email) = email {
            if self.failing.lock().unwrap().contains(email) {
                return Err(NotifyError::Transport(format!("mailbox {email} unavailable")));
            }
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_confirmation(&self, _name: &str, email: &str, tickets: &[TicketLine]) -> Result<(), NotifyError> {
        self.record(
            Some(email),
            Sent::Confirmation {
                email: email.to_string(),
                tickets: tickets.len(),
            },
        )
    }

    async fn send_payment_failed(
        &self,
        _name: &str,
        email: &str,
        reason: &str,
        _tickets: &[TicketLine],
    ) -> Result<(), NotifyError> {
        self.record(
            Some(email),
            Sent::PaymentFailed {
                email: email.to_string(),
                reason: reason.to_string(),
            },
        )
    }

    async fn send_refund_or_cancelled(
        &self,
        _name: &str,
        email: &str,
        title: &str,
        _ticket_description: &str,
    ) -> Result<(), NotifyError> {
        self.record(
            Some(email),
            Sent::RefundOrCancelled {
                email: email.to_string(),
                title: title.to_string(),
            },
        )
    }

    async fn send_refund_error_alert(&self) -> Result<(), NotifyError> {
        self.record(None, Sent::RefundErrorAlert)
    }

    async fn send_event_updated(&self, _name: &str, email: &str, event: &Event) -> Result<(), NotifyError> {
        self.record(
            Some(email),
            Sent::EventUpdated {
                email: email.to_string(),
                title: event.title.clone(),
            },
        )
    }
}
