//! Outbound mail. Every send is best-effort: callers log a [`NotifyError`] and move on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Event, EventDetailWithTitle};

pub mod mailgun;
pub mod messages;
#[cfg(test)]
pub mod mock;

pub use mailgun::MailgunNotifier;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("mail transport error: {0}")]
    Transport(String),

    #[error("mail provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

/// One ticket as listed in a mail body.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketLine {
    pub title: String,
    pub ticket_description: String,
    pub show_date: DateTime<Utc>,
}

impl From<&EventDetailWithTitle> for TicketLine {
    fn from(detail: &EventDetailWithTitle) -> Self {
        Self {
            title: detail.title.clone(),
            ticket_description: detail.ticket_description.clone(),
            show_date: detail.show_date,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, name: &str, email: &str, tickets: &[TicketLine]) -> Result<(), NotifyError>;

    async fn send_payment_failed(
        &self,
        name: &str,
        email: &str,
        reason: &str,
        tickets: &[TicketLine],
    ) -> Result<(), NotifyError>;

    async fn send_refund_or_cancelled(
        &self,
        name: &str,
        email: &str,
        title: &str,
        ticket_description: &str,
    ) -> Result<(), NotifyError>;

    /// Internal alert to the team mailbox.
    async fn send_refund_error_alert(&self) -> Result<(), NotifyError>;

    async fn send_event_updated(&self, name: &str, email: &str, event: &Event) -> Result<(), NotifyError>;
}
