use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::models::Event;
use crate::notifier::messages::{self, MailBody};
use crate::notifier::{Notifier, NotifyError, TicketLine};

pub const DEFAULT_API_BASE: &str = "https://api.mailgun.net";

#[derive(Debug, Clone)]
pub struct Mailbox {
    pub name: String,
    pub email: String,
}

impl Mailbox {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn header(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// Plain-text mail through the Mailgun messages API.
pub struct MailgunNotifier {
    client: Client,
    api_base: String,
    domain: String,
    api_key: SecretString,
    sender: Mailbox,
    team: Mailbox,
}

impl MailgunNotifier {
    pub fn new(
        api_key: SecretString,
        domain: impl Into<String>,
        api_base: impl Into<String>,
        sender: Mailbox,
        team: Mailbox,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            domain: domain.into(),
            api_key,
            sender,
            team,
        }
    }

    fn signoff(&self) -> String {
        format!("{} Team", self.sender.name)
    }

    async fn send(&self, to: &Mailbox, mail: MailBody) -> Result<(), NotifyError> {
        debug!(to = %to.email, subject = %mail.subject, "Sending email via Mailgun");

        let params = [
            ("from", self.sender.header()),
            ("to", to.header()),
            ("subject", mail.subject),
            ("text", mail.text),
        ];

        let response = self
            .client
            .post(format!("{}/v3/{}/messages", self.api_base, self.domain))
            .basic_auth("api", Some(self.api_key.expose_secret()))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(to = %to.email, status = status.as_u16(), body = %body, "Mailgun rejected message");
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for MailgunNotifier {
    async fn send_confirmation(&self, name: &str, email: &str, tickets: &[TicketLine]) -> Result<(), NotifyError> {
        let mail = messages::confirmation(name, tickets, &self.signoff());
        self.send(&Mailbox::new(name, email), mail).await
    }

    async fn send_payment_failed(
        &self,
        name: &str,
        email: &str,
        reason: &str,
        tickets: &[TicketLine],
    ) -> Result<(), NotifyError> {
        let mail = messages::payment_failed(name, reason, tickets, &self.signoff());
        self.send(&Mailbox::new(name, email), mail).await
    }

    async fn send_refund_or_cancelled(
        &self,
        name: &str,
        email: &str,
        title: &str,
        ticket_description: &str,
    ) -> Result<(), NotifyError> {
        let mail = messages::refund_or_cancelled(name, title, ticket_description, &self.signoff());
        self.send(&Mailbox::new(name, email), mail).await
    }

    async fn send_refund_error_alert(&self) -> Result<(), NotifyError> {
        self.send(&self.team, messages::refund_error_alert()).await
    }

    async fn send_event_updated(&self, name: &str, email: &str, event: &Event) -> Result<(), NotifyError> {
        let mail = messages::event_updated(name, event, &self.signoff());
        self.send(&Mailbox::new(name, email), mail).await
    }
}
