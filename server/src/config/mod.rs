use std::env;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::gateway::stripe;
use crate::notifier::mailgun::{self, Mailbox};
use crate::services::Settings;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/event_mrs";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_SENDER_NAME: &str = "Event MRS";
const DEFAULT_TEAM_NAME: &str = "Event MRS Support";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

pub struct StripeConfig {
    pub secret_key: SecretString,
    pub signing_secret: SecretString,
    pub refund_signing_secret: SecretString,
    pub api_base: String,
}

pub struct MailgunConfig {
    pub api_key: SecretString,
    pub domain: String,
    pub api_base: String,
    pub sender: Mailbox,
    pub team: Mailbox,
}

pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub stripe: StripeConfig,
    pub mailgun: MailgunConfig,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));
        let secret = |name: &'static str| required(name).map(SecretString::from);
        let number = |name: &'static str, default: u64| match var(name) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid { name, value }),
            None => Ok(default),
        };

        let port = match var("PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        let stripe = StripeConfig {
            secret_key: secret("STRIPE_SECRET_KEY")?,
            signing_secret: secret("STRIPE_SIGNING_SECRET")?,
            refund_signing_secret: secret("STRIPE_REFUND_SIGNING_SECRET")?,
            api_base: var("STRIPE_API_BASE").unwrap_or_else(|| stripe::DEFAULT_API_BASE.to_string()),
        };

        let domain = required("MAILGUN_SENDING_DOMAIN")?;
        let mailgun = MailgunConfig {
            api_key: secret("MAILGUN_API_KEY")?,
            api_base: var("MAILGUN_API_BASE").unwrap_or_else(|| mailgun::DEFAULT_API_BASE.to_string()),
            sender: Mailbox::new(
                var("SENDER_NAME").unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
                var("SENDER_EMAIL").unwrap_or_else(|| format!("no-reply@{domain}")),
            ),
            team: Mailbox::new(
                var("TEAM_NAME").unwrap_or_else(|| DEFAULT_TEAM_NAME.to_string()),
                required("TEAM_EMAIL")?,
            ),
            domain,
        };

        let defaults = Settings::default();
        let settings = Settings {
            call_timeout: Duration::from_secs(number(
                "EXTERNAL_CALL_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            )?),
            payment_ttl: chrono::Duration::minutes(number(
                "PAYMENT_TTL_MINUTES",
                defaults.payment_ttl.num_minutes() as u64,
            )? as i64),
            refund_window: chrono::Duration::hours(number(
                "REFUND_WINDOW_HOURS",
                defaults.refund_window.num_hours() as u64,
            )? as i64),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            port,
            stripe,
            mailgun,
            settings,
        })
    }
}
