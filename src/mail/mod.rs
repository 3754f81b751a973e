//! Outbound mail: the `MailSender` trait and its Gmail, SendGrid and SMTP
//! implementations.

pub mod gmail;
pub mod sendgrid;
pub mod smtp;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MailError;

pub use gmail::GmailSender;
pub use sendgrid::SendGridSender;
pub use smtp::SmtpSender;

/// A single outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub to: String,
    /// Sender address. Gmail falls back to the authenticated account when empty.
    pub from: String,
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Optional plain-text alternative.
    pub text: Option<String>,
    pub campaign_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    /// Provider metadata forwarded as-is (SendGrid `custom_args`).
    pub custom_args: HashMap<String, String>,
}

impl EmailContent {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
            html: html.into(),
            text: None,
            campaign_id: None,
            recipient_id: None,
            custom_args: HashMap::new(),
        }
    }

    /// Tag the message with the campaign and recipient it belongs to.
    pub fn for_recipient(mut self, campaign_id: Uuid, recipient_id: Uuid) -> Self {
        self.campaign_id = Some(campaign_id);
        self.recipient_id = Some(recipient_id);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_args.insert(key.into(), value.into());
        self
    }
}

/// A mail delivery backend.
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Provider name, used in logs and errors.
    fn name(&self) -> &str;

    /// Deliver one message.
    async fn send(&self, email: &EmailContent) -> Result<(), MailError>;
}

/// Validate a mailbox address and reject header injection.
pub(crate) fn check_address(address: &str) -> Result<(), MailError> {
    address
        .trim()
        .parse::<lettre::Address>()
        .map(|_| ())
        .map_err(|e| MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Header values may not contain line breaks.
pub(crate) fn check_header(name: &str, value: &str) -> Result<(), MailError> {
    if value.contains(['\r', '\n']) {
        return Err(MailError::Build(format!("{name} header contains a line break")));
    }
    Ok(())
}
