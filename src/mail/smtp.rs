//! SMTP relay sender via lettre. Sends run on the blocking pool.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use super::{EmailContent, MailSender};
use crate::config::SmtpConfig;
use crate::error::MailError;

const PROVIDER: &str = "smtp";

pub struct SmtpSender {
    transport: SmtpTransport,
    from_address: String,
}

impl SmtpSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::SendFailed {
                provider: PROVIDER.into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }

    /// Build the MIME message. HTML only, or plain + HTML alternative.
    pub fn build_message(&self, email: &EmailContent) -> Result<Message, MailError> {
        let from = if email.from.is_empty() {
            &self.from_address
        } else {
            &email.from
        };
        build_message(email, from)
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn build_message(email: &EmailContent, from: &str) -> Result<Message, MailError> {
    let builder = Message::builder()
        .from(mailbox(from)?)
        .to(mailbox(&email.to)?)
        .subject(email.subject.as_str());

    let message = match &email.text {
        Some(text) => builder.multipart(MultiPart::alternative_plain_html(
            text.clone(),
            email.html.clone(),
        )),
        None => builder.singlepart(SinglePart::html(email.html.clone())),
    };
    message.map_err(|e| MailError::Build(format!("Failed to build email: {e}")))
}

#[async_trait]
impl MailSender for SmtpSender {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, email: &EmailContent) -> Result<(), MailError> {
        let message = self.build_message(email)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::SendFailed {
                provider: PROVIDER.into(),
                reason: format!("send task failed: {e}"),
            })?
            .map_err(|e| MailError::SendFailed {
                provider: PROVIDER.into(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        tracing::info!("Email sent to {}", email.to);
        Ok(())
    }
}
