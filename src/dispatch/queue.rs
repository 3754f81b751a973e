//! Bulk dispatch queue: drains messages in chunks through a rate-limited sender.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::rate::RateLimiter;
use crate::config::DispatchConfig;
use crate::error::MailError;
use crate::mail::{EmailContent, MailSender};

/// A failed delivery, by address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientError {
    pub email: String,
    pub error: String,
}

/// Per-message result, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub recipient_id: Option<Uuid>,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate result of a bulk send. `sent + failed == total`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub errors: Vec<RecipientError>,
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    fn record(&mut self, email: &EmailContent, result: Result<(), MailError>) {
        let error = match result {
            Ok(()) => {
                self.sent += 1;
                None
            }
            Err(e) => {
                self.failed += 1;
                let reason = e.to_string();
                self.errors.push(RecipientError {
                    email: email.to.clone(),
                    error: reason.clone(),
                });
                Some(reason)
            }
        };
        self.outcomes.push(DispatchOutcome {
            recipient_id: email.recipient_id,
            to: email.to.clone(),
            error,
        });
    }
}

/// Rate-limited sender front. One limiter is shared by every batch sent
/// through the same queue.
pub struct DispatchQueue {
    sender: Arc<dyn MailSender>,
    config: DispatchConfig,
    limiter: Mutex<RateLimiter>,
}

impl DispatchQueue {
    pub fn new(sender: Arc<dyn MailSender>, config: DispatchConfig) -> Self {
        let limiter = Mutex::new(RateLimiter::from_config(&config));
        Self {
            sender,
            config,
            limiter,
        }
    }

    pub fn sender_name(&self) -> &str {
        self.sender.name()
    }

    async fn throttle(&self) {
        self.limiter.lock().await.acquire().await;
    }

    /// Send every message, never stopping on an individual failure.
    pub async fn send_bulk(&self, messages: Vec<EmailContent>) -> DispatchReport {
        let mut report = DispatchReport {
            total: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return report;
        }

        let chunks = messages.len().div_ceil(self.config.batch_size);
        for (i, chunk) in messages.chunks(self.config.batch_size).enumerate() {
            debug!(
                chunk = i + 1,
                of = chunks,
                size = chunk.len(),
                provider = self.sender.name(),
                "Draining dispatch chunk"
            );
            for email in chunk {
                self.throttle().await;
                let result = self.sender.send(email).await;
                if let Err(e) = &result {
                    warn!(to = %email.to, error = %e, "Send failed");
                }
                report.record(email, result);
            }
        }

        info!(
            total = report.total,
            sent = report.sent,
            failed = report.failed,
            "Bulk dispatch finished"
        );
        report
    }

    /// One rate-limited send; the error is returned rather than recorded.
    pub async fn send_single(&self, email: &EmailContent) -> Result<(), MailError> {
        self.throttle().await;
        let result = self.sender.send(email).await;
        if let Err(e) = &result {
            warn!(to = %email.to, error = %e, "Send failed");
        }
        result
    }
}
