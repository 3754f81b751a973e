//! SendGrid v3 `mail/send` sender.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use super::{EmailContent, MailSender, check_address, check_header};
use crate::error::MailError;

pub const SENDGRID_API_BASE_URL: &str = "https://api.sendgrid.com/v3";

const PROVIDER: &str = "sendgrid";

#[derive(Serialize)]
struct Mailbox<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: Vec<Mailbox<'a>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    custom_args: HashMap<String, String>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    mime: &'static str,
    value: &'a str,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Mailbox<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

/// Sends with a service API key.
pub struct SendGridSender {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    default_from: String,
}

impl SendGridSender {
    pub fn new(api_key: SecretString, default_from: impl Into<String>) -> Self {
        Self::with_base_url(api_key, default_from, SENDGRID_API_BASE_URL)
    }

    pub fn with_base_url(
        api_key: SecretString,
        default_from: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_from: default_from.into(),
        }
    }
}

/// Campaign and recipient ids travel with the user's custom args.
fn custom_args(email: &EmailContent) -> HashMap<String, String> {
    let mut args = email.custom_args.clone();
    if let Some(id) = email.campaign_id {
        args.insert("campaign_id".into(), id.to_string());
    }
    if let Some(id) = email.recipient_id {
        args.insert("recipient_id".into(), id.to_string());
    }
    args
}

fn build_request<'a>(email: &'a EmailContent, from: &'a str) -> SendRequest<'a> {
    // text/plain must precede text/html
    let mut content = Vec::with_capacity(2);
    if let Some(text) = &email.text {
        content.push(Content {
            mime: "text/plain",
            value: text,
        });
    }
    content.push(Content {
        mime: "text/html",
        value: &email.html,
    });

    SendRequest {
        personalizations: vec![Personalization {
            to: vec![Mailbox {
                email: email.to.trim(),
            }],
            custom_args: custom_args(email),
        }],
        from: Mailbox { email: from },
        subject: &email.subject,
        content,
    }
}

#[async_trait]
impl MailSender for SendGridSender {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, email: &EmailContent) -> Result<(), MailError> {
        check_address(&email.to)?;
        check_header("Subject", &email.subject)?;
        let from = if email.from.is_empty() {
            self.default_from.as_str()
        } else {
            email.from.as_str()
        };
        check_address(from)?;

        let resp = self
            .client
            .post(format!("{}/mail/send", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&build_request(email, from))
            .send()
            .await
            .map_err(|e| MailError::Http(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {
                debug!(to = %email.to, "SendGrid accepted message");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MailError::Unauthenticated {
                provider: PROVIDER.into(),
            }),
            s => Err(MailError::SendFailed {
                provider: PROVIDER.into(),
                reason: format!("{s}: {}", resp.text().await.unwrap_or_default()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    use super::*;

    type Captured = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn handler(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> HttpStatus {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer SG.key") {
            return HttpStatus::UNAUTHORIZED;
        }
        let bounce = body["personalizations"][0]["to"][0]["email"] == "bounce@test.com";
        captured.lock().unwrap().push(body);
        if bounce {
            HttpStatus::BAD_REQUEST
        } else {
            HttpStatus::ACCEPTED
        }
    }

    async fn stub(key: &str) -> (SendGridSender, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route("/mail/send", post(handler))
            .with_state(Arc::clone(&captured));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let sender = SendGridSender::with_base_url(
            SecretString::from(key.to_string()),
            "outreach@agency.test",
            format!("http://127.0.0.1:{port}"),
        );
        (sender, captured)
    }

    #[tokio::test]
    async fn forwards_campaign_ids_and_custom_args() {
        let (sender, captured) = stub("SG.key").await;
        let campaign = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let email = EmailContent::new("info@joespipes.test", "", "Hi", "<p>Hi</p>")
            .with_text("Hi")
            .for_recipient(campaign, recipient)
            .with_arg("list", "plumbers");
        sender.send(&email).await.unwrap();

        let body = captured.lock().unwrap()[0].clone();
        let args = &body["personalizations"][0]["custom_args"];
        assert_eq!(args["campaign_id"], campaign.to_string());
        assert_eq!(args["recipient_id"], recipient.to_string());
        assert_eq!(args["list"], "plumbers");
        assert_eq!(body["from"]["email"], "outreach@agency.test");
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["content"][1]["type"], "text/html");
    }

    #[tokio::test]
    async fn provider_rejection_carries_reason() {
        let (sender, _) = stub("SG.key").await;
        let email = EmailContent::new("bounce@test.com", "", "Hi", "x");
        let err = sender.send(&email).await.unwrap_err();
        assert!(matches!(err, MailError::SendFailed { ref provider, .. } if provider == "sendgrid"));
    }

    #[tokio::test]
    async fn bad_key_is_unauthenticated() {
        let (sender, _) = stub("SG.wrong").await;
        let email = EmailContent::new("info@joespipes.test", "", "Hi", "x");
        assert!(matches!(
            sender.send(&email).await,
            Err(MailError::Unauthenticated { .. })
        ));
    }
}
