//! Gmail REST API sender using the campaign owner's OAuth access token.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{EmailContent, MailSender, check_address, check_header};
use crate::error::MailError;

pub const GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

const PROVIDER: &str = "gmail";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

/// Sends through `users/me/messages/send`.
pub struct GmailSender {
    client: reqwest::Client,
    base_url: String,
    access_token: SecretString,
}

impl GmailSender {
    pub fn with_base_url(access_token: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    /// Address of the authenticated account.
    pub async fn profile_email(&self) -> Result<String, MailError> {
        let resp = self
            .client
            .get(format!("{}/users/me/profile", self.base_url))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| MailError::Http(e.to_string()))?;

        let resp = check_status(resp).await?;
        let profile: Profile = resp
            .json()
            .await
            .map_err(|e| MailError::Http(format!("invalid profile response: {e}")))?;
        Ok(profile.email_address)
    }
}

/// Encode a message as Gmail expects it in the `raw` field.
///
/// The HTML body is base64 inside the MIME message and the whole message
/// is base64url without padding.
pub fn build_raw_message(email: &EmailContent) -> Result<String, MailError> {
    check_address(&email.to)?;
    check_header("From", &email.from)?;
    check_header("Subject", &email.subject)?;

    let mut headers = vec![
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/html; charset=utf-8".to_string(),
        "Content-Transfer-Encoding: base64".to_string(),
        format!("To: {}", email.to.trim()),
    ];
    if !email.from.is_empty() {
        headers.push(format!("From: {}", email.from));
    }
    headers.push(format!("Subject: {}", encode_subject(&email.subject)));

    let message = format!("{}\r\n\r\n{}", headers.join("\r\n"), STANDARD.encode(&email.html));
    Ok(URL_SAFE_NO_PAD.encode(message))
}

/// RFC 2047 encoded-word for non-ASCII subjects.
fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        subject.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, MailError> {
    match resp.status() {
        s if s.is_success() => Ok(resp),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MailError::Unauthenticated {
            provider: PROVIDER.into(),
        }),
        s => Err(MailError::SendFailed {
            provider: PROVIDER.into(),
            reason: format!("{s}: {}", resp.text().await.unwrap_or_default()),
        }),
    }
}

#[async_trait]
impl MailSender for GmailSender {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, email: &EmailContent) -> Result<(), MailError> {
        let raw = build_raw_message(email)?;
        let resp = self
            .client
            .post(format!("{}/users/me/messages/send", self.base_url))
            .bearer_auth(self.access_token.expose_secret())
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| MailError::Http(e.to_string()))?;

        check_status(resp).await?;
        debug!(to = %email.to, "Gmail message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::*;

    type Captured = Arc<Mutex<Vec<String>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer good-token")
    }

    async fn send_handler(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (HttpStatus, Json<serde_json::Value>) {
        if !authorized(&headers) {
            return (HttpStatus::UNAUTHORIZED, Json(serde_json::json!({})));
        }
        let raw = body["raw"].as_str().unwrap_or_default().to_string();
        captured.lock().unwrap().push(raw);
        (HttpStatus::OK, Json(serde_json::json!({"id": "m1"})))
    }

    async fn profile_handler(headers: HeaderMap) -> (HttpStatus, Json<serde_json::Value>) {
        if !authorized(&headers) {
            return (HttpStatus::UNAUTHORIZED, Json(serde_json::json!({})));
        }
        (
            HttpStatus::OK,
            Json(serde_json::json!({"emailAddress": "owner@gmail.test", "messagesTotal": 3})),
        )
    }

    async fn stub(token: &str) -> (GmailSender, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route("/users/me/messages/send", post(send_handler))
            .route("/users/me/profile", get(profile_handler))
            .with_state(Arc::clone(&captured));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let sender = GmailSender::with_base_url(
            SecretString::from(token.to_string()),
            format!("http://127.0.0.1:{port}"),
        );
        (sender, captured)
    }

    fn decode(raw: &str) -> String {
        String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap()
    }

    #[test]
    fn raw_message_layout() {
        let email = EmailContent::new("info@joespipes.test", "me@gmail.test", "Hello", "<p>Hi Joe</p>");
        let decoded = decode(&build_raw_message(&email).unwrap());

        let (head, body) = decoded.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("MIME-Version: 1.0\r\n"));
        assert!(head.contains("Content-Type: text/html; charset=utf-8"));
        assert!(head.contains("Content-Transfer-Encoding: base64"));
        assert!(head.contains("To: info@joespipes.test"));
        assert!(head.contains("From: me@gmail.test"));
        assert!(head.contains("Subject: Hello"));
        assert_eq!(STANDARD.decode(body).unwrap(), b"<p>Hi Joe</p>");
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        let email = EmailContent::new("a@b.test", "", "Café offer", "x");
        let decoded = decode(&build_raw_message(&email).unwrap());
        assert!(decoded.contains("Subject: =?UTF-8?B?"));
        assert!(!decoded.contains("From:"));
    }

    #[test]
    fn invalid_recipient_is_rejected_before_sending() {
        let email = EmailContent::new("nobody", "me@gmail.test", "Hi", "x");
        assert!(matches!(
            build_raw_message(&email),
            Err(MailError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn send_posts_raw_message() {
        let (sender, captured) = stub("good-token").await;
        let email = EmailContent::new("info@joespipes.test", "me@gmail.test", "Hi", "<b>Hi</b>");
        sender.send(&email).await.unwrap();

        let raws = captured.lock().unwrap().clone();
        assert_eq!(raws.len(), 1);
        assert!(decode(&raws[0]).contains("To: info@joespipes.test"));
    }

    #[tokio::test]
    async fn rejected_token_is_unauthenticated() {
        let (sender, captured) = stub("expired").await;
        let email = EmailContent::new("info@joespipes.test", "", "Hi", "x");
        let err = sender.send(&email).await.unwrap_err();
        assert!(matches!(err, MailError::Unauthenticated { ref provider } if provider == "gmail"));
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_email_reads_account_address() {
        let (sender, _) = stub("good-token").await;
        assert_eq!(sender.profile_email().await.unwrap(), "owner@gmail.test");
    }
}
