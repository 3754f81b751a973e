//! Google OAuth 2.0: consent URL and authorization-code exchange for Gmail.

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::Url;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::GoogleOAuthConfig;
use crate::error::OAuthError;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scopes needed to send mail as the user.
pub const GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.compose",
];

/// Tokens returned by a successful exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthTokens {
    pub access_token: String,
    /// Only present when the user granted offline access.
    pub refresh_token: Option<String>,
    /// Expiry as epoch milliseconds.
    pub expiry_date: Option<i64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

pub struct GoogleOAuth {
    client: reqwest::Client,
    config: GoogleOAuthConfig,
    auth_url: String,
    token_url: String,
}

impl GoogleOAuth {
    pub fn new(config: GoogleOAuthConfig) -> Self {
        Self::with_endpoints(config, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL)
    }

    pub fn with_endpoints(
        config: GoogleOAuthConfig,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            auth_url: auth_url.into(),
            token_url: token_url.into(),
        }
    }

    /// Consent screen URL requesting offline Gmail send access.
    pub fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        let scope = GMAIL_SCOPES.join(" ");
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", state),
            ],
        )
        .map_err(|e| OAuthError::NotConfigured(format!("bad authorization url: {e}")))?;
        Ok(url.to_string())
    }

    /// Trade an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, OAuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Http(e.to_string()))?;

        let status = resp.status();
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(format!("invalid token response: {e}")))?;

        let access_token = match (status.is_success(), body.access_token) {
            (true, Some(token)) => token,
            _ => {
                let reason = body
                    .error_description
                    .or(body.error)
                    .unwrap_or_else(|| status.to_string());
                warn!(%status, "Google token exchange rejected");
                return Err(OAuthError::ExchangeFailed(reason));
            }
        };

        info!(offline = body.refresh_token.is_some(), "Google tokens issued");
        Ok(OAuthTokens {
            access_token,
            refresh_token: body.refresh_token,
            expiry_date: body
                .expires_in
                .map(|secs| Utc::now().timestamp_millis() + secs * 1000),
        })
    }
}

/// Random opaque value for the `state` parameter.
pub fn new_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use axum::http::StatusCode;
    use secrecy::SecretString;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    use super::*;

    fn config() -> GoogleOAuthConfig {
        GoogleOAuthConfig {
            client_id: "client-1".into(),
            client_secret: SecretString::from("shh".to_string()),
            redirect_uri: "http://localhost:8080/api/auth/gmail".into(),
        }
    }

    async fn token(Form(form): Form<HashMap<String, String>>) -> (StatusCode, Json<serde_json::Value>) {
        if form.get("client_secret").map(String::as_str) != Some("shh")
            || form.get("grant_type").map(String::as_str) != Some("authorization_code")
        {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "invalid_client"})),
            );
        }
        match form.get("code").map(String::as_str) {
            Some("good") => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "access_token": "ya29.token",
                    "refresh_token": "1//refresh",
                    "expires_in": 3599,
                    "token_type": "Bearer",
                })),
            ),
            _ => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid_grant",
                    "error_description": "Bad Request",
                })),
            ),
        }
    }

    async fn stub() -> GoogleOAuth {
        let app = Router::new().route("/token", post(token));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        GoogleOAuth::with_endpoints(config(), GOOGLE_AUTH_URL, format!("http://127.0.0.1:{port}/token"))
    }

    #[test]
    fn authorize_url_requests_offline_gmail_scopes() {
        let oauth = GoogleOAuth::new(config());
        let url = Url::parse(&oauth.authorize_url("xyz").unwrap()).unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["state"], "xyz");
        assert_eq!(params["redirect_uri"], "http://localhost:8080/api/auth/gmail");
        assert!(params["scope"].contains("gmail.send"));
        assert!(params["scope"].contains("gmail.compose"));
        assert!(!url.as_str().contains("shh"));
    }

    #[tokio::test]
    async fn exchange_returns_tokens_with_expiry() {
        let oauth = stub().await;
        let before = Utc::now().timestamp_millis();
        let tokens = oauth.exchange_code("good").await.unwrap();
        assert_eq!(tokens.access_token, "ya29.token");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
        let expiry = tokens.expiry_date.unwrap();
        assert!(expiry >= before + 3_599_000);
    }

    #[tokio::test]
    async fn rejected_code_reports_description() {
        let oauth = stub().await;
        let err = oauth.exchange_code("stale").await.unwrap_err();
        assert!(matches!(err, OAuthError::ExchangeFailed(ref m) if m == "Bad Request"));
    }

    #[test]
    fn state_tokens_are_random() {
        let a = new_state();
        assert_eq!(a.len(), 32);
        assert_ne!(a, new_state());
    }
}
