//! Gmail OAuth connect flow and the connection status it leaves behind.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use super::error::ApiError;
use super::extract::UserId;
use crate::error::OAuthError;
use crate::leads::UserSettings;
use crate::oauth::new_state;

/// How long a consent URL's `state` stays valid.
const STATE_TTL_MINUTES: i64 = 10;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/gmail", get(gmail))
        .route("/api/settings", get(settings))
}

/// Connection status only; tokens never leave the server.
async fn settings(
    State(state): State<AppState>,
    user: UserId,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = state.db.get_user_settings(&user.0).await?;
    Ok(Json(serde_json::json!({
        "gmail_connected": settings.as_ref().is_some_and(UserSettings::gmail_connected),
        "gmail_token_expiry": settings.and_then(|s| s.gmail_token_expiry),
    })))
}

#[derive(Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Without `code`: return the consent URL and remember its `state`. With
/// `code`: check `state` against the one handed out, then exchange the code
/// and store the tokens for the caller.
async fn gmail(
    State(state): State<AppState>,
    user: UserId,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let oauth = state
        .oauth
        .clone()
        .ok_or_else(|| OAuthError::NotConfigured("GOOGLE_CLIENT_ID is not set".into()))?;

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        let csrf = new_state();
        let url = oauth.authorize_url(&csrf)?;
        state.db.save_oauth_state(&user.0, &csrf).await?;
        return Ok(Json(serde_json::json!({ "url": url })));
    };

    // Single use: a failed attempt also discards the stored value.
    let expected = state.db.take_oauth_state(&user.0).await?;
    let valid = match (expected, query.state.as_deref()) {
        (Some((expected, created)), Some(got)) => {
            expected == got && Utc::now() - created <= Duration::minutes(STATE_TTL_MINUTES)
        }
        _ => false,
    };
    if !valid {
        warn!(user_id = %user.0, "OAuth callback with unknown or expired state");
        return Err(ApiError::bad_request("Invalid or expired OAuth state"));
    }

    let tokens = oauth.exchange_code(&code).await?;
    state
        .db
        .upsert_user_settings(&UserSettings {
            user_id: user.0.clone(),
            gmail_access_token: Some(tokens.access_token),
            gmail_refresh_token: tokens.refresh_token,
            gmail_token_expiry: tokens.expiry_date,
            updated_at: Some(Utc::now()),
        })
        .await?;
    info!(user_id = %user.0, "Gmail account connected");
    Ok(Json(serde_json::json!({ "success": true })))
}
