//! Campaign CRUD, sending and call logging.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use super::extract::UserId;
use crate::campaigns::{CallOutcome, Campaign, DeliveryStatus, NewCampaign, Recipient};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign))
        .route("/api/campaigns/{id}/recipients", get(list_recipients))
        .route("/api/campaigns/{id}/send", post(send_campaign))
        .route("/api/campaigns/{id}/reset-failed", post(reset_failed))
        .route("/api/recipients/{id}/call", post(log_call))
}

async fn owned_campaign(state: &AppState, user: &UserId, id: Uuid) -> Result<Campaign, ApiError> {
    state
        .db
        .get_campaign(id)
        .await?
        .filter(|c| c.user_id == user.0)
        .ok_or_else(|| ApiError::not_found(format!("Campaign {id} not found")))
}

async fn list_campaigns(
    State(state): State<AppState>,
    user: UserId,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(state.db.list_campaigns(&user.0).await?))
}

async fn create_campaign(
    State(state): State<AppState>,
    user: UserId,
    Json(mut request): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    request.user_id = user.0;
    let campaign = state.runner.create_campaign(request).await?;
    info!(campaign_id = %campaign.id, total = campaign.counters.total, "Campaign created");
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn get_campaign(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(owned_campaign(&state, &user, id).await?))
}

#[derive(Deserialize)]
struct RecipientFilter {
    #[serde(default)]
    status: Option<DeliveryStatus>,
}

async fn list_recipients(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
    Query(filter): Query<RecipientFilter>,
) -> Result<Json<Vec<Recipient>>, ApiError> {
    owned_campaign(&state, &user, id).await?;
    Ok(Json(state.db.list_recipients(id, filter.status).await?))
}

/// Claim the campaign, then send in the background. Progress shows up in
/// the campaign counters.
async fn send_campaign(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    owned_campaign(&state, &user, id).await?;
    let run = state.runner.prepare(id).await?;
    let total = run.campaign().counters.total;

    tokio::spawn(async move {
        if let Err(e) = run.execute().await {
            error!(campaign_id = %id, error = %e, "Background campaign run failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "campaign_id": id,
            "status": "sending",
            "total": total,
        })),
    ))
}

async fn reset_failed(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    owned_campaign(&state, &user, id).await?;
    let requeued = state.runner.reset_failed(id).await?;
    let campaign = owned_campaign(&state, &user, id).await?;
    Ok(Json(serde_json::json!({
        "requeued": requeued,
        "campaign": campaign,
    })))
}

#[derive(Deserialize)]
struct CallRequest {
    outcome: CallOutcome,
    #[serde(default)]
    notes: Option<String>,
}

async fn log_call(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
    Json(body): Json<CallRequest>,
) -> Result<Json<Recipient>, ApiError> {
    let recipient = state
        .db
        .get_recipient(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Recipient {id} not found")))?;
    owned_campaign(&state, &user, recipient.campaign_id).await?;

    let updated = state
        .runner
        .log_call(id, body.outcome, body.notes.as_deref())
        .await?;
    Ok(Json(updated))
}
