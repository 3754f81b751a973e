//! Saved leads, their flags, notes and tags.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use super::extract::UserId;
use crate::leads::{Lead, LeadTag};
use crate::places::PlaceResult;

pub fn routes() -> Router<AppState> {
    // `{id}` is the place id for delete/flags/notes and the lead uuid for tags.
    Router::new()
        .route("/api/leads", get(list_leads).post(save_lead))
        .route("/api/leads/{id}", delete(delete_lead))
        .route("/api/leads/{id}/flags", put(update_flags))
        .route("/api/leads/{id}/notes", put(update_notes))
        .route(
            "/api/leads/{id}/tags",
            get(list_tags).post(add_tag).delete(remove_tag),
        )
}

async fn list_leads(State(state): State<AppState>, _user: UserId) -> Result<Json<Vec<Lead>>, ApiError> {
    Ok(Json(state.db.list_leads().await?))
}

#[derive(Deserialize)]
struct SaveLeadRequest {
    place: PlaceResult,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Save a place as a lead. Saving the same place again refreshes it.
async fn save_lead(
    State(state): State<AppState>,
    _user: UserId,
    Json(body): Json<SaveLeadRequest>,
) -> Result<(StatusCode, Json<Lead>), ApiError> {
    if body.place.place_id.trim().is_empty() {
        return Err(ApiError::bad_request("place.place_id is required"));
    }
    let mut lead = Lead::from_place(&body.place).with_flags(body.flags);
    if let Some(notes) = body.notes {
        lead = lead.with_notes(notes);
    }
    let stored = state.db.upsert_lead(&lead).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn delete_lead(
    State(state): State<AppState>,
    _user: UserId,
    Path(place_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_lead(&place_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Lead {place_id} not found")))
    }
}

async fn reload(state: &AppState, place_id: &str) -> Result<Json<Lead>, ApiError> {
    state
        .db
        .get_lead_by_place_id(place_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Lead {place_id} not found")))
}

#[derive(Deserialize)]
struct FlagsRequest {
    flags: Vec<String>,
}

async fn update_flags(
    State(state): State<AppState>,
    _user: UserId,
    Path(place_id): Path<String>,
    Json(body): Json<FlagsRequest>,
) -> Result<Json<Lead>, ApiError> {
    if !state.db.update_lead_flags(&place_id, &body.flags).await? {
        return Err(ApiError::not_found(format!("Lead {place_id} not found")));
    }
    reload(&state, &place_id).await
}

#[derive(Deserialize)]
struct NotesRequest {
    notes: String,
}

async fn update_notes(
    State(state): State<AppState>,
    _user: UserId,
    Path(place_id): Path<String>,
    Json(body): Json<NotesRequest>,
) -> Result<Json<Lead>, ApiError> {
    if !state.db.update_lead_notes(&place_id, &body.notes).await? {
        return Err(ApiError::not_found(format!("Lead {place_id} not found")));
    }
    reload(&state, &place_id).await
}

async fn require_lead(state: &AppState, lead_id: Uuid) -> Result<(), ApiError> {
    match state.db.get_lead(lead_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::not_found(format!("Lead {lead_id} not found"))),
    }
}

async fn list_tags(
    State(state): State<AppState>,
    _user: UserId,
    Path(lead_id): Path<Uuid>,
) -> Result<Json<Vec<LeadTag>>, ApiError> {
    require_lead(&state, lead_id).await?;
    Ok(Json(state.db.list_tags(lead_id).await?))
}

#[derive(Deserialize)]
struct TagRequest {
    tag: String,
}

fn clean_tag(tag: &str) -> Result<&str, ApiError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(ApiError::bad_request("tag is required"));
    }
    Ok(tag)
}

async fn add_tag(
    State(state): State<AppState>,
    _user: UserId,
    Path(lead_id): Path<Uuid>,
    Json(body): Json<TagRequest>,
) -> Result<(StatusCode, Json<LeadTag>), ApiError> {
    let tag = clean_tag(&body.tag)?;
    require_lead(&state, lead_id).await?;
    let stored = state.db.add_tag(lead_id, tag).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn remove_tag(
    State(state): State<AppState>,
    _user: UserId,
    Path(lead_id): Path<Uuid>,
    Query(query): Query<TagRequest>,
) -> Result<StatusCode, ApiError> {
    let tag = clean_tag(&query.tag)?;
    if state.db.remove_tag(lead_id, tag).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Tag {tag} not found")))
    }
}
