//! Lead lists, their items, and email templates.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use super::extract::UserId;
use crate::leads::{EmailTemplate, LeadList, LeadListUpdate, ListEntry, ListItem, ListItemUpdate};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/lists", get(list_lists).post(create_list))
        .route("/api/lists/{id}", put(update_list))
        .route("/api/lists/{id}/archive", post(archive_list))
        .route("/api/lists/{id}/items", get(list_items).post(add_item))
        .route(
            "/api/lists/{id}/items/{lead_id}",
            put(update_item).delete(remove_item),
        )
        .route("/api/templates", get(list_templates).post(create_template))
}

/// Load a list and check the caller owns it. Foreign lists look missing.
async fn owned_list(state: &AppState, user: &UserId, list_id: Uuid) -> Result<LeadList, ApiError> {
    state
        .db
        .get_list(list_id)
        .await?
        .filter(|l| l.user_id == user.0)
        .ok_or_else(|| ApiError::not_found(format!("List {list_id} not found")))
}

async fn list_lists(State(state): State<AppState>, user: UserId) -> Result<Json<Vec<LeadList>>, ApiError> {
    Ok(Json(state.db.list_lists(&user.0).await?))
}

#[derive(Deserialize)]
struct CreateListRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_list(
    State(state): State<AppState>,
    user: UserId,
    Json(body): Json<CreateListRequest>,
) -> Result<(StatusCode, Json<LeadList>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let list = LeadList::new(user.0, name, body.description);
    state.db.create_list(&list).await?;
    Ok((StatusCode::CREATED, Json(list)))
}

async fn update_list(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
    Json(update): Json<LeadListUpdate>,
) -> Result<Json<LeadList>, ApiError> {
    owned_list(&state, &user, id).await?;
    state.db.update_list(id, &update).await?;
    Ok(Json(owned_list(&state, &user, id).await?))
}

async fn archive_list(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<LeadList>, ApiError> {
    owned_list(&state, &user, id).await?;
    state.db.archive_list(id).await?;
    Ok(Json(owned_list(&state, &user, id).await?))
}

async fn list_items(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ListEntry>>, ApiError> {
    owned_list(&state, &user, id).await?;
    Ok(Json(state.db.list_entries(id).await?))
}

#[derive(Deserialize)]
struct AddItemRequest {
    lead_id: Uuid,
    #[serde(default)]
    notes: Option<String>,
}

async fn add_item(
    State(state): State<AppState>,
    user: UserId,
    Path(id): Path<Uuid>,
    Json(body): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<ListItem>), ApiError> {
    let list = owned_list(&state, &user, id).await?;
    if list.is_archived {
        return Err(ApiError::bad_request("List is archived"));
    }
    if state.db.get_lead(body.lead_id).await?.is_none() {
        return Err(ApiError::not_found(format!("Lead {} not found", body.lead_id)));
    }
    let mut item = ListItem::new(id, body.lead_id);
    item.notes = body.notes;
    state.db.add_list_item(&item).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_item(
    State(state): State<AppState>,
    user: UserId,
    Path((id, lead_id)): Path<(Uuid, Uuid)>,
    Json(update): Json<ListItemUpdate>,
) -> Result<Json<ListEntry>, ApiError> {
    owned_list(&state, &user, id).await?;
    let find = |entries: Vec<ListEntry>| entries.into_iter().find(|e| e.lead.id == lead_id);
    let entry = find(state.db.list_entries(id).await?)
        .ok_or_else(|| ApiError::not_found(format!("Lead {lead_id} is not in list {id}")))?;

    state.db.update_list_item(entry.item.id, &update).await?;
    find(state.db.list_entries(id).await?)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Lead {lead_id} is not in list {id}")))
}

async fn remove_item(
    State(state): State<AppState>,
    user: UserId,
    Path((id, lead_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    owned_list(&state, &user, id).await?;
    if state.db.remove_list_item(id, lead_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Lead {lead_id} is not in list {id}")))
    }
}

async fn list_templates(
    State(state): State<AppState>,
    user: UserId,
) -> Result<Json<Vec<EmailTemplate>>, ApiError> {
    Ok(Json(state.db.list_templates(&user.0).await?))
}

#[derive(Deserialize)]
struct CreateTemplateRequest {
    name: String,
    subject: String,
    body: String,
}

async fn create_template(
    State(state): State<AppState>,
    user: UserId,
    Json(body): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<EmailTemplate>), ApiError> {
    if body.name.trim().is_empty() || body.subject.trim().is_empty() || body.body.trim().is_empty() {
        return Err(ApiError::bad_request("name, subject and body are required"));
    }
    let template = EmailTemplate::new(user.0, body.name.trim(), body.subject, body.body);
    state.db.create_template(&template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}
