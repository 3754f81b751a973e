//! Places search, place details and website scraping.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::AppState;
use super::error::ApiError;
use super::extract::UserId;
use crate::error::PlacesError;
use crate::places::{PlaceDirectory, PlaceResult, SearchPage, SearchQuery};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/places/search", get(search))
        .route("/api/places/{place_id}", get(details))
        .route("/api/scrape-email", get(scrape_email))
}

fn directory(state: &AppState) -> Result<Arc<dyn PlaceDirectory>, ApiError> {
    state
        .places
        .clone()
        .ok_or_else(|| PlacesError::MissingApiKey.into())
}

async fn search(
    State(state): State<AppState>,
    _user: UserId,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchPage>, ApiError> {
    if query.location.trim().is_empty() || query.category.trim().is_empty() {
        return Err(ApiError::bad_request("location and category are required"));
    }
    let page = directory(&state)?.search(&query).await?;
    Ok(Json(page))
}

async fn details(
    State(state): State<AppState>,
    _user: UserId,
    Path(place_id): Path<String>,
) -> Result<Json<PlaceResult>, ApiError> {
    directory(&state)?
        .details(&place_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Place {place_id} not found")))
}

#[derive(Deserialize)]
struct ScrapeQuery {
    #[serde(default)]
    url: Option<String>,
}

async fn scrape_email(
    State(state): State<AppState>,
    _user: UserId,
    Query(query): Query<ScrapeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("URL is required"))?;
    let email = state.scraper.scrape(&url).await?;
    Ok(Json(serde_json::json!({ "email": email })))
}
