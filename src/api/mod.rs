//! HTTP API: JSON routes over the store, the campaign runner and the
//! places/OAuth clients.
//!
//! Callers identify themselves with the `x-user-id` header; see [`extract::UserId`].

pub mod auth;
pub mod campaigns;
pub mod error;
pub mod extract;
pub mod leads;
pub mod lists;
pub mod places;

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::campaigns::CampaignRunner;
use crate::contacts::EmailScraper;
use crate::oauth::GoogleOAuth;
use crate::places::PlaceDirectory;
use crate::store::Database;

pub use error::ApiError;
pub use extract::{USER_HEADER, UserId};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub runner: Arc<CampaignRunner>,
    /// `None` when no places API key is configured.
    pub places: Option<Arc<dyn PlaceDirectory>>,
    pub scraper: EmailScraper,
    /// `None` when no OAuth client is configured.
    pub oauth: Option<Arc<GoogleOAuth>>,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(places::routes())
        .merge(leads::routes())
        .merge(lists::routes())
        .merge(campaigns::routes())
        .merge(auth::routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
