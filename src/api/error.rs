//! HTTP error mapping. Every failure leaves as `{"error": "..."}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::error::{CampaignError, DatabaseError, OAuthError, PlacesError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::NotFound(m) | Self::Unauthorized(m) | Self::BadRequest(m) | Self::Internal(m) => m,
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { .. } => Self::NotFound(e.to_string()),
            DatabaseError::Constraint(_) => Self::BadRequest(e.to_string()),
            other => {
                error!(error = %other, "Database error");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<CampaignError> for ApiError {
    fn from(e: CampaignError) -> Self {
        match e {
            CampaignError::NotFound { .. }
            | CampaignError::ListNotFound { .. }
            | CampaignError::RecipientNotFound { .. } => Self::NotFound(e.to_string()),
            CampaignError::Unauthenticated { .. } => Self::Unauthorized(e.to_string()),
            CampaignError::InvalidState { .. } | CampaignError::InvalidInput(_) => {
                Self::BadRequest(e.to_string())
            }
            CampaignError::Database(db) => db.into(),
            CampaignError::SendFailed(_) => {
                error!(error = %e, "Campaign send failed");
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<PlacesError> for ApiError {
    fn from(e: PlacesError) -> Self {
        error!(error = %e, "Places request failed");
        Self::Internal(e.to_string())
    }
}

impl From<OAuthError> for ApiError {
    fn from(e: OAuthError) -> Self {
        error!(error = %e, "OAuth request failed");
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn campaign_errors_map_to_statuses() {
        let id = Uuid::new_v4();
        let cases = [
            (CampaignError::NotFound { id }, StatusCode::NOT_FOUND),
            (CampaignError::ListNotFound { id }, StatusCode::NOT_FOUND),
            (
                CampaignError::Unauthenticated {
                    user_id: "u".into(),
                    provider: "gmail".into(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (CampaignError::InvalidInput("no body".into()), StatusCode::BAD_REQUEST),
            (
                CampaignError::Database(DatabaseError::Query("disk full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn constraint_is_a_bad_request() {
        let err = ApiError::from(DatabaseError::Constraint("UNIQUE".into()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
