//! Places data model: search queries, results, and raw API envelopes.

use serde::{Deserialize, Serialize};

/// A business returned by a places search or details lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceResult {
    pub place_id: String,
    pub name: String,
    #[serde(default)]
    pub formatted_address: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ratings_total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<OpeningHours>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningHours {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_now: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekday_text: Vec<String>,
}

/// A keyed text/radius/category search.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    /// Free-text location, e.g. "Austin, TX".
    pub location: String,
    /// Search radius in kilometres.
    pub radius: u32,
    /// Business category, e.g. "plumber".
    pub category: String,
    /// Continuation token from a previous page.
    #[serde(default)]
    pub page_token: Option<String>,
}

impl SearchQuery {
    /// Radius converted to metres for the API.
    pub fn radius_meters(&self) -> u32 {
        self.radius.saturating_mul(1000)
    }

    /// Text query sent to the API.
    pub fn text(&self) -> String {
        format!("{} in {}", self.category.trim(), self.location.trim())
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub results: Vec<PlaceResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Raw text search envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchEnvelope {
    pub status: String,
    #[serde(default)]
    pub results: Vec<PlaceResult>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Raw details envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct DetailsEnvelope {
    pub status: String,
    #[serde(default)]
    pub result: Option<PlaceResult>,
    #[serde(default)]
    pub error_message: Option<String>,
}
