//! Google Places web service client: text search and place details.

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use super::model::{DetailsEnvelope, PlaceResult, SearchEnvelope, SearchPage, SearchQuery};
use crate::error::PlacesError;

/// Production endpoint.
pub const GOOGLE_PLACES_BASE_URL: &str = "https://maps.googleapis.com/maps/api/place";

/// Fields requested from the details endpoint.
const DETAIL_FIELDS: &str = "place_id,name,formatted_address,formatted_phone_number,website,rating,user_ratings_total,opening_hours,business_status,types";

/// Places lookups used by the API and the contact resolver.
#[async_trait]
pub trait PlaceDirectory: Send + Sync {
    /// Run one page of a text/radius/category search.
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, PlacesError>;

    /// Fetch details for a single place. `Ok(None)` when the place is gone.
    async fn details(&self, place_id: &str) -> Result<Option<PlaceResult>, PlacesError>;
}

/// HTTP client for the Places web service.
pub struct PlacesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl PlacesClient {
    pub fn new(api_key: SecretString) -> Self {
        Self::with_base_url(api_key, GOOGLE_PLACES_BASE_URL)
    }

    /// Point the client at another host (tests use a local stub).
    pub fn with_base_url(api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, PlacesError> {
        let mut url = Url::parse(&format!("{}/{path}/json", self.base_url))
            .map_err(|e| PlacesError::InvalidResponse(format!("bad base url: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("key", self.api_key.expose_secret());
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, PlacesError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlacesError::Http(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            return Err(PlacesError::Api {
                status: resp.status().to_string(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json()
            .await
            .map_err(|e| PlacesError::InvalidResponse(e.without_url().to_string()))
    }
}

#[async_trait]
impl PlaceDirectory for PlacesClient {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, PlacesError> {
        let mut params = vec![
            ("query", query.text()),
            ("radius", query.radius_meters().to_string()),
            ("type", "establishment".to_string()),
        ];
        if let Some(token) = &query.page_token {
            params.push(("pagetoken", token.clone()));
        }
        let url = self.endpoint("textsearch", &params)?;
        debug!(query = %query.text(), radius_m = query.radius_meters(), "Places text search");

        let envelope: SearchEnvelope = self.get_json(url).await?;
        match envelope.status.as_str() {
            "OK" | "ZERO_RESULTS" => Ok(SearchPage {
                results: envelope.results,
                next_page_token: envelope.next_page_token,
            }),
            status => {
                warn!(status, "Places search rejected");
                Err(PlacesError::Api {
                    status: status.to_string(),
                    message: envelope.error_message.unwrap_or_else(|| "Unknown error".into()),
                })
            }
        }
    }

    async fn details(&self, place_id: &str) -> Result<Option<PlaceResult>, PlacesError> {
        let url = self.endpoint(
            "details",
            &[
                ("place_id", place_id.to_string()),
                ("fields", DETAIL_FIELDS.to_string()),
            ],
        )?;

        let envelope: DetailsEnvelope = self.get_json(url).await?;
        match envelope.status.as_str() {
            "OK" => Ok(envelope.result),
            "NOT_FOUND" | "ZERO_RESULTS" => Ok(None),
            status => Err(PlacesError::Api {
                status: status.to_string(),
                message: envelope.error_message.unwrap_or_else(|| "Unknown error".into()),
            }),
        }
    }
}
