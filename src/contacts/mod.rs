//! Contact resolution: finding an email address for a campaign recipient.

pub mod scrape;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::campaigns::model::Recipient;
use crate::error::PlacesError;
use crate::places::PlaceDirectory;

pub use scrape::{EmailScraper, extract_email};

/// Looks up a deliverable address for a recipient.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// `Ok(None)` when the business publishes no usable address.
    async fn resolve_email(&self, recipient: &Recipient) -> Result<Option<String>, PlacesError>;
}

/// Place details for the website, then a scrape of that website.
pub struct PlacesContactResolver {
    places: Arc<dyn PlaceDirectory>,
    scraper: EmailScraper,
}

impl PlacesContactResolver {
    pub fn new(places: Arc<dyn PlaceDirectory>, scraper: EmailScraper) -> Self {
        Self { places, scraper }
    }
}

#[async_trait]
impl ContactResolver for PlacesContactResolver {
    async fn resolve_email(&self, recipient: &Recipient) -> Result<Option<String>, PlacesError> {
        let website = match self.places.details(&recipient.place_id).await? {
            Some(place) => place.website,
            None => None,
        }
        .or_else(|| recipient.website.clone());

        let Some(website) = website else {
            debug!(place_id = %recipient.place_id, "No website to scrape");
            return Ok(None);
        };
        self.scraper.scrape(&website).await
    }
}
