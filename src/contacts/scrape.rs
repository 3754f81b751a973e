//! Email discovery on business websites.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::error::PlacesError;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

/// Template and placeholder domains that show up on most sites.
const PLACEHOLDER_DOMAINS: &[&str] = &["example.com", "yourdomain.com", "domain.com", "email.com"];

/// Local parts that usually reach the business itself.
const PREFERRED_PREFIXES: &[&str] = &["info", "contact", "sales", "support", "hello", "business"];

/// Pick the most likely business address from a page.
///
/// Placeholder addresses are dropped. An address whose local part is one of
/// the preferred prefixes wins; otherwise the first remaining match.
pub fn extract_email(html: &str) -> Option<String> {
    let candidates: Vec<&str> = EMAIL_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|email| {
            let lower = email.to_lowercase();
            !PLACEHOLDER_DOMAINS.iter().any(|d| lower.contains(d))
        })
        .collect();

    candidates
        .iter()
        .find(|email| {
            let lower = email.to_lowercase();
            PREFERRED_PREFIXES
                .iter()
                .any(|p| lower.starts_with(&format!("{p}@")))
        })
        .or_else(|| candidates.first())
        .map(|s| s.to_string())
}

/// Fetches pages and runs [`extract_email`] on them.
#[derive(Clone)]
pub struct EmailScraper {
    client: reqwest::Client,
}

impl EmailScraper {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub async fn scrape(&self, url: &str) -> Result<Option<String>, PlacesError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlacesError::Http(format!("fetch {url}: {e}")))?;
        let html = resp
            .text()
            .await
            .map_err(|e| PlacesError::Http(format!("read {url}: {e}")))?;

        let email = extract_email(&html);
        debug!(url, found = email.is_some(), "Scraped website");
        Ok(email)
    }
}

impl Default for EmailScraper {
    fn default() -> Self {
        Self::new()
    }
}
