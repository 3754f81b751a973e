//! Lead data model: saved businesses, lists, list items, tags, templates,
//! and per-user settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::places::PlaceResult;

/// A business saved from a places search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    /// Places API id (unique).
    pub place_id: String,
    pub name: String,
    pub formatted_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ratings: Option<i64>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Build a new lead from a place result.
    pub fn from_place(place: &PlaceResult) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            place_id: place.place_id.clone(),
            name: place.name.clone(),
            formatted_address: place.formatted_address.clone(),
            website: place.website.clone(),
            phone: place.formatted_phone_number.clone(),
            rating: place.rating,
            total_ratings: place.user_ratings_total,
            flags: Vec::new(),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A named, user-owned grouping of leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadList {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeadList {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            description,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a lead list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadListUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Membership of a lead in a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: Uuid,
    pub list_id: Uuid,
    pub lead_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Free-form pipeline status, `new` by default.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListItem {
    pub fn new(list_id: Uuid, lead_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            list_id,
            lead_id,
            notes: None,
            status: "new".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a list item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListItemUpdate {
    pub notes: Option<String>,
    pub status: Option<String>,
}

/// A list item joined with its lead.
#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    #[serde(flatten)]
    pub item: ListItem,
    pub lead: Lead,
}

/// A free-form tag on a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadTag {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

/// A reusable email subject/body pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl EmailTemplate {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            subject: subject.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Per-user settings, currently the Gmail OAuth tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    #[serde(skip_serializing)]
    pub gmail_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub gmail_refresh_token: Option<String>,
    /// Expiry as epoch milliseconds.
    pub gmail_token_expiry: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserSettings {
    /// Whether the user has connected a Gmail account.
    pub fn gmail_connected(&self) -> bool {
        self.gmail_access_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }
}
