//! Campaign data model: campaigns, recipients, and their statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::leads::Lead;

/// Outreach channel of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    /// Bulk email through the configured mail API.
    Email,
    /// Manual cold calling from a script.
    Call,
}

impl std::fmt::Display for CampaignType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Call => write!(f, "call"),
        }
    }
}

impl std::str::FromStr for CampaignType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "call" => Ok(Self::Call),
            _ => Err(format!("Unknown campaign type: {}", s)),
        }
    }
}

/// Lifecycle of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Created, not yet sent (or re-queued after a reset).
    Draft,
    /// A run is in progress.
    Sending,
    /// The last run finished.
    Completed,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Sending => write!(f, "sending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "sending" => Ok(Self::Sending),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown campaign status: {}", s)),
        }
    }
}

/// Per-recipient delivery status.
///
/// Moves `Pending → Processing → Sent | Failed` once per send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl DeliveryStatus {
    /// Whether a send attempt has finished for this recipient.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown delivery status: {}", s)),
        }
    }
}

/// Aggregate counters, always derived from recipient rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub total: u32,
    pub sent: u32,
    pub failed: u32,
}

/// A bulk outreach job targeting a saved list of leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub user_id: String,
    pub list_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_notes: Option<String>,
    #[serde(flatten)]
    pub counters: CampaignCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to create a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    #[serde(default)]
    pub user_id: String,
    pub list_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub campaign_type: CampaignType,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub call_script: Option<String>,
    #[serde(default)]
    pub call_notes: Option<String>,
}

impl NewCampaign {
    /// Check the type-specific template fields. Returns a reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".into());
        }
        let filled = |f: &Option<String>| f.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.campaign_type {
            CampaignType::Email if !filled(&self.subject) || !filled(&self.body) => {
                Err("email campaigns need a subject and a body".into())
            }
            CampaignType::Call if !filled(&self.call_script) => {
                Err("call campaigns need a call script".into())
            }
            _ => Ok(()),
        }
    }

    /// Materialize into a draft campaign.
    pub fn into_campaign(self) -> Campaign {
        let now = Utc::now();
        let email = self.campaign_type == CampaignType::Email;
        Campaign {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            list_id: self.list_id,
            name: self.name,
            campaign_type: self.campaign_type,
            status: CampaignStatus::Draft,
            subject: if email { self.subject } else { None },
            body: if email { self.body } else { None },
            call_script: if email { None } else { self.call_script },
            call_notes: if email { None } else { self.call_notes },
            counters: CampaignCounters::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// One lead targeted by a campaign, with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    /// Places id of the lead, used to look up contact details.
    pub place_id: String,
    pub company_name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Resolved email address, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipient {
    /// Snapshot a lead into a pending recipient.
    pub fn from_lead(campaign_id: Uuid, lead: &Lead) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            lead_id: lead.id,
            place_id: lead.place_id.clone(),
            company_name: lead.name.clone(),
            address: lead.formatted_address.clone(),
            phone: lead.phone.clone(),
            website: lead.website.clone(),
            email: None,
            status: DeliveryStatus::Pending,
            error: None,
            notes: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of a manual cold call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Contact was reached; counted as sent.
    Reached,
    /// No answer, wrong number, etc.; counted as failed.
    NotReached,
}

/// Outcome of a campaign run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Recipients this run claimed and submitted or failed.
    pub attempted: u32,
    pub sent: u32,
    pub failed: u32,
    /// Campaign counters after the run.
    pub counters: CampaignCounters,
}
