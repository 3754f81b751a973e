//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::campaigns::model::{
    Campaign, CampaignCounters, CampaignStatus, DeliveryStatus, Recipient,
};
use crate::error::DatabaseError;
use crate::leads::{
    EmailTemplate, Lead, LeadList, LeadListUpdate, LeadTag, ListEntry, ListItem, ListItemUpdate,
    UserSettings,
};

/// Backend-agnostic database trait covering leads, lists, campaigns and settings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Leads ───────────────────────────────────────────────────────

    /// Insert or update a lead keyed by `place_id`. Returns the stored row.
    async fn upsert_lead(&self, lead: &Lead) -> Result<Lead, DatabaseError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    async fn get_lead_by_place_id(&self, place_id: &str) -> Result<Option<Lead>, DatabaseError>;

    /// All saved leads, most recently updated first.
    async fn list_leads(&self) -> Result<Vec<Lead>, DatabaseError>;

    /// Delete a lead. Returns false if nothing matched.
    async fn delete_lead(&self, place_id: &str) -> Result<bool, DatabaseError>;

    async fn update_lead_flags(&self, place_id: &str, flags: &[String]) -> Result<bool, DatabaseError>;

    async fn update_lead_notes(&self, place_id: &str, notes: &str) -> Result<bool, DatabaseError>;

    // ── Lists ───────────────────────────────────────────────────────

    async fn create_list(&self, list: &LeadList) -> Result<(), DatabaseError>;

    async fn get_list(&self, id: Uuid) -> Result<Option<LeadList>, DatabaseError>;

    /// Non-archived lists of a user, newest first.
    async fn list_lists(&self, user_id: &str) -> Result<Vec<LeadList>, DatabaseError>;

    async fn update_list(&self, id: Uuid, update: &LeadListUpdate) -> Result<bool, DatabaseError>;

    async fn archive_list(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Add a lead to a list. A duplicate (list, lead) pair is a `Constraint` error.
    async fn add_list_item(&self, item: &ListItem) -> Result<(), DatabaseError>;

    /// Items of a list joined with their leads, newest first.
    async fn list_entries(&self, list_id: Uuid) -> Result<Vec<ListEntry>, DatabaseError>;

    async fn update_list_item(&self, id: Uuid, update: &ListItemUpdate) -> Result<bool, DatabaseError>;

    async fn remove_list_item(&self, list_id: Uuid, lead_id: Uuid) -> Result<bool, DatabaseError>;

    // ── Tags ────────────────────────────────────────────────────────

    async fn add_tag(&self, lead_id: Uuid, tag: &str) -> Result<LeadTag, DatabaseError>;

    async fn remove_tag(&self, lead_id: Uuid, tag: &str) -> Result<bool, DatabaseError>;

    async fn list_tags(&self, lead_id: Uuid) -> Result<Vec<LeadTag>, DatabaseError>;

    // ── Templates ───────────────────────────────────────────────────

    async fn create_template(&self, template: &EmailTemplate) -> Result<(), DatabaseError>;

    async fn list_templates(&self, user_id: &str) -> Result<Vec<EmailTemplate>, DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn get_user_settings(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError>;

    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), DatabaseError>;

    /// Remember the OAuth `state` handed out to a user, replacing any earlier one.
    async fn save_oauth_state(&self, user_id: &str, state: &str) -> Result<(), DatabaseError>;

    /// Remove and return a user's pending OAuth `state` with its creation time.
    async fn take_oauth_state(
        &self,
        user_id: &str,
    ) -> Result<Option<(String, DateTime<Utc>)>, DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    /// Insert a campaign together with its recipients in one transaction.
    /// Safe to call from concurrent tasks.
    async fn insert_campaign(
        &self,
        campaign: &Campaign,
        recipients: &[Recipient],
    ) -> Result<(), DatabaseError>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError>;

    async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, DatabaseError>;

    /// Campaigns of every user in a given status (startup recovery).
    async fn list_campaigns_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, DatabaseError>;

    /// Atomically move a campaign to `sending` unless it already is.
    /// Returns false when another run holds it.
    async fn claim_campaign(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn update_campaign_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    /// Recompute total/sent/failed from recipient rows and store them.
    async fn refresh_campaign_counters(&self, id: Uuid) -> Result<CampaignCounters, DatabaseError>;

    // ── Recipients ──────────────────────────────────────────────────

    async fn get_recipient(&self, id: Uuid) -> Result<Option<Recipient>, DatabaseError>;

    /// Recipients of a campaign, optionally filtered by status, in creation order.
    async fn list_recipients(
        &self,
        campaign_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<Recipient>, DatabaseError>;

    /// `pending → processing`. Returns false if the row was not pending.
    async fn mark_recipient_processing(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// `processing → sent`, storing the address it went to.
    async fn mark_recipient_sent(
        &self,
        id: Uuid,
        email: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// `processing → failed` with a human-readable reason.
    async fn mark_recipient_failed(&self, id: Uuid, error: &str) -> Result<bool, DatabaseError>;

    /// Record a manual call result on a pending recipient.
    async fn record_call(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        notes: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// Move every failed recipient of a campaign back to pending.
    async fn reset_failed_recipients(&self, campaign_id: Uuid) -> Result<u64, DatabaseError>;

    /// Fail recipients left in `processing` by an interrupted run.
    async fn fail_processing_recipients(
        &self,
        campaign_id: Uuid,
        reason: &str,
    ) -> Result<u64, DatabaseError>;
}
