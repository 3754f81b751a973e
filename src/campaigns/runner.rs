//! Campaign runner: drives a campaign from its pending recipients to
//! persisted per-recipient delivery results.

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{
    CallOutcome, Campaign, CampaignStatus, CampaignType, DeliveryStatus, NewCampaign, Recipient,
    RunSummary,
};
use super::template::{TemplateVars, html_to_text, render};
use crate::config::DispatchConfig;
use crate::contacts::ContactResolver;
use crate::dispatch::DispatchQueue;
use crate::error::{CampaignError, MailError};
use crate::mail::gmail::GMAIL_API_BASE_URL;
use crate::mail::{EmailContent, GmailSender, MailSender};
use crate::store::Database;

/// Failure reason stored when no address could be resolved.
pub const NO_EMAIL_FOUND: &str = "No email address found";

/// Failure reason stored for recipients caught mid-send by a restart.
pub const INTERRUPTED: &str = "Interrupted before completion";

/// Where outbound mail goes.
enum Outbound {
    /// Gmail with the campaign owner's stored OAuth token.
    Gmail { api_base: String },
    /// One service account shared by every campaign.
    Service {
        queue: Arc<DispatchQueue>,
        from: String,
    },
}

pub struct CampaignRunner {
    db: Arc<dyn Database>,
    resolver: Arc<dyn ContactResolver>,
    dispatch: DispatchConfig,
    outbound: Outbound,
}

impl CampaignRunner {
    /// Send through each owner's Gmail account.
    pub fn with_gmail(
        db: Arc<dyn Database>,
        resolver: Arc<dyn ContactResolver>,
        dispatch: DispatchConfig,
    ) -> Self {
        Self::with_gmail_api(db, resolver, dispatch, GMAIL_API_BASE_URL)
    }

    pub fn with_gmail_api(
        db: Arc<dyn Database>,
        resolver: Arc<dyn ContactResolver>,
        dispatch: DispatchConfig,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            db,
            resolver,
            dispatch,
            outbound: Outbound::Gmail {
                api_base: api_base.into(),
            },
        }
    }

    /// Send through a shared sender (SendGrid or SMTP) from a fixed address.
    pub fn with_service(
        db: Arc<dyn Database>,
        resolver: Arc<dyn ContactResolver>,
        dispatch: DispatchConfig,
        sender: Arc<dyn MailSender>,
        from: impl Into<String>,
    ) -> Self {
        let queue = Arc::new(DispatchQueue::new(sender, dispatch.clone()));
        Self {
            db,
            resolver,
            dispatch,
            outbound: Outbound::Service {
                queue,
                from: from.into(),
            },
        }
    }

    /// Build the queue and From address for a campaign owner.
    async fn outbound_for(&self, user_id: &str) -> Result<(Arc<DispatchQueue>, String), CampaignError> {
        match &self.outbound {
            Outbound::Service { queue, from } => Ok((Arc::clone(queue), from.clone())),
            Outbound::Gmail { api_base } => {
                let unauthenticated = || CampaignError::Unauthenticated {
                    user_id: user_id.to_string(),
                    provider: "gmail".into(),
                };
                let token = self
                    .db
                    .get_user_settings(user_id)
                    .await?
                    .filter(|s| s.gmail_connected())
                    .and_then(|s| s.gmail_access_token)
                    .ok_or_else(unauthenticated)?;

                let sender = GmailSender::with_base_url(SecretString::from(token), api_base.clone());
                let from = match sender.profile_email().await {
                    Ok(from) => from,
                    Err(MailError::Unauthenticated { .. }) => return Err(unauthenticated()),
                    Err(e) => return Err(e.into()),
                };
                let queue = DispatchQueue::new(Arc::new(sender), self.dispatch.clone());
                Ok((Arc::new(queue), from))
            }
        }
    }

    /// Send every pending recipient of an email campaign.
    pub async fn run(&self, campaign_id: Uuid) -> Result<RunSummary, CampaignError> {
        self.prepare(campaign_id).await?.execute().await
    }

    /// Validate a campaign, set up its sender and claim it for sending.
    ///
    /// Everything that can reject a run happens here; the returned
    /// [`PreparedRun`] only records per-recipient failures.
    pub async fn prepare(&self, campaign_id: Uuid) -> Result<PreparedRun, CampaignError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound { id: campaign_id })?;

        if campaign.campaign_type != CampaignType::Email {
            return Err(invalid_state(&campaign, "only email campaigns can be sent"));
        }
        if campaign.status == CampaignStatus::Sending {
            return Err(invalid_state(&campaign, "a run is already in progress"));
        }

        let (queue, from) = self.outbound_for(&campaign.user_id).await?;

        if !self.db.claim_campaign(campaign_id).await? {
            return Err(invalid_state(&campaign, "a run is already in progress"));
        }
        info!(campaign_id = %campaign_id, provider = queue.sender_name(), "Campaign run started");

        Ok(PreparedRun {
            db: Arc::clone(&self.db),
            resolver: Arc::clone(&self.resolver),
            campaign,
            queue,
            from,
        })
    }

    /// Create a campaign from a list, snapshotting each lead as a pending recipient.
    pub async fn create_campaign(&self, request: NewCampaign) -> Result<Campaign, CampaignError> {
        request.validate().map_err(CampaignError::InvalidInput)?;

        let list_id = request.list_id;
        self.db
            .get_list(list_id)
            .await?
            .filter(|l| l.user_id == request.user_id && !l.is_archived)
            .ok_or(CampaignError::ListNotFound { id: list_id })?;

        let entries = self.db.list_entries(list_id).await?;
        let mut campaign = request.into_campaign();
        let recipients: Vec<Recipient> = entries
            .iter()
            .rev()
            .map(|entry| Recipient::from_lead(campaign.id, &entry.lead))
            .collect();
        campaign.counters.total = recipients.len() as u32;

        self.db.insert_campaign(&campaign, &recipients).await?;
        Ok(campaign)
    }

    /// Record the result of a manual call on a call campaign recipient.
    pub async fn log_call(
        &self,
        recipient_id: Uuid,
        outcome: CallOutcome,
        notes: Option<&str>,
    ) -> Result<Recipient, CampaignError> {
        let recipient = self
            .db
            .get_recipient(recipient_id)
            .await?
            .ok_or(CampaignError::RecipientNotFound { id: recipient_id })?;
        let campaign = self
            .db
            .get_campaign(recipient.campaign_id)
            .await?
            .ok_or(CampaignError::NotFound {
                id: recipient.campaign_id,
            })?;
        if campaign.campaign_type != CampaignType::Call {
            return Err(invalid_state(&campaign, "calls are logged on call campaigns only"));
        }

        let status = match outcome {
            CallOutcome::Reached => DeliveryStatus::Sent,
            CallOutcome::NotReached => DeliveryStatus::Failed,
        };
        if !self.db.record_call(recipient_id, status, notes).await? {
            return Err(invalid_state(
                &campaign,
                &format!("recipient {recipient_id} is already {}", recipient.status),
            ));
        }

        let counters = self.db.refresh_campaign_counters(campaign.id).await?;
        if counters.sent + counters.failed == counters.total {
            self.db
                .update_campaign_status(campaign.id, CampaignStatus::Completed, Some(Utc::now()))
                .await?;
        }

        self.db
            .get_recipient(recipient_id)
            .await?
            .ok_or(CampaignError::RecipientNotFound { id: recipient_id })
    }

    /// Move failed recipients back to pending so the next run retries them.
    pub async fn reset_failed(&self, campaign_id: Uuid) -> Result<u64, CampaignError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound { id: campaign_id })?;
        if campaign.status == CampaignStatus::Sending {
            return Err(invalid_state(&campaign, "wait for the run to finish"));
        }

        let requeued = self.db.reset_failed_recipients(campaign_id).await?;
        self.db.refresh_campaign_counters(campaign_id).await?;
        if requeued > 0 {
            self.db
                .update_campaign_status(campaign_id, CampaignStatus::Draft, None)
                .await?;
        }
        Ok(requeued)
    }

    /// Close out campaigns left `sending` by a previous process.
    pub async fn recover_interrupted(&self) -> Result<usize, CampaignError> {
        let stuck = self.db.list_campaigns_by_status(CampaignStatus::Sending).await?;
        for campaign in &stuck {
            let failed = self
                .db
                .fail_processing_recipients(campaign.id, INTERRUPTED)
                .await?;
            let counters = self.db.refresh_campaign_counters(campaign.id).await?;
            let (status, completed_at) = if counters.sent + counters.failed == counters.total {
                (CampaignStatus::Completed, Some(Utc::now()))
            } else {
                (CampaignStatus::Draft, None)
            };
            self.db
                .update_campaign_status(campaign.id, status, completed_at)
                .await?;
            warn!(campaign_id = %campaign.id, failed, %status, "Recovered interrupted campaign");
        }
        Ok(stuck.len())
    }
}

fn invalid_state(campaign: &Campaign, reason: &str) -> CampaignError {
    CampaignError::InvalidState {
        id: campaign.id,
        state: campaign.status.to_string(),
        reason: reason.to_string(),
    }
}

/// A claimed campaign ready to send. Owns everything it needs so it can be
/// moved onto a spawned task.
pub struct PreparedRun {
    db: Arc<dyn Database>,
    resolver: Arc<dyn ContactResolver>,
    campaign: Campaign,
    queue: Arc<DispatchQueue>,
    from: String,
}

impl PreparedRun {
    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    /// Resolve, render, send and persist every pending recipient.
    pub async fn execute(self) -> Result<RunSummary, CampaignError> {
        let campaign_id = self.campaign.id;
        match self.send_pending().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "Campaign run aborted");
                self.release(&format!("Run aborted: {e}")).await;
                Err(e)
            }
        }
    }

    async fn send_pending(&self) -> Result<RunSummary, CampaignError> {
        let campaign = &self.campaign;
        let pending = self
            .db
            .list_recipients(campaign.id, Some(DeliveryStatus::Pending))
            .await?;

        let mut summary = RunSummary::default();
        for recipient in &pending {
            if !self.db.mark_recipient_processing(recipient.id).await? {
                continue;
            }
            summary.attempted += 1;

            match self.deliver(recipient).await {
                Ok(to) => {
                    self.db
                        .mark_recipient_sent(recipient.id, &to, Utc::now())
                        .await?;
                    summary.sent += 1;
                }
                Err(reason) => {
                    self.db.mark_recipient_failed(recipient.id, &reason).await?;
                    summary.failed += 1;
                }
            }
            self.db.refresh_campaign_counters(campaign.id).await?;
        }

        summary.counters = self.db.refresh_campaign_counters(campaign.id).await?;
        self.db
            .update_campaign_status(campaign.id, CampaignStatus::Completed, Some(Utc::now()))
            .await?;

        info!(
            campaign_id = %campaign.id,
            attempted = summary.attempted,
            sent = summary.sent,
            failed = summary.failed,
            "Campaign run completed"
        );
        Ok(summary)
    }

    /// Resolve, render and submit one claimed recipient. Returns the address
    /// it went to, or the failure reason to store.
    async fn deliver(&self, recipient: &Recipient) -> Result<String, String> {
        let to = self
            .resolve_address(recipient)
            .await
            .ok_or_else(|| NO_EMAIL_FOUND.to_string())?;
        let email = self.compose(recipient, to);
        self.queue
            .send_single(&email)
            .await
            .map(|()| email.to)
            .map_err(|e| e.to_string())
    }

    fn compose(&self, recipient: &Recipient, to: String) -> EmailContent {
        let campaign = &self.campaign;
        let vars = TemplateVars::from_recipient(recipient);
        let html = render(campaign.body.as_deref().unwrap_or_default(), &vars);
        let text = html_to_text(&html);
        EmailContent::new(
            to,
            self.from.as_str(),
            render(campaign.subject.as_deref().unwrap_or_default(), &vars),
            html,
        )
        .with_text(text)
        .with_arg("user_id", campaign.user_id.as_str())
        .for_recipient(campaign.id, recipient.id)
    }

    /// Stored address first, then the resolver. Lookup errors count as no address.
    async fn resolve_address(&self, recipient: &Recipient) -> Option<String> {
        if let Some(email) = recipient.email.as_deref().filter(|e| !e.trim().is_empty()) {
            return Some(email.trim().to_string());
        }
        match self.resolver.resolve_email(recipient).await {
            Ok(email) => email,
            Err(e) => {
                warn!(recipient_id = %recipient.id, place_id = %recipient.place_id, error = %e, "Contact lookup failed");
                None
            }
        }
    }

    /// Best-effort cleanup after an aborted run.
    async fn release(&self, reason: &str) {
        let campaign_id = self.campaign.id;
        if let Err(e) = self.db.fail_processing_recipients(campaign_id, reason).await {
            warn!(campaign_id = %campaign_id, error = %e, "Failed to release recipients");
        }
        if let Err(e) = self.db.refresh_campaign_counters(campaign_id).await {
            warn!(campaign_id = %campaign_id, error = %e, "Failed to refresh counters");
        }
        if let Err(e) = self
            .db
            .update_campaign_status(campaign_id, CampaignStatus::Draft, None)
            .await
        {
            warn!(campaign_id = %campaign_id, error = %e, "Failed to release campaign");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::DateTime;

    use super::*;
    use crate::campaigns::model::CampaignCounters;
    use crate::error::{DatabaseError, PlacesError};
    use crate::leads::{
        EmailTemplate, Lead, LeadList, LeadListUpdate, LeadTag, ListEntry, ListItem,
        ListItemUpdate, UserSettings,
    };
    use crate::places::PlaceResult;
    use crate::store::LibSqlBackend;

    /// Addresses by place id; `boom` errors.
    struct MapResolver(HashMap<String, String>);

    #[async_trait]
    impl ContactResolver for MapResolver {
        async fn resolve_email(&self, recipient: &Recipient) -> Result<Option<String>, PlacesError> {
            if recipient.place_id == "boom" {
                return Err(PlacesError::Http("connection reset".into()));
            }
            Ok(self.0.get(&recipient.place_id).cloned())
        }
    }

    /// Records every message; rejects addresses starting with `bad`.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<EmailContent>>,
    }

    #[async_trait]
    impl MailSender for RecordingSender {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, email: &EmailContent) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(email.clone());
            if email.to.starts_with("bad") {
                return Err(MailError::SendFailed {
                    provider: "recording".into(),
                    reason: "550 mailbox unavailable".into(),
                });
            }
            Ok(())
        }
    }

    /// Snapshots what the store holds each time a message goes out.
    struct ObservingSender {
        db: Arc<dyn Database>,
        submitted: tokio::sync::Mutex<Vec<Uuid>>,
        /// Campaign counters and the status of every earlier recipient, per send.
        seen: tokio::sync::Mutex<Vec<(CampaignCounters, Vec<DeliveryStatus>)>>,
    }

    #[async_trait]
    impl MailSender for ObservingSender {
        fn name(&self) -> &str {
            "observing"
        }

        async fn send(&self, email: &EmailContent) -> Result<(), MailError> {
            let campaign = self
                .db
                .get_campaign(email.campaign_id.unwrap())
                .await
                .unwrap()
                .unwrap();
            let mut submitted = self.submitted.lock().await;
            let mut statuses = Vec::new();
            for id in submitted.iter() {
                statuses.push(self.db.get_recipient(*id).await.unwrap().unwrap().status);
            }
            submitted.push(email.recipient_id.unwrap());
            self.seen.lock().await.push((campaign.counters, statuses));
            Ok(())
        }
    }

    /// A real store that can lose recipient claims to another worker and can
    /// start failing `mark_recipient_sent` after a number of calls.
    struct FaultyStore {
        inner: LibSqlBackend,
        /// Recipients another worker claims and sends first.
        taken: Mutex<Vec<Uuid>>,
        sent_ok: Option<usize>,
        sent_calls: AtomicUsize,
    }

    impl FaultyStore {
        async fn new(sent_ok: Option<usize>) -> Self {
            Self {
                inner: LibSqlBackend::new_memory().await.unwrap(),
                taken: Mutex::new(Vec::new()),
                sent_ok,
                sent_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Database for FaultyStore {
        async fn init_schema(&self) -> Result<(), DatabaseError> {
            self.inner.init_schema().await
        }
        async fn upsert_lead(&self, lead: &Lead) -> Result<Lead, DatabaseError> {
            self.inner.upsert_lead(lead).await
        }
        async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
            self.inner.get_lead(id).await
        }
        async fn get_lead_by_place_id(&self, place_id: &str) -> Result<Option<Lead>, DatabaseError> {
            self.inner.get_lead_by_place_id(place_id).await
        }
        async fn list_leads(&self) -> Result<Vec<Lead>, DatabaseError> {
            self.inner.list_leads().await
        }
        async fn delete_lead(&self, place_id: &str) -> Result<bool, DatabaseError> {
            self.inner.delete_lead(place_id).await
        }
        async fn update_lead_flags(&self, place_id: &str, flags: &[String]) -> Result<bool, DatabaseError> {
            self.inner.update_lead_flags(place_id, flags).await
        }
        async fn update_lead_notes(&self, place_id: &str, notes: &str) -> Result<bool, DatabaseError> {
            self.inner.update_lead_notes(place_id, notes).await
        }
        async fn create_list(&self, list: &LeadList) -> Result<(), DatabaseError> {
            self.inner.create_list(list).await
        }
        async fn get_list(&self, id: Uuid) -> Result<Option<LeadList>, DatabaseError> {
            self.inner.get_list(id).await
        }
        async fn list_lists(&self, user_id: &str) -> Result<Vec<LeadList>, DatabaseError> {
            self.inner.list_lists(user_id).await
        }
        async fn update_list(&self, id: Uuid, update: &LeadListUpdate) -> Result<bool, DatabaseError> {
            self.inner.update_list(id, update).await
        }
        async fn archive_list(&self, id: Uuid) -> Result<bool, DatabaseError> {
            self.inner.archive_list(id).await
        }
        async fn add_list_item(&self, item: &ListItem) -> Result<(), DatabaseError> {
            self.inner.add_list_item(item).await
        }
        async fn list_entries(&self, list_id: Uuid) -> Result<Vec<ListEntry>, DatabaseError> {
            self.inner.list_entries(list_id).await
        }
        async fn update_list_item(&self, id: Uuid, update: &ListItemUpdate) -> Result<bool, DatabaseError> {
            self.inner.update_list_item(id, update).await
        }
        async fn remove_list_item(&self, list_id: Uuid, lead_id: Uuid) -> Result<bool, DatabaseError> {
            self.inner.remove_list_item(list_id, lead_id).await
        }
        async fn add_tag(&self, lead_id: Uuid, tag: &str) -> Result<LeadTag, DatabaseError> {
            self.inner.add_tag(lead_id, tag).await
        }
        async fn remove_tag(&self, lead_id: Uuid, tag: &str) -> Result<bool, DatabaseError> {
            self.inner.remove_tag(lead_id, tag).await
        }
        async fn list_tags(&self, lead_id: Uuid) -> Result<Vec<LeadTag>, DatabaseError> {
            self.inner.list_tags(lead_id).await
        }
        async fn create_template(&self, template: &EmailTemplate) -> Result<(), DatabaseError> {
            self.inner.create_template(template).await
        }
        async fn list_templates(&self, user_id: &str) -> Result<Vec<EmailTemplate>, DatabaseError> {
            self.inner.list_templates(user_id).await
        }
        async fn get_user_settings(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError> {
            self.inner.get_user_settings(user_id).await
        }
        async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), DatabaseError> {
            self.inner.upsert_user_settings(settings).await
        }
        async fn save_oauth_state(&self, user_id: &str, state: &str) -> Result<(), DatabaseError> {
            self.inner.save_oauth_state(user_id, state).await
        }
        async fn take_oauth_state(
            &self,
            user_id: &str,
        ) -> Result<Option<(String, DateTime<Utc>)>, DatabaseError> {
            self.inner.take_oauth_state(user_id).await
        }
        async fn insert_campaign(&self, campaign: &Campaign, recipients: &[Recipient]) -> Result<(), DatabaseError> {
            self.inner.insert_campaign(campaign, recipients).await
        }
        async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
            self.inner.get_campaign(id).await
        }
        async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, DatabaseError> {
            self.inner.list_campaigns(user_id).await
        }
        async fn list_campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>, DatabaseError> {
            self.inner.list_campaigns_by_status(status).await
        }
        async fn claim_campaign(&self, id: Uuid) -> Result<bool, DatabaseError> {
            self.inner.claim_campaign(id).await
        }
        async fn update_campaign_status(
            &self,
            id: Uuid,
            status: CampaignStatus,
            completed_at: Option<DateTime<Utc>>,
        ) -> Result<(), DatabaseError> {
            self.inner.update_campaign_status(id, status, completed_at).await
        }
        async fn refresh_campaign_counters(&self, id: Uuid) -> Result<CampaignCounters, DatabaseError> {
            self.inner.refresh_campaign_counters(id).await
        }
        async fn get_recipient(&self, id: Uuid) -> Result<Option<Recipient>, DatabaseError> {
            self.inner.get_recipient(id).await
        }
        async fn list_recipients(
            &self,
            campaign_id: Uuid,
            status: Option<DeliveryStatus>,
        ) -> Result<Vec<Recipient>, DatabaseError> {
            self.inner.list_recipients(campaign_id, status).await
        }
        async fn mark_recipient_processing(&self, id: Uuid) -> Result<bool, DatabaseError> {
            let taken = self.taken.lock().unwrap().contains(&id);
            if taken {
                self.inner.mark_recipient_processing(id).await?;
                self.inner.mark_recipient_sent(id, "other@worker.test", Utc::now()).await?;
                return Ok(false);
            }
            self.inner.mark_recipient_processing(id).await
        }
        async fn mark_recipient_sent(&self, id: Uuid, email: &str, sent_at: DateTime<Utc>) -> Result<bool, DatabaseError> {
            let calls = self.sent_calls.fetch_add(1, Ordering::SeqCst);
            if self.sent_ok.is_some_and(|ok| calls >= ok) {
                return Err(DatabaseError::Query("disk I/O error".into()));
            }
            self.inner.mark_recipient_sent(id, email, sent_at).await
        }
        async fn mark_recipient_failed(&self, id: Uuid, error: &str) -> Result<bool, DatabaseError> {
            self.inner.mark_recipient_failed(id, error).await
        }
        async fn record_call(&self, id: Uuid, status: DeliveryStatus, notes: Option<&str>) -> Result<bool, DatabaseError> {
            self.inner.record_call(id, status, notes).await
        }
        async fn reset_failed_recipients(&self, campaign_id: Uuid) -> Result<u64, DatabaseError> {
            self.inner.reset_failed_recipients(campaign_id).await
        }
        async fn fail_processing_recipients(&self, campaign_id: Uuid, reason: &str) -> Result<u64, DatabaseError> {
            self.inner.fail_processing_recipients(campaign_id, reason).await
        }
    }

    fn place(id: &str) -> PlaceResult {
        PlaceResult {
            place_id: id.into(),
            name: format!("Biz {id}"),
            formatted_address: format!("{id} Main St"),
            types: vec![],
            business_status: None,
            rating: None,
            user_ratings_total: None,
            website: None,
            formatted_phone_number: Some("555-0100".into()),
            opening_hours: None,
        }
    }

    struct Fixture {
        db: Arc<dyn Database>,
        sender: Arc<RecordingSender>,
        runner: CampaignRunner,
        list: LeadList,
    }

    async fn fixture(place_ids: &[&str], addresses: &[(&str, &str)]) -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sender = Arc::new(RecordingSender::default());
        let (runner, list) = runner_on(
            Arc::clone(&db),
            place_ids,
            addresses,
            Arc::clone(&sender) as Arc<dyn MailSender>,
        )
        .await;
        Fixture {
            db,
            sender,
            runner,
            list,
        }
    }

    /// Seed a list on `db` and build a service runner around `sender`.
    async fn runner_on(
        db: Arc<dyn Database>,
        place_ids: &[&str],
        addresses: &[(&str, &str)],
        sender: Arc<dyn MailSender>,
    ) -> (CampaignRunner, LeadList) {
        let list = LeadList::new("u1", "Plumbers", None);
        db.create_list(&list).await.unwrap();
        for id in place_ids {
            let lead = db.upsert_lead(&Lead::from_place(&place(id))).await.unwrap();
            db.add_list_item(&ListItem::new(list.id, lead.id)).await.unwrap();
        }

        let resolver = MapResolver(
            addresses
                .iter()
                .map(|(p, e)| (p.to_string(), e.to_string()))
                .collect(),
        );
        let runner = CampaignRunner::with_service(
            db,
            Arc::new(resolver),
            DispatchConfig::new(1000, 2).unwrap(),
            sender,
            "outreach@agency.test",
        );
        (runner, list)
    }

    fn email_campaign(list_id: Uuid) -> NewCampaign {
        NewCampaign {
            user_id: "u1".into(),
            list_id,
            name: "Spring".into(),
            campaign_type: CampaignType::Email,
            subject: Some("A note for {{company_name}}".into()),
            body: Some("<p>Hi {{company_name}} at {{address}}, call {{phone}}</p>".into()),
            call_script: None,
            call_notes: None,
        }
    }

    fn call_campaign(list_id: Uuid) -> NewCampaign {
        NewCampaign {
            campaign_type: CampaignType::Call,
            subject: None,
            body: None,
            call_script: Some("Hi, is the owner around?".into()),
            ..email_campaign(list_id)
        }
    }

    #[tokio::test]
    async fn create_campaign_snapshots_list() {
        let f = fixture(&["p1", "p2", "p3"], &[]).await;
        let campaign = f.runner.create_campaign(email_campaign(f.list.id)).await.unwrap();
        assert_eq!(campaign.counters.total, 3);

        let recipients = f.db.list_recipients(campaign.id, None).await.unwrap();
        assert_eq!(recipients.len(), 3);
        assert!(recipients.iter().all(|r| r.status == DeliveryStatus::Pending));
        assert_eq!(recipients[0].company_name, "Biz p1");
    }

    #[tokio::test]
    async fn create_campaign_rejects_foreign_or_missing_list() {
        let f = fixture(&["p1"], &[]).await;
        let mut req = email_campaign(f.list.id);
        req.user_id = "intruder".into();
        assert!(matches!(
            f.runner.create_campaign(req).await,
            Err(CampaignError::ListNotFound { .. })
        ));

        let mut req = email_campaign(f.list.id);
        req.body = None;
        assert!(matches!(
            f.runner.create_campaign(req).await,
            Err(CampaignError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn run_records_each_recipient_and_continues_past_failures() {
        let f = fixture(
            &["p1", "p2", "p3", "p4", "boom"],
            &[("p1", "info@p1.test"), ("p2", "bad@p2.test"), ("p4", "hello@p4.test")],
        )
        .await;
        let campaign = f.runner.create_campaign(email_campaign(f.list.id)).await.unwrap();

        let summary = f.runner.run(campaign.id).await.unwrap();
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.counters, CampaignCounters { total: 5, sent: 2, failed: 3 });

        let sent = f.sender.sent.lock().unwrap().clone();
        let to: Vec<_> = sent.iter().map(|m| m.to.as_str()).collect();
        assert_eq!(to, vec!["info@p1.test", "bad@p2.test", "hello@p4.test"]);
        assert_eq!(sent[0].subject, "A note for Biz p1");
        assert_eq!(sent[0].html, "<p>Hi Biz p1 at p1 Main St, call 555-0100</p>");
        assert_eq!(sent[0].from, "outreach@agency.test");
        assert_eq!(sent[0].campaign_id, Some(campaign.id));
        assert_eq!(sent[0].text.as_deref(), Some("Hi Biz p1 at p1 Main St, call 555-0100"));
        assert_eq!(sent[0].custom_args["user_id"], "u1");

        let recipients = f.db.list_recipients(campaign.id, None).await.unwrap();
        let by_place: HashMap<_, _> = recipients.iter().map(|r| (r.place_id.as_str(), r)).collect();
        assert_eq!(by_place["p1"].status, DeliveryStatus::Sent);
        assert_eq!(by_place["p1"].email.as_deref(), Some("info@p1.test"));
        assert!(by_place["p1"].sent_at.is_some());
        assert_eq!(by_place["p2"].status, DeliveryStatus::Failed);
        assert!(by_place["p2"].error.as_deref().unwrap().contains("550"));
        assert_eq!(by_place["p3"].error.as_deref(), Some(NO_EMAIL_FOUND));
        assert_eq!(by_place["boom"].error.as_deref(), Some(NO_EMAIL_FOUND));

        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.counters, summary.counters);
    }

    #[tokio::test]
    async fn recipient_without_address_is_never_submitted() {
        let f = fixture(&["p1", "p2"], &[("p2", "info@p2.test")]).await;
        let campaign = f.runner.create_campaign(email_campaign(f.list.id)).await.unwrap();
        f.runner.run(campaign.id).await.unwrap();

        let sent = f.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "info@p2.test");

        let failed = f
            .db
            .list_recipients(campaign.id, Some(DeliveryStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].place_id, "p1");
        assert_eq!(failed[0].error.as_deref(), Some(NO_EMAIL_FOUND));
    }

    #[tokio::test]
    async fn second_run_only_touches_requeued_recipients() {
        let f = fixture(&["p1", "p2"], &[("p1", "info@p1.test"), ("p2", "bad@p2.test")]).await;
        let campaign = f.runner.create_campaign(email_campaign(f.list.id)).await.unwrap();
        f.runner.run(campaign.id).await.unwrap();

        let empty = f.runner.run(campaign.id).await.unwrap();
        assert_eq!(empty.attempted, 0);

        assert_eq!(f.runner.reset_failed(campaign.id).await.unwrap(), 1);
        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
        assert_eq!(stored.counters, CampaignCounters { total: 2, sent: 1, failed: 0 });

        let retry = f.runner.run(campaign.id).await.unwrap();
        assert_eq!(retry.attempted, 1);
        assert_eq!(f.sender.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn run_rejects_unknown_call_and_busy_campaigns() {
        let f = fixture(&["p1"], &[]).await;
        assert!(matches!(
            f.runner.run(Uuid::new_v4()).await,
            Err(CampaignError::NotFound { .. })
        ));

        let call = f.runner.create_campaign(call_campaign(f.list.id)).await.unwrap();
        assert!(matches!(
            f.runner.run(call.id).await,
            Err(CampaignError::InvalidState { .. })
        ));

        let email = f.runner.create_campaign(email_campaign(f.list.id)).await.unwrap();
        assert!(f.db.claim_campaign(email.id).await.unwrap());
        assert!(matches!(
            f.runner.run(email.id).await,
            Err(CampaignError::InvalidState { ref state, .. }) if state == "sending"
        ));
        assert!(f.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gmail_runner_requires_connected_account() {
        let f = fixture(&["p1"], &[("p1", "info@p1.test")]).await;
        let runner = CampaignRunner::with_gmail_api(
            Arc::clone(&f.db),
            Arc::new(MapResolver(HashMap::new())),
            DispatchConfig::default(),
            "http://127.0.0.1:9",
        );
        let campaign = runner.create_campaign(email_campaign(f.list.id)).await.unwrap();

        let err = runner.run(campaign.id).await.unwrap_err();
        assert!(matches!(err, CampaignError::Unauthenticated { ref provider, .. } if provider == "gmail"));

        f.db.upsert_user_settings(&UserSettings {
            user_id: "u1".into(),
            gmail_access_token: Some(String::new()),
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(matches!(
            runner.run(campaign.id).await,
            Err(CampaignError::Unauthenticated { .. })
        ));

        // Nothing was claimed or touched.
        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
    }

    #[tokio::test]
    async fn log_call_updates_counters_and_completes() {
        let f = fixture(&["p1", "p2"], &[]).await;
        let campaign = f.runner.create_campaign(call_campaign(f.list.id)).await.unwrap();
        let recipients = f.db.list_recipients(campaign.id, None).await.unwrap();

        let reached = f
            .runner
            .log_call(recipients[0].id, CallOutcome::Reached, Some("wants a quote"))
            .await
            .unwrap();
        assert_eq!(reached.status, DeliveryStatus::Sent);
        assert_eq!(reached.notes.as_deref(), Some("wants a quote"));

        assert!(matches!(
            f.runner.log_call(recipients[0].id, CallOutcome::NotReached, None).await,
            Err(CampaignError::InvalidState { .. })
        ));

        f.runner
            .log_call(recipients[1].id, CallOutcome::NotReached, None)
            .await
            .unwrap();
        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.counters, CampaignCounters { total: 2, sent: 1, failed: 1 });
        assert_eq!(stored.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn log_call_rejects_email_campaigns() {
        let f = fixture(&["p1"], &[]).await;
        let campaign = f.runner.create_campaign(email_campaign(f.list.id)).await.unwrap();
        let recipients = f.db.list_recipients(campaign.id, None).await.unwrap();
        assert!(matches!(
            f.runner.log_call(recipients[0].id, CallOutcome::Reached, None).await,
            Err(CampaignError::InvalidState { .. })
        ));
        assert!(matches!(
            f.runner.log_call(Uuid::new_v4(), CallOutcome::Reached, None).await,
            Err(CampaignError::RecipientNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn recover_interrupted_fails_in_flight_recipients() {
        let f = fixture(&["p1", "p2"], &[]).await;
        let campaign = f.runner.create_campaign(email_campaign(f.list.id)).await.unwrap();
        let recipients = f.db.list_recipients(campaign.id, None).await.unwrap();
        f.db.claim_campaign(campaign.id).await.unwrap();
        f.db.mark_recipient_processing(recipients[0].id).await.unwrap();

        assert_eq!(f.runner.recover_interrupted().await.unwrap(), 1);
        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
        assert_eq!(stored.counters, CampaignCounters { total: 2, sent: 0, failed: 1 });
        let failed = f.db.get_recipient(recipients[0].id).await.unwrap().unwrap();
        assert_eq!(failed.error.as_deref(), Some(INTERRUPTED));
    }

    #[tokio::test]
    async fn progress_is_stored_as_each_message_goes_out() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sender = Arc::new(ObservingSender {
            db: Arc::clone(&db),
            submitted: Default::default(),
            seen: Default::default(),
        });
        let (runner, list) = runner_on(
            Arc::clone(&db),
            &["p1", "p2", "p3"],
            &[("p1", "info@p1.test"), ("p3", "info@p3.test")],
            Arc::clone(&sender) as Arc<dyn MailSender>,
        )
        .await;
        let campaign = runner.create_campaign(email_campaign(list.id)).await.unwrap();

        runner.run(campaign.id).await.unwrap();

        let seen = sender.seen.lock().await.clone();
        assert_eq!(
            seen,
            vec![
                (CampaignCounters { total: 3, sent: 0, failed: 0 }, vec![]),
                (
                    CampaignCounters { total: 3, sent: 1, failed: 1 },
                    vec![DeliveryStatus::Sent]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn store_failure_mid_run_releases_campaign_and_keeps_delivered() {
        let store = Arc::new(FaultyStore::new(Some(1)).await);
        let db: Arc<dyn Database> = store.clone();
        let sender = Arc::new(RecordingSender::default());
        let (runner, list) = runner_on(
            Arc::clone(&db),
            &["p1", "p2", "p3"],
            &[("p1", "info@p1.test"), ("p2", "info@p2.test"), ("p3", "info@p3.test")],
            Arc::clone(&sender) as Arc<dyn MailSender>,
        )
        .await;
        let campaign = runner.create_campaign(email_campaign(list.id)).await.unwrap();

        let err = runner.run(campaign.id).await.unwrap_err();
        assert!(matches!(err, CampaignError::Database(_)));

        // The third recipient was never submitted.
        let to: Vec<_> = sender.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect();
        assert_eq!(to, vec!["info@p1.test", "info@p2.test"]);

        let recipients = db.list_recipients(campaign.id, None).await.unwrap();
        let by_place: HashMap<_, _> = recipients.iter().map(|r| (r.place_id.as_str(), r)).collect();
        assert_eq!(by_place["p1"].status, DeliveryStatus::Sent);
        assert_eq!(by_place["p2"].status, DeliveryStatus::Failed);
        assert!(by_place["p2"].error.as_deref().unwrap().starts_with("Run aborted"));
        assert_eq!(by_place["p3"].status, DeliveryStatus::Pending);

        let stored = db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
        assert!(stored.completed_at.is_none());
        let count = |s: DeliveryStatus| recipients.iter().filter(|r| r.status == s).count() as u32;
        assert_eq!(
            stored.counters,
            CampaignCounters {
                total: recipients.len() as u32,
                sent: count(DeliveryStatus::Sent),
                failed: count(DeliveryStatus::Failed),
            }
        );
    }

    #[tokio::test]
    async fn recipients_claimed_elsewhere_are_not_attempted() {
        let store = Arc::new(FaultyStore::new(None).await);
        let db: Arc<dyn Database> = store.clone();
        let sender = Arc::new(RecordingSender::default());
        let (runner, list) = runner_on(
            Arc::clone(&db),
            &["p1", "p2", "p3"],
            &[("p1", "info@p1.test"), ("p2", "info@p2.test"), ("p3", "info@p3.test")],
            Arc::clone(&sender) as Arc<dyn MailSender>,
        )
        .await;
        let campaign = runner.create_campaign(email_campaign(list.id)).await.unwrap();
        let recipients = db.list_recipients(campaign.id, None).await.unwrap();
        store.taken.lock().unwrap().push(recipients[1].id);

        let summary = runner.run(campaign.id).await.unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.counters, CampaignCounters { total: 3, sent: 3, failed: 0 });
        let to: Vec<_> = sender.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect();
        assert_eq!(to, vec!["info@p1.test", "info@p3.test"]);
    }
}
